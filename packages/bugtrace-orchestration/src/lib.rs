/*
 * Bugtrace Orchestration - instrumented bug reproduction pipeline
 *
 * For each bug database entry, and each of its bug/fix revisions:
 * - Materialize: export the revision into its own workspace
 * - Build: compile an instrumented interpreter, publish it under bin/
 * - Trace: run the failing input under the tracer with a timeout
 * - Convert: raw trace -> call graph, compress the outputs
 *
 * Published binaries and graphs double as the cache: a pass whose outputs
 * already exist does not run again.
 */

// Public modules
pub mod compress;
pub mod config;
pub mod database;
pub mod error;
pub mod job;
pub mod layout;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod run_log;
pub mod stages;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod vcs;

// Re-exports
pub use config::{ConfigError, PipelineConfig, Preset};
pub use database::{BugDatabase, BugRecord, BuildOverride, RecordIdPolicy, RejectedEntry, TestInput};
pub use error::{ReproError, Result};
pub use job::{GateOutcome, PassJob, PassState, PassStateMachine, StageId, Variant};
pub use layout::{LayoutPlanner, PassLayout};
pub use orchestrator::{BatchOrchestrator, BatchReport, PassPreview};
pub use pipeline::{
    BuildStage, ConvertStage, GraphArtifact, MaterializeStage, PipelineStages, RawTrace, TraceStage,
};
pub use process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use run_log::RunLog;
pub use stages::{
    CallgrindStrategy, ExecutionTracer, FunctionCallStrategy, InstrumentedBuilder,
    RevisionMaterializer, TraceToGraphConverter,
};
pub use vcs::{Git2Archiver, VcsArchiver, VcsError};
