use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::database::{BuildOverride, TestInput};
use crate::error::Result;
use crate::layout::PassLayout;

/// Raw trace produced by a tracer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTrace {
    /// Location of the trace under its artifact name
    pub path: PathBuf,
    /// Pass/fail ledger (regression-suite mode only)
    pub ledger: Option<PathBuf>,
    pub executions: usize,
}

/// Outputs of a conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphArtifact {
    /// Compressed call graph
    pub graph: PathBuf,
    /// Every intermediate that was compressed alongside it
    pub compressed: Vec<PathBuf>,
}

/// Checks out a revision into the pass workspace
#[async_trait]
pub trait MaterializeStage: Send + Sync {
    /// No-op when the workspace already exists
    async fn materialize(&self, layout: &PassLayout) -> Result<()>;
}

/// Builds and publishes the pass binary
#[async_trait]
pub trait BuildStage: Send + Sync {
    /// Returns the published binary location
    async fn build(&self, layout: &PassLayout, build: &BuildOverride) -> Result<PathBuf>;
}

/// Runs the published binary and captures its call trace
#[async_trait]
pub trait TraceStage: Send + Sync {
    async fn trace(&self, layout: &PassLayout, input: Option<&TestInput>) -> Result<RawTrace>;
}

/// Turns a raw trace into the final graph artifact
#[async_trait]
pub trait ConvertStage: Send + Sync {
    async fn convert(&self, layout: &PassLayout, trace: &RawTrace) -> Result<GraphArtifact>;
}

/// The four stages a pass runs through, in order
#[derive(Clone)]
pub struct PipelineStages {
    pub materializer: Arc<dyn MaterializeStage>,
    pub builder: Arc<dyn BuildStage>,
    pub tracer: Arc<dyn TraceStage>,
    pub converter: Arc<dyn ConvertStage>,
}
