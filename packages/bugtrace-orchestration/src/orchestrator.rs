//! Batch driver
//!
//! For every record, bug side then fix side, one pass runs:
//!
//! ```text
//! binary published?   yes -> skip materialize + build
//! graph published?    yes -> skip trace + convert
//! ```
//!
//! A failing pass is written to the run log and the batch moves on. Passes
//! run one at a time.

use std::io::{IsTerminal, Write};
use std::sync::Arc;

use bugtrace_storage::{ArtifactStore, FsArtifactStore};
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::database::{BugDatabase, BugRecord};
use crate::error::Result;
use crate::job::{GateOutcome, PassJob, PassState, PassStateMachine, StageId, Variant};
use crate::layout::{LayoutPlanner, PassLayout};
use crate::pipeline::PipelineStages;
use crate::process::{ProcessRunner, TokioProcessRunner};
use crate::run_log::RunLog;
use crate::stages::{ExecutionTracer, InstrumentedBuilder, RevisionMaterializer, TraceToGraphConverter};
use crate::vcs::{Git2Archiver, VcsArchiver};

/// Outcome of a whole batch
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub passes: Vec<PassJob>,
    /// Database entries that never became a pass
    pub rejected: usize,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.passes
            .iter()
            .filter(|p| matches!(p.state, PassState::Completed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.passes
            .iter()
            .filter(|p| matches!(p.state, PassState::Failed { .. }))
            .count()
    }

    /// Completed passes that ran no stage at all
    pub fn fully_cached(&self) -> usize {
        self.passes
            .iter()
            .filter(|p| matches!(p.state, PassState::Completed { gates, .. } if gates.fully_cached()))
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} passes: {} completed ({} cached), {} failed, {} rejected entries",
            self.passes.len(),
            self.completed(),
            self.fully_cached(),
            self.failed(),
            self.rejected
        )
    }
}

/// What a pass would do, without running it
#[derive(Debug, Clone)]
pub struct PassPreview {
    pub layout: PassLayout,
    pub binary_present: bool,
    pub graph_present: bool,
}

pub struct BatchOrchestrator {
    planner: LayoutPlanner,
    store: Arc<dyn ArtifactStore>,
    stages: PipelineStages,
    terminal_title: bool,
}

impl BatchOrchestrator {
    pub fn new(planner: LayoutPlanner, store: Arc<dyn ArtifactStore>, stages: PipelineStages) -> Self {
        Self {
            planner,
            store,
            stages,
            terminal_title: false,
        }
    }

    /// Production wiring: git archiver on the repo, real subprocesses,
    /// artifacts under the output dir
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let archiver: Arc<dyn VcsArchiver> = Arc::new(Git2Archiver::new(&config.paths.repo_dir));
        let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner::new());
        let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(&config.paths.output_dir));
        Self::with_collaborators(config, archiver, runner, store)
    }

    /// Same wiring as [`from_config`](Self::from_config) over the given
    /// archiver, runner and store
    pub fn with_collaborators(
        config: &PipelineConfig,
        archiver: Arc<dyn VcsArchiver>,
        runner: Arc<dyn ProcessRunner>,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self> {
        let stages = PipelineStages {
            materializer: Arc::new(RevisionMaterializer::new(archiver)),
            builder: Arc::new(InstrumentedBuilder::new(
                config.build.clone(),
                &config.paths.repo_dir,
                Arc::clone(&runner),
                Arc::clone(&store),
            )?),
            tracer: Arc::new(ExecutionTracer::new(
                config.tracer.clone(),
                &config.paths.repo_dir,
                Arc::clone(&runner),
                Arc::clone(&store),
            )?),
            converter: Arc::new(TraceToGraphConverter::new(
                config.converter.clone(),
                &config.paths.converter_dir,
                runner,
                Arc::clone(&store),
            )),
        };
        let planner = LayoutPlanner::new(
            config.paths.clone(),
            config.naming.clone(),
            config.tracer.trace_extension.clone(),
        );
        Ok(Self::new(planner, store, stages).with_terminal_title(config.log.terminal_title))
    }

    pub fn with_terminal_title(mut self, enabled: bool) -> Self {
        self.terminal_title = enabled;
        self
    }

    /// Layout and gate state of every pass, in batch order
    pub async fn preview(&self, records: &[BugRecord]) -> Result<Vec<PassPreview>> {
        let mut previews = Vec::new();
        for record in records {
            for variant in record.variants() {
                let Some(revision) = record.revision(variant) else {
                    continue;
                };
                let layout = self.planner.plan(&record.id, variant, revision)?;
                previews.push(PassPreview {
                    binary_present: self.store.exists(&layout.binary).await,
                    graph_present: self.store.exists(&layout.graph).await,
                    layout,
                });
            }
        }
        Ok(previews)
    }

    pub async fn run_batch(&self, database: &BugDatabase, run_log: &mut RunLog) -> BatchReport {
        let mut report = BatchReport {
            rejected: database.rejected.len(),
            ..BatchReport::default()
        };
        for rejected in &database.rejected {
            if let Err(e) = run_log.record_rejected(rejected) {
                warn!(error = %e, "Could not write run log");
            }
        }

        info!(
            records = database.records.len(),
            log = %run_log.path().display(),
            "Starting batch"
        );

        for record in &database.records {
            for variant in record.variants() {
                let Some(revision) = record.revision(variant) else {
                    continue;
                };
                let job = self.run_pass(record, variant, revision, run_log).await;
                report.passes.push(job);
            }
        }

        info!("{}", report.summary());
        report
    }

    async fn run_pass(
        &self,
        record: &BugRecord,
        variant: Variant,
        revision: &str,
        run_log: &mut RunLog,
    ) -> PassJob {
        let mut sm = PassStateMachine::new(PassJob::new_queued(&record.id, variant, revision));
        let label = sm.job().label();
        self.set_title(&label);
        info!(record = %record.id, variant = %variant, revision, "Reproducing {}", label);

        let outcome = match sm.start(StageId::Materialize) {
            Ok(()) => self.drive(&mut sm, record, variant, revision).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(gates) => {
                if let Err(e) = sm.complete(gates) {
                    warn!(error = %e, "{}", label);
                }
                if gates.fully_cached() {
                    info!(record = %record.id, variant = %variant, "Already reproduced");
                }
            }
            Err(e) => {
                let stage = sm.current_stage().or_else(|| e.stage());
                error!(
                    record = %record.id,
                    variant = %variant,
                    revision,
                    stage = stage.map(|s| s.as_str()).unwrap_or("batch"),
                    error = %e,
                    "Pass failed"
                );
                if let Err(transition) = sm.fail(e.to_string()) {
                    warn!(error = %transition, "{}", label);
                }
                if let Err(log_err) = run_log.record_failure(sm.job(), &e) {
                    warn!(error = %log_err, "Could not write run log");
                }
            }
        }

        sm.into_job()
    }

    async fn drive(
        &self,
        sm: &mut PassStateMachine,
        record: &BugRecord,
        variant: Variant,
        revision: &str,
    ) -> Result<GateOutcome> {
        let layout = self.planner.plan(&record.id, variant, revision)?;
        let mut gates = GateOutcome::default();

        if self.store.exists(&layout.binary).await {
            info!(binary = %layout.binary, "Binary published, skipping build");
            gates.build_skipped = true;
        } else {
            self.stages.materializer.materialize(&layout).await?;
            sm.enter(StageId::Build)?;
            self.stages.builder.build(&layout, &record.build).await?;
        }

        if self.store.exists(&layout.graph).await {
            info!(graph = %layout.graph, "Graph published, skipping trace");
            gates.run_skipped = true;
        } else {
            sm.enter(StageId::Trace)?;
            let trace = self.stages.tracer.trace(&layout, record.input.as_ref()).await?;
            sm.enter(StageId::Convert)?;
            self.stages.converter.convert(&layout, &trace).await?;
        }

        Ok(gates)
    }

    fn set_title(&self, label: &str) {
        if !self.terminal_title {
            return;
        }
        let mut stdout = std::io::stdout();
        if stdout.is_terminal() {
            let _ = write!(stdout, "\x1b]0;{}\x07", label);
            let _ = stdout.flush();
        }
    }
}
