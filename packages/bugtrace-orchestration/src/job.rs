use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReproError, Result};

/// Pipeline stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Materialize,
    Build,
    Trace,
    Convert,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Materialize => "materialize",
            StageId::Build => "build",
            StageId::Trace => "trace",
            StageId::Convert => "convert",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "materialize" => Ok(StageId::Materialize),
            "build" => Ok(StageId::Build),
            "trace" => Ok(StageId::Trace),
            "convert" => Ok(StageId::Convert),
            _ => Err(ReproError::parse(format!("Invalid stage ID: {}", s))),
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which side of a bug a pass reproduces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Bug,
    Fix,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Bug => "bug",
            Variant::Fix => "fix",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which cache gates tripped during a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    /// Binary already published: materialize and build were skipped
    pub build_skipped: bool,
    /// Graph already published: trace and convert were skipped
    pub run_skipped: bool,
}

impl GateOutcome {
    pub fn fully_cached(&self) -> bool {
        self.build_skipped && self.run_skipped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PassState {
    Queued {
        queued_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
        current_stage: StageId,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
        gates: GateOutcome,
    },
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        failed_stage: StageId,
        error: String,
    },
}

impl PassState {
    pub fn state_name(&self) -> &'static str {
        match self {
            PassState::Queued { .. } => "queued",
            PassState::Running { .. } => "running",
            PassState::Completed { .. } => "completed",
            PassState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PassState::Completed { .. } | PassState::Failed { .. })
    }
}

/// One (record, variant) unit of work
#[derive(Debug, Clone)]
pub struct PassJob {
    pub record_id: String,
    pub variant: Variant,
    pub revision: String,
    pub state: PassState,
    pub updated_at: DateTime<Utc>,
}

impl PassJob {
    pub fn new_queued(record_id: impl Into<String>, variant: Variant, revision: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            record_id: record_id.into(),
            variant,
            revision: revision.into(),
            state: PassState::Queued { queued_at: now },
            updated_at: now,
        }
    }

    /// `{record_id}::{variant}`, used for the terminal title and log lines
    pub fn label(&self) -> String {
        format!("{}::{}", self.record_id, self.variant)
    }
}

/// Pass state machine
///
/// ```text
/// Queued -> Running(stage) -> Running(next stage) -> Completed
///                         \-> Failed(stage)
/// ```
pub struct PassStateMachine {
    job: PassJob,
}

impl PassStateMachine {
    pub fn new(job: PassJob) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &PassJob {
        &self.job
    }

    pub fn into_job(self) -> PassJob {
        self.job
    }

    /// Stage the pass is currently in, if running
    pub fn current_stage(&self) -> Option<StageId> {
        match &self.job.state {
            PassState::Running { current_stage, .. } => Some(*current_stage),
            _ => None,
        }
    }

    /// Transition: QUEUED → RUNNING
    pub fn start(&mut self, stage: StageId) -> Result<()> {
        match &self.job.state {
            PassState::Queued { .. } => {
                let now = Utc::now();
                self.job.state = PassState::Running {
                    started_at: now,
                    current_stage: stage,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid_transition("running")),
        }
    }

    /// Move a running pass to its next stage
    pub fn enter(&mut self, stage: StageId) -> Result<()> {
        match &mut self.job.state {
            PassState::Running { current_stage, .. } => {
                *current_stage = stage;
                self.job.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.invalid_transition("enter_stage")),
        }
    }

    /// Transition: RUNNING → COMPLETED
    pub fn complete(&mut self, gates: GateOutcome) -> Result<()> {
        match &self.job.state {
            PassState::Running { started_at, .. } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds().max(0) as u64;
                self.job.state = PassState::Completed {
                    started_at: *started_at,
                    completed_at: now,
                    duration_ms,
                    gates,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid_transition("completed")),
        }
    }

    /// Transition: RUNNING → FAILED, attributed to the current stage
    pub fn fail(&mut self, error: String) -> Result<()> {
        match &self.job.state {
            PassState::Running {
                started_at,
                current_stage,
            } => {
                let now = Utc::now();
                self.job.state = PassState::Failed {
                    started_at: *started_at,
                    failed_at: now,
                    failed_stage: *current_stage,
                    error,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid_transition("failed")),
        }
    }

    fn invalid_transition(&self, to: &str) -> ReproError {
        ReproError::InvalidStateTransition {
            pass: self.job.label(),
            from: self.job.state.state_name().to_string(),
            to: to.to_string(),
        }
    }
}
