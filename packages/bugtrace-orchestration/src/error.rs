use std::path::PathBuf;
use std::time::Duration;

use bugtrace_storage::StorageError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::job::StageId;

pub type Result<T> = std::result::Result<T, ReproError>;

/// Everything that can go wrong while reproducing one bug pass.
///
/// A pass that returns any of these is recorded in the run log and the batch
/// moves on to the next pass.
#[derive(Error, Debug)]
pub enum ReproError {
    #[error("Failed to materialize revision {revision} into {}: {reason}", workspace.display())]
    Materialization {
        revision: String,
        workspace: PathBuf,
        reason: String,
    },

    #[error("Build tool {} not found in {}", tool.display(), workspace.display())]
    MissingBuildTool { tool: PathBuf, workspace: PathBuf },

    #[error("Build in {} failed: {reason}", build_dir.display())]
    BuildFailed { build_dir: PathBuf, reason: String },

    #[error("Executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("Tracing {} exceeded {}s", binary.display(), timeout.as_secs())]
    TraceTimeout { binary: PathBuf, timeout: Duration },

    #[error("Tracing {} failed: {reason}", binary.display())]
    TraceFailed { binary: PathBuf, reason: String },

    #[error("Conversion step '{step}' failed: {reason}")]
    Conversion { step: String, reason: String },

    #[error("Invalid bug record: {0}")]
    InvalidRecord(String),

    #[error("Invalid state transition for {pass}: {from} -> {to}")]
    InvalidStateTransition {
        pass: String,
        from: String,
        to: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Bug database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReproError {
    pub fn materialization<E: std::fmt::Display>(
        revision: &str,
        workspace: impl Into<PathBuf>,
        reason: E,
    ) -> Self {
        Self::Materialization {
            revision: revision.to_string(),
            workspace: workspace.into(),
            reason: reason.to_string(),
        }
    }

    pub fn build_failed<E: std::fmt::Display>(build_dir: impl Into<PathBuf>, reason: E) -> Self {
        Self::BuildFailed {
            build_dir: build_dir.into(),
            reason: reason.to_string(),
        }
    }

    pub fn trace_failed<E: std::fmt::Display>(binary: impl Into<PathBuf>, reason: E) -> Self {
        Self::TraceFailed {
            binary: binary.into(),
            reason: reason.to_string(),
        }
    }

    pub fn conversion<E: std::fmt::Display>(step: &str, reason: E) -> Self {
        Self::Conversion {
            step: step.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn database<E: std::fmt::Display>(e: E) -> Self {
        Self::Database(e.to_string())
    }

    /// Taxonomy name written to the run log next to the message
    pub fn kind_name(&self) -> &'static str {
        match self {
            ReproError::Materialization { .. } => "MaterializationError",
            ReproError::MissingBuildTool { .. } => "MissingBuildToolError",
            ReproError::BuildFailed { .. } => "BuildFailedError",
            ReproError::ExecutableNotFound(_) => "ExecutableNotFoundError",
            ReproError::TraceTimeout { .. } => "TraceTimeoutError",
            ReproError::TraceFailed { .. } => "TraceFailedError",
            ReproError::Conversion { .. } => "ConversionError",
            ReproError::InvalidRecord(_) => "InvalidRecordError",
            ReproError::InvalidStateTransition { .. } => "InvalidStateTransitionError",
            ReproError::Parse(_) => "ParseError",
            ReproError::Database(_) => "DatabaseError",
            ReproError::Config(_) => "ConfigError",
            ReproError::Storage(_) => "StorageError",
            ReproError::Io(_) => "IoError",
        }
    }

    /// Stage that raises this error, for the taxonomy errors
    pub fn stage(&self) -> Option<StageId> {
        match self {
            ReproError::Materialization { .. } => Some(StageId::Materialize),
            ReproError::MissingBuildTool { .. } | ReproError::BuildFailed { .. } => {
                Some(StageId::Build)
            }
            ReproError::ExecutableNotFound(_)
            | ReproError::TraceTimeout { .. }
            | ReproError::TraceFailed { .. } => Some(StageId::Trace),
            ReproError::Conversion { .. } => Some(StageId::Convert),
            _ => None,
        }
    }
}
