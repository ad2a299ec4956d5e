//! Append-only error log of one batch run
//!
//! ```text
//! ERROR in reproducing i42nt::bug (#abc123)
//! [materialize] MaterializationError: Failed to materialize revision abc123 ...
//! --------
//! ```

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::config::ConfigError;
use crate::database::RejectedEntry;
use crate::error::{ReproError, Result};
use crate::job::{PassJob, PassState};

const SEPARATOR: &str = "--------";

#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    /// Open `dir/{template formatted with the local time}` for appending
    pub fn open(dir: impl AsRef<Path>, file_template: &str) -> Result<Self> {
        let mut name = String::new();
        write!(name, "{}", Local::now().format(file_template)).map_err(|_| {
            ConfigError::invalid_field(
                "log.file_template",
                format!("'{}' is not a valid strftime format", file_template),
            )
        })?;
        Self::open_path(dir.as_ref().join(name))
    }

    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_failure(&mut self, job: &PassJob, error: &ReproError) -> Result<()> {
        let stage = match &job.state {
            PassState::Failed { failed_stage, .. } => failed_stage.as_str(),
            _ => error.stage().map(|s| s.as_str()).unwrap_or("batch"),
        };
        let entry = format!(
            "ERROR in reproducing {} (#{})\n[{}] {}: {}\n{}\n",
            job.label(),
            job.revision,
            stage,
            error.kind_name(),
            error,
            SEPARATOR
        );
        self.append(&entry)
    }

    pub fn record_rejected(&mut self, entry: &RejectedEntry) -> Result<()> {
        let line = format!(
            "ERROR in bug database entry #{}\n{}\n{}\n",
            entry.index, entry.reason, SEPARATOR
        );
        self.append(&line)
    }

    // Flushed per entry so a crash mid-batch keeps everything logged so far
    fn append(&mut self, text: &str) -> Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}
