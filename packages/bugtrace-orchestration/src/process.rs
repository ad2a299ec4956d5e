//! External program execution
//!
//! Every stage talks to the outside world (build script, instrumented binary,
//! profiler, converters) through [`ProcessRunner`], so the stages can be
//! driven by a scripted runner in tests.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// One program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Capture stdout instead of letting it through to the terminal
    pub capture_stdout: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            capture_stdout: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    /// File name of the program (`/usr/bin/python3` -> `python3`)
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {}s", limit.as_secs())]
    TimedOut { program: String, limit: Duration },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::TimedOut { .. })
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, killing the process if `timeout` elapses first
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// Runs real processes on the tokio runtime
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, ProcessError> {
        let program = spec.program_name();
        debug!(command = %spec, cwd = ?spec.cwd, "Spawning");

        let mut command = tokio::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(if spec.capture_stdout {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let wait = child.wait_with_output();
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| ProcessError::TimedOut {
                    program: program.clone(),
                    limit,
                })?,
            None => wait.await,
        }
        .map_err(|source| ProcessError::Wait { program, source })?;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Resolve `program` against `dir` unless it is already absolute
pub fn program_in(dir: &Path, program: &str) -> PathBuf {
    let path = Path::new(program);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_display_and_name() {
        let spec = CommandSpec::new("/usr/bin/python3")
            .arg("./tools/build.py")
            .args(["--debug", "--builddir=/w/js-i1-bug-build"]);

        assert_eq!(spec.program_name(), "python3");
        assert_eq!(
            spec.to_string(),
            "/usr/bin/python3 ./tools/build.py --debug --builddir=/w/js-i1-bug-build"
        );
    }

    #[test]
    fn test_program_in() {
        assert_eq!(
            program_in(Path::new("/opt/conv"), "chain-to-graph.py"),
            PathBuf::from("/opt/conv/chain-to-graph.py")
        );
        assert_eq!(
            program_in(Path::new("/opt/conv"), "/usr/local/bin/x"),
            PathBuf::from("/usr/local/bin/x")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_captures_stdout_and_exit_code() {
        let runner = TokioProcessRunner::new();
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo chain; exit 3"])
            .capture_stdout();

        let output = runner.run(&spec, None).await.unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "chain");
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_kills_on_timeout() {
        let runner = TokioProcessRunner::new();
        let spec = CommandSpec::new("sleep").arg("5");

        let err = runner
            .run(&spec, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_runner_reports_spawn_failure() {
        let runner = TokioProcessRunner::new();
        let spec = CommandSpec::new("/nonexistent/bugtrace-no-such-program");

        let err = runner.run(&spec, None).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
