//! Execution tracing
//!
//! [`ExecutionTracer`] decides what to run (one test case, or every test of
//! the regression suite) and a [`TraceStrategy`] decides how the call trace
//! is captured while it runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bugtrace_storage::ArtifactStore;
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{compile_pattern, TraceStrategyConfig, TracerConfig};
use crate::database::TestInput;
use crate::error::{ReproError, Result};
use crate::layout::PassLayout;
use crate::pipeline::{RawTrace, TraceStage};
use crate::process::{CommandSpec, ProcessError, ProcessRunner};

use super::callgrind::CallgrindStrategy;

/// Outcome of one traced run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Trace text collected by the strategy itself, if it collects in-process
    pub chains: Option<String>,
}

impl Execution {
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait TraceStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Clear whatever an earlier run left behind
    async fn prepare(&self, work_dir: &Path) -> Result<()>;

    async fn execute(
        &self,
        binary: &Path,
        input: &Path,
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<Execution>;

    /// Store the collected trace at `target`
    async fn finish(&self, work_dir: &Path, chains: &[String], target: &Path) -> Result<()>;

    /// Remove partial output after an aborted run
    async fn discard(&self, work_dir: &Path);
}

/// The instrumented binary appends to a fixed trace file in its working
/// directory; every run of a pass accumulates into the same file.
pub struct FunctionCallStrategy {
    trace_file: String,
    runner: Arc<dyn ProcessRunner>,
}

impl FunctionCallStrategy {
    pub fn new(trace_file: impl Into<String>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            trace_file: trace_file.into(),
            runner,
        }
    }

    fn trace_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(&self.trace_file)
    }
}

#[async_trait]
impl TraceStrategy for FunctionCallStrategy {
    fn name(&self) -> &'static str {
        "function-call"
    }

    async fn prepare(&self, work_dir: &Path) -> Result<()> {
        let stale = self.trace_path(work_dir);
        if tokio::fs::try_exists(&stale).await.unwrap_or(false) {
            tokio::fs::remove_file(&stale).await?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        binary: &Path,
        input: &Path,
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<Execution> {
        let spec = CommandSpec::new(binary)
            .arg(input.display().to_string())
            .current_dir(work_dir);

        match self.runner.run(&spec, Some(timeout)).await {
            Ok(output) => Ok(Execution {
                exit_code: output.exit_code,
                ..Execution::default()
            }),
            Err(ProcessError::TimedOut { .. }) => Ok(Execution {
                timed_out: true,
                ..Execution::default()
            }),
            Err(e) => Err(ReproError::trace_failed(binary, e)),
        }
    }

    async fn finish(&self, work_dir: &Path, _chains: &[String], target: &Path) -> Result<()> {
        let produced = self.trace_path(work_dir);
        if !tokio::fs::try_exists(&produced).await.unwrap_or(false) {
            return Err(ReproError::trace_failed(
                target,
                format!("no {} was written", self.trace_file),
            ));
        }
        tokio::fs::rename(&produced, target).await?;
        Ok(())
    }

    async fn discard(&self, work_dir: &Path) {
        let partial = self.trace_path(work_dir);
        if let Err(e) = tokio::fs::remove_file(&partial).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %partial.display(), error = %e, "Could not remove partial trace");
            }
        }
    }
}

/// Regression-suite discovery
struct Suite {
    dir: PathBuf,
    pattern: Regex,
}

impl Suite {
    /// Every matching file below `dir`, in a stable order
    fn tests(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| self.pattern.is_match(name))
            })
            .map(|entry| entry.into_path())
            .collect()
    }
}

pub struct ExecutionTracer {
    config: TracerConfig,
    repo_dir: PathBuf,
    store: Arc<dyn ArtifactStore>,
    strategy: Box<dyn TraceStrategy>,
    suite: Option<Suite>,
}

impl ExecutionTracer {
    pub fn new(
        config: TracerConfig,
        repo_dir: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self> {
        let strategy: Box<dyn TraceStrategy> = match &config.strategy {
            TraceStrategyConfig::FunctionCall { trace_file } => {
                Box::new(FunctionCallStrategy::new(trace_file.clone(), runner))
            }
            TraceStrategyConfig::Callgrind { .. } => {
                Box::new(CallgrindStrategy::from_config(&config.strategy, runner)?)
            }
        };
        Self::with_strategy(config, repo_dir, store, strategy)
    }

    pub fn with_strategy(
        config: TracerConfig,
        repo_dir: impl Into<PathBuf>,
        store: Arc<dyn ArtifactStore>,
        strategy: Box<dyn TraceStrategy>,
    ) -> Result<Self> {
        let repo_dir = repo_dir.into();
        let suite = match &config.suite {
            Some(suite) => Some(Suite {
                dir: repo_dir.join(&suite.dir),
                pattern: compile_pattern("tracer.suite.pattern", &suite.pattern)?,
            }),
            None => None,
        };
        Ok(Self {
            config,
            repo_dir,
            store,
            strategy,
            suite,
        })
    }

    async fn single_input(&self, layout: &PassLayout, input: Option<&TestInput>) -> Result<PathBuf> {
        match input {
            Some(TestInput::Inline(text)) => {
                let path = layout.work_dir.join(&self.config.inline_input_name);
                tokio::fs::create_dir_all(&layout.work_dir).await?;
                tokio::fs::write(&path, text).await?;
                Ok(path)
            }
            Some(TestInput::File(file)) => {
                let path = if file.is_absolute() {
                    file.clone()
                } else {
                    self.repo_dir.join(file)
                };
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(ReproError::InvalidRecord(format!(
                        "test file {} does not exist",
                        path.display()
                    )));
                }
                Ok(path)
            }
            None => Err(ReproError::InvalidRecord(format!(
                "{} has no test case to run",
                layout.record_id
            ))),
        }
    }

    async fn run_single(&self, binary: &Path, input: &Path, layout: &PassLayout) -> Result<Vec<String>> {
        let execution = self
            .strategy
            .execute(binary, input, &layout.work_dir, self.config.timeout())
            .await?;

        if execution.timed_out {
            self.strategy.discard(&layout.work_dir).await;
            return Err(ReproError::TraceTimeout {
                binary: binary.to_path_buf(),
                timeout: self.config.timeout(),
            });
        }
        info!(exit_code = ?execution.exit_code, "Traced run finished");
        Ok(execution.chains.into_iter().collect())
    }

    async fn run_suite(&self, binary: &Path, suite: &Suite, layout: &PassLayout) -> Result<(Vec<String>, PathBuf, usize)> {
        let tests = suite.tests();
        let mut chains = Vec::new();
        let mut ledger = String::new();

        for (index, test) in tests.iter().enumerate() {
            let execution = self
                .strategy
                .execute(binary, test, &layout.work_dir, self.config.timeout())
                .await?;
            if execution.timed_out {
                warn!(test = %test.display(), "Test timed out, recording FAIL");
            }
            let verdict = if execution.passed() { "PASS" } else { "FAIL" };
            let shown = test.strip_prefix(&self.repo_dir).unwrap_or(test);
            ledger.push_str(&format!("{}:{}:{}\n", index + 1, verdict, shown.display()));
            chains.extend(execution.chains);
        }

        let ledger_path = self.store.publish(&layout.ledger, ledger.as_bytes()).await?;
        info!(tests = tests.len(), ledger = %ledger_path.display(), "Suite finished");
        Ok((chains, ledger_path, tests.len()))
    }
}

#[async_trait]
impl TraceStage for ExecutionTracer {
    async fn trace(&self, layout: &PassLayout, input: Option<&TestInput>) -> Result<RawTrace> {
        if !self.store.exists(&layout.binary).await {
            return Err(ReproError::ExecutableNotFound(self.store.locate(&layout.binary)));
        }
        let binary = self.store.locate(&layout.binary);
        tokio::fs::create_dir_all(&layout.work_dir).await?;
        self.strategy.prepare(&layout.work_dir).await?;

        // A trace left by an earlier unconverted attempt must not outlive this run
        let target = self.store.locate(&layout.raw_trace);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!(path = %target.display(), "Removing stale raw trace");
            tokio::fs::remove_file(&target).await?;
        }

        info!(
            pass = %layout.pass_name(),
            strategy = self.strategy.name(),
            suite = self.suite.is_some(),
            "Tracing"
        );

        let (chains, ledger, executions) = match &self.suite {
            Some(suite) => {
                let (chains, ledger, count) = self.run_suite(&binary, suite, layout).await?;
                (chains, Some(ledger), count)
            }
            None => {
                let input = self.single_input(layout, input).await?;
                (self.run_single(&binary, &input, layout).await?, None, 1)
            }
        };

        self.strategy.finish(&layout.work_dir, &chains, &target).await?;

        Ok(RawTrace {
            path: target,
            ledger,
            executions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, Preset};
    use crate::job::Variant;
    use crate::layout::LayoutPlanner;
    use crate::testing::{self, ScriptedRunner};
    use bugtrace_storage::FsArtifactStore;
    use pretty_assertions::assert_eq;

    struct Fixture {
        _root: tempfile::TempDir,
        config: PipelineConfig,
        layout: PassLayout,
        store: Arc<FsArtifactStore>,
    }

    fn fixture(preset: Preset) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::preset(preset);
        config.paths.repo_dir = root.path().join("repo");
        config.paths.workspace_root = root.path().join("ws");
        config.paths.output_dir = root.path().join("out");
        std::fs::create_dir_all(&config.paths.repo_dir).unwrap();
        let layout = LayoutPlanner::new(
            config.paths.clone(),
            config.naming.clone(),
            config.tracer.trace_extension.clone(),
        )
        .plan("7", Variant::Bug, "abc")
        .unwrap();
        let store = Arc::new(FsArtifactStore::new(&config.paths.output_dir));
        Fixture {
            _root: root,
            config,
            layout,
            store,
        }
    }

    async fn publish_binary(fx: &Fixture) {
        fx.store.publish(&fx.layout.binary, b"elf").await.unwrap();
    }

    fn tracer(fx: &Fixture, runner: Arc<ScriptedRunner>) -> ExecutionTracer {
        ExecutionTracer::new(
            fx.config.tracer.clone(),
            &fx.config.paths.repo_dir,
            runner,
            fx.store.clone(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let fx = fixture(Preset::FunctionTrace);
        let runner = Arc::new(ScriptedRunner::new());

        let err = tracer(&fx, runner.clone())
            .trace(&fx.layout, Some(&TestInput::Inline("1".into())))
            .await
            .unwrap_err();

        assert!(matches!(err, ReproError::ExecutableNotFound(_)));
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_inline_case_traced_and_relocated() {
        let fx = fixture(Preset::FunctionTrace);
        publish_binary(&fx).await;
        // Stale trace from an earlier, unrelated run
        std::fs::write(fx.layout.work_dir.join("tracer.bchains"), "stale\n").unwrap();
        let runner = Arc::new(
            ScriptedRunner::new().on("jerry-7-bug", testing::emulate_trace_file("tracer.bchains")),
        );

        let raw = tracer(&fx, runner.clone())
            .trace(&fx.layout, Some(&TestInput::Inline("var a = 1;".into())))
            .await
            .unwrap();

        assert_eq!(raw.path, fx.layout.work_dir.join("jerry-7-bug.bchains"));
        assert_eq!(raw.executions, 1);
        let trace = std::fs::read_to_string(&raw.path).unwrap();
        assert!(!trace.contains("stale"));
        assert!(!fx.layout.work_dir.join("tracer.bchains").exists());

        let input = fx.layout.work_dir.join("temp.js");
        assert_eq!(std::fs::read_to_string(&input).unwrap(), "var a = 1;");
        let call = &runner.invocations()[0];
        assert_eq!(call.args, vec![input.display().to_string()]);
        assert_eq!(call.cwd.as_deref(), Some(fx.layout.work_dir.as_path()));
    }

    #[tokio::test]
    async fn test_timeout_discards_partial_trace() {
        let fx = fixture(Preset::FunctionTrace);
        publish_binary(&fx).await;
        let runner = Arc::new(
            ScriptedRunner::new().on("jerry-7-bug", testing::partial_trace_then_timeout("tracer.bchains")),
        );

        let err = tracer(&fx, runner)
            .trace(&fx.layout, Some(&TestInput::Inline("while(1);".into())))
            .await
            .unwrap_err();

        assert!(matches!(err, ReproError::TraceTimeout { timeout, .. } if timeout == Duration::from_secs(30)));
        assert!(!fx.layout.work_dir.join("tracer.bchains").exists());
        assert!(!fx.layout.work_dir.join("jerry-7-bug.bchains").exists());
    }

    #[tokio::test]
    async fn test_no_trace_written_is_failure() {
        let fx = fixture(Preset::FunctionTrace);
        publish_binary(&fx).await;

        let err = tracer(&fx, Arc::new(ScriptedRunner::new()))
            .trace(&fx.layout, Some(&TestInput::Inline("1".into())))
            .await
            .unwrap_err();

        assert!(matches!(err, ReproError::TraceFailed { .. }));
    }

    #[tokio::test]
    async fn test_record_without_test_case() {
        let fx = fixture(Preset::FunctionTrace);
        publish_binary(&fx).await;

        let err = tracer(&fx, Arc::new(ScriptedRunner::new()))
            .trace(&fx.layout, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ReproError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn test_suite_ledger_in_sorted_order() {
        let fx = fixture(Preset::RegressionSuite);
        publish_binary(&fx).await;
        let tests = fx.config.paths.repo_dir.join("tests/jerry");
        std::fs::create_dir_all(tests.join("es2015")).unwrap();
        std::fs::write(tests.join("b.js"), "").unwrap();
        std::fs::write(tests.join("a.js"), "").unwrap();
        std::fs::write(tests.join("es2015/c.js"), "").unwrap();
        std::fs::write(tests.join("README"), "").unwrap();

        let runner = Arc::new(ScriptedRunner::new().on("jerry-7-bug", |spec: &CommandSpec| {
            testing::emulate_trace_file("tracer.trc")(spec)?;
            if spec.args[0].ends_with("b.js") {
                return Err(testing::timed_out(spec));
            }
            let code = if spec.args[0].ends_with("c.js") { 1 } else { 0 };
            Ok(crate::process::ProcessOutput {
                exit_code: Some(code),
                stdout: String::new(),
            })
        }));

        let raw = tracer(&fx, runner.clone()).trace(&fx.layout, None).await.unwrap();

        assert_eq!(raw.executions, 3);
        assert_eq!(raw.path, fx.layout.work_dir.join("jerry-7-bug.trc"));
        let ledger = std::fs::read_to_string(raw.ledger.unwrap()).unwrap();
        assert_eq!(
            ledger,
            "1:PASS:tests/jerry/a.js\n2:FAIL:tests/jerry/b.js\n3:FAIL:tests/jerry/es2015/c.js\n"
        );
        assert_eq!(runner.invocations().len(), 3);
    }
}
