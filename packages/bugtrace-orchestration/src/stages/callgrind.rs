//! Callgrind-based tracing
//!
//! The binary runs under `valgrind --tool=callgrind` with caller separation,
//! and `callgrind_annotate` prints one line per distinct call context:
//!
//! ```text
//!  1,234 (24.7%)  jerry-core/vm/vm.c:vm_loop'vm_run'main [/w/bin/jerry-i42nt-bug]
//! ```
//!
//! Each context becomes one call chain, outermost caller first
//! (`main-->vm_run-->vm_loop`), bracketed per run by `## START PROGRAM` and
//! `## QUIT PROGRAM`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::config::{compile_pattern, ConfigError, TraceStrategyConfig};
use crate::error::{ReproError, Result};
use crate::process::{CommandSpec, ProcessError, ProcessRunner};

use super::trace::{Execution, TraceStrategy};

pub const START_MARKER: &str = "## START PROGRAM";
pub const QUIT_MARKER: &str = "## QUIT PROGRAM";
/// Cost, optional percentage, `file:context`, object in brackets
const CALL_LINE: &str = r"^\s*[0-9,.]+\s+(?:\(\s*[0-9.]+%\)\s+)?\S+:(.+) \[";

pub struct CallgrindStrategy {
    valgrind: PathBuf,
    annotate: PathBuf,
    separate_callers: u32,
    separate_recs: u32,
    threshold: u32,
    call_line: Regex,
    private_suffix: Regex,
    runner: Arc<dyn ProcessRunner>,
}

impl CallgrindStrategy {
    pub fn from_config(config: &TraceStrategyConfig, runner: Arc<dyn ProcessRunner>) -> Result<Self> {
        let TraceStrategyConfig::Callgrind {
            valgrind,
            annotate,
            separate_callers,
            separate_recs,
            threshold,
            private_symbol_pattern,
        } = config
        else {
            return Err(ConfigError::invalid_field(
                "tracer.strategy",
                "callgrind strategy built from a non-callgrind configuration",
            )
            .into());
        };

        Ok(Self {
            valgrind: valgrind.clone(),
            annotate: annotate.clone(),
            separate_callers: *separate_callers,
            separate_recs: *separate_recs,
            threshold: *threshold,
            call_line: compile_pattern("callgrind.call_line", CALL_LINE)?,
            private_suffix: compile_pattern(
                "tracer.strategy.private_symbol_pattern",
                private_symbol_pattern,
            )?,
            runner,
        })
    }

    fn profile_command(&self, out_file: &Path, binary: &Path, input: &Path, work_dir: &Path) -> CommandSpec {
        CommandSpec::new(&self.valgrind)
            .args([
                format!("--callgrind-out-file={}", out_file.display()),
                "--tool=callgrind".to_string(),
                "--quiet".to_string(),
                format!("--separate-callers={}", self.separate_callers),
                format!("--separate-recs={}", self.separate_recs),
                "--skip-direct-rec=no".to_string(),
                binary.display().to_string(),
                input.display().to_string(),
            ])
            .current_dir(work_dir)
    }

    /// One `START`..`QUIT` block from annotated output
    pub fn render_block(&self, annotated: &str) -> String {
        let mut block = String::new();
        block.push_str(START_MARKER);
        block.push('\n');
        for chain in extract_call_chains(annotated, &self.call_line) {
            block.push_str(&strip_private_suffixes(&chain, &self.private_suffix));
            block.push('\n');
        }
        block.push_str(QUIT_MARKER);
        block.push('\n');
        block
    }
}

/// Call chains in `annotated`, outermost caller first
pub fn extract_call_chains(annotated: &str, call_line: &Regex) -> Vec<String> {
    annotated
        .lines()
        .filter_map(|line| call_line.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|context| {
            context
                .as_str()
                .split('\'')
                .rev()
                .collect::<Vec<_>>()
                .join("-->")
        })
        .collect()
}

/// Remove private-symbol decorations until none are left.
///
/// A single replacement pass can expose a new match (`f.lto_priv.lto_priv.1.2`
/// becomes `f.lto_priv.1`), so this repeats to a fixed point and applying it
/// twice is the same as applying it once.
pub fn strip_private_suffixes(text: &str, pattern: &Regex) -> String {
    let mut current = text.to_string();
    loop {
        let next = pattern.replace_all(&current, "").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

#[async_trait]
impl TraceStrategy for CallgrindStrategy {
    fn name(&self) -> &'static str {
        "callgrind"
    }

    async fn prepare(&self, _work_dir: &Path) -> Result<()> {
        Ok(())
    }

    async fn execute(
        &self,
        binary: &Path,
        input: &Path,
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<Execution> {
        // Deleted on drop, whichever way this returns
        let out_file = tempfile::Builder::new()
            .prefix("callgrind.out.")
            .tempfile()?;

        let profile = self.profile_command(out_file.path(), binary, input, work_dir);
        let exit_code = match self.runner.run(&profile, Some(timeout)).await {
            Ok(output) => output.exit_code,
            Err(ProcessError::TimedOut { .. }) => {
                return Ok(Execution {
                    timed_out: true,
                    ..Execution::default()
                })
            }
            Err(e) => return Err(ReproError::trace_failed(binary, e)),
        };

        let annotate = CommandSpec::new(&self.annotate)
            .arg(format!("--threshold={}", self.threshold))
            .arg(out_file.path().display().to_string())
            .current_dir(work_dir)
            .capture_stdout();
        let annotated = self
            .runner
            .run(&annotate, None)
            .await
            .map_err(|e| ReproError::trace_failed(binary, e))?;
        if !annotated.success() {
            return Err(ReproError::trace_failed(
                binary,
                format!(
                    "{} exited with {:?}",
                    annotate.program_name(),
                    annotated.exit_code
                ),
            ));
        }

        let block = self.render_block(&annotated.stdout);
        debug!(lines = block.lines().count(), "Annotated profile");
        Ok(Execution {
            exit_code,
            timed_out: false,
            chains: Some(block),
        })
    }

    async fn finish(&self, _work_dir: &Path, chains: &[String], target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, chains.concat()).await?;
        Ok(())
    }

    async fn discard(&self, _work_dir: &Path) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, Preset};
    use crate::testing::{self, ScriptedRunner};
    use pretty_assertions::assert_eq;

    const ANNOTATED: &str = "\
--------------------------------------------------------------------------------
Ir
--------------------------------------------------------------------------------
5,000 (100.0%)  PROGRAM TOTALS

--------------------------------------------------------------------------------
Ir              file:function
--------------------------------------------------------------------------------
 1,234 (24.7%)  jerry-core/vm/vm.c:vm_loop'vm_run'main [/w/bin/jerry-i42nt-bug]
   321  jerry-core/ecma/ecma-gc.c:ecma_gc_run.lto_priv.0'ecma_free_unused_memory'vm_loop [/w/bin/jerry-i42nt-bug]
    12 ( 0.2%)  ???:_start [/w/bin/jerry-i42nt-bug]
";

    fn strategy(runner: Arc<ScriptedRunner>) -> CallgrindStrategy {
        CallgrindStrategy::from_config(&PipelineConfig::preset(Preset::Callgrind).tracer.strategy, runner)
            .unwrap()
    }

    #[test]
    fn test_function_call_config_is_rejected() {
        let config = PipelineConfig::preset(Preset::FunctionTrace).tracer.strategy;

        let err = CallgrindStrategy::from_config(&config, Arc::new(ScriptedRunner::new()))
            .err()
            .unwrap();

        assert!(matches!(err, ReproError::Config(ConfigError::InvalidField { .. })));
    }

    #[test]
    fn test_extract_chains_outermost_first() {
        let call_line = Regex::new(CALL_LINE).unwrap();
        let chains = extract_call_chains(ANNOTATED, &call_line);

        assert_eq!(
            chains,
            vec![
                "main-->vm_run-->vm_loop",
                "vm_loop-->ecma_free_unused_memory-->ecma_gc_run.lto_priv.0",
                "_start",
            ]
        );
    }

    #[test]
    fn test_render_block_strips_private_suffix() {
        let s = strategy(Arc::new(ScriptedRunner::new()));

        assert_eq!(
            s.render_block(ANNOTATED),
            "## START PROGRAM\n\
             main-->vm_run-->vm_loop\n\
             vm_loop-->ecma_free_unused_memory-->ecma_gc_run\n\
             _start\n\
             ## QUIT PROGRAM\n"
        );
    }

    #[test]
    fn test_empty_annotation_yields_empty_block() {
        let s = strategy(Arc::new(ScriptedRunner::new()));
        assert_eq!(s.render_block(""), "## START PROGRAM\n## QUIT PROGRAM\n");
    }

    #[test]
    fn test_strip_is_idempotent_on_nested_suffixes() {
        let pattern = Regex::new(r"\.lto_priv\.[0-9]+").unwrap();

        let once = strip_private_suffixes("f.lto_priv.lto_priv.1.2-->g", &pattern);
        let twice = strip_private_suffixes(&once, &pattern);

        assert_eq!(once, "f-->g");
        assert_eq!(once, twice);
        assert_eq!(strip_private_suffixes("plain", &pattern), "plain");
    }

    #[tokio::test]
    async fn test_execute_runs_profiler_then_annotate() {
        let runner = Arc::new(
            ScriptedRunner::new().on("callgrind_annotate", testing::print_stdout(ANNOTATED)),
        );
        let s = strategy(runner.clone());
        let work = tempfile::tempdir().unwrap();

        let execution = s
            .execute(
                Path::new("/w/bin/jerry-i42nt-bug"),
                Path::new("temp.js"),
                work.path(),
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        assert!(execution.passed());
        assert!(execution.chains.unwrap().contains("main-->vm_run-->vm_loop"));

        let calls = runner.invocations();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].program_name(), "valgrind");
        assert!(calls[0].args.contains(&"--separate-callers=1000".to_string()));
        assert!(calls[0].args.contains(&"--skip-direct-rec=no".to_string()));
        assert_eq!(
            calls[0].args[6..].to_vec(),
            vec!["/w/bin/jerry-i42nt-bug".to_string(), "temp.js".to_string()]
        );
        assert_eq!(calls[1].args[0], "--threshold=100");
        assert!(calls[1].capture_stdout);
    }

    #[tokio::test]
    async fn test_profiler_timeout_skips_annotate() {
        let runner = Arc::new(ScriptedRunner::new().on("valgrind", testing::time_out()));
        let s = strategy(runner.clone());
        let work = tempfile::tempdir().unwrap();

        let execution = s
            .execute(Path::new("/b"), Path::new("t.js"), work.path(), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(execution.timed_out);
        assert_eq!(runner.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_annotate_failure() {
        let runner = Arc::new(ScriptedRunner::new().on("callgrind_annotate", testing::exit_with(2)));
        let s = strategy(runner);
        let work = tempfile::tempdir().unwrap();

        let err = s
            .execute(Path::new("/b"), Path::new("t.js"), work.path(), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ReproError::TraceFailed { .. }));
    }

    #[tokio::test]
    async fn test_finish_concatenates_blocks() {
        let s = strategy(Arc::new(ScriptedRunner::new()));
        let work = tempfile::tempdir().unwrap();
        let target = work.path().join("jerry-1-bug.cgt");

        s.finish(work.path(), &["A\n".to_string(), "B\n".to_string()], &target)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(target).unwrap(), "A\nB\n");
    }
}
