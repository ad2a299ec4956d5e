//! Instrumented build
//!
//! Runs the revision's own build script in a fresh `{workspace}-build`
//! directory and publishes the resulting executable. The script's exit code
//! is not trusted either way: the build counts as successful exactly when
//! the expected executable exists afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bugtrace_storage::ArtifactStore;
use regex::Regex;
use tracing::{info, warn};

use crate::config::{BuildConfig, Instrumentation, MissingToolPolicy};
use crate::database::BuildOverride;
use crate::error::{ReproError, Result};
use crate::layout::PassLayout;
use crate::pipeline::BuildStage;
use crate::process::{CommandSpec, ProcessRunner};

const ASAN_FLAG: &str = "-fsanitize=address";

pub struct InstrumentedBuilder {
    config: BuildConfig,
    /// Source of fallback tools and tracer objects
    repo_dir: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    store: Arc<dyn ArtifactStore>,
    /// Line continuations (`\` + newline, CRLF) collapse to one space
    continuation: Regex,
}

impl InstrumentedBuilder {
    pub fn new(
        config: BuildConfig,
        repo_dir: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self> {
        let continuation = Regex::new(r"( |\\|\r)*\n")
            .map_err(|e| crate::config::ConfigError::pattern("build.continuation", e))?;
        Ok(Self {
            config,
            repo_dir: repo_dir.into(),
            runner,
            store,
            continuation,
        })
    }

    /// Command line for a record: `bld_cmd`, else the `bld_typ` alias, else
    /// the default. Unknown aliases fall back to the default.
    pub fn resolve_command(&self, build: &BuildOverride) -> String {
        let command = match build {
            BuildOverride::Command(command) => command.as_str(),
            BuildOverride::Alias(alias) => match self.config.command_aliases.get(alias) {
                Some(command) => command.as_str(),
                None => {
                    warn!(alias = %alias, "Unknown build type, using default command");
                    self.config.default_command.as_str()
                }
            },
            BuildOverride::None => self.config.default_command.as_str(),
        };
        self.continuation.replace_all(command, " ").into_owned()
    }

    /// Full build invocation for `command_line` into `build_dir`
    pub fn invocation(&self, command_line: &str, workspace: &Path, build_dir: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.config.interpreter)
            .args(command_line.split_whitespace())
            .arg(format!("--builddir={}", build_dir.display()))
            .current_dir(workspace);

        if let Instrumentation::FunctionHooks {
            tracer_object,
            m32_marker,
            link_lib,
        } = &self.config.instrumentation
        {
            let object = if command_line.contains(m32_marker.as_str()) {
                format!("{}-m32.o", tracer_object)
            } else {
                format!("{}.o", tracer_object)
            };
            spec = spec.args([
                "--compile-flag=-finstrument-functions".to_string(),
                format!("--linker-flag={}", self.repo_dir.join(object).display()),
                format!("--link-lib={}", link_lib),
            ]);
        }

        spec = spec.args(self.config.warning_flags.iter().cloned());

        if self.config.static_link && !command_line.contains(ASAN_FLAG) {
            spec = spec.arg("--linker-flag=-static");
        }
        spec
    }

    async fn ensure_build_tool(&self, workspace: &Path) -> Result<()> {
        let tool = workspace.join(&self.config.tool);
        if is_file(&tool).await {
            return Ok(());
        }

        match self.config.missing_tool {
            MissingToolPolicy::Fail => Err(ReproError::MissingBuildTool {
                tool: self.config.tool.clone(),
                workspace: workspace.to_path_buf(),
            }),
            MissingToolPolicy::CopyFallback => {
                for file in &self.config.fallback_files {
                    let source = self.repo_dir.join(file);
                    if !is_file(&source).await {
                        return Err(ReproError::MissingBuildTool {
                            tool: file.clone(),
                            workspace: workspace.to_path_buf(),
                        });
                    }
                    let target = workspace.join(file);
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::copy(&source, &target).await?;
                }
                warn!(
                    workspace = %workspace.display(),
                    tool = %self.config.tool.display(),
                    "Build tool missing, copied fallback"
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl BuildStage for InstrumentedBuilder {
    async fn build(&self, layout: &PassLayout, build: &BuildOverride) -> Result<PathBuf> {
        self.ensure_build_tool(&layout.workspace_dir).await?;

        // Leftovers of an earlier failed build must not satisfy the check below
        if tokio::fs::try_exists(&layout.build_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&layout.build_dir).await?;
        }

        let command_line = self.resolve_command(build);
        let spec = self.invocation(&command_line, &layout.workspace_dir, &layout.build_dir);
        info!(pass = %layout.pass_name(), command = %spec, "Building");

        match self.runner.run(&spec, None).await {
            Ok(output) if !output.success() => {
                warn!(exit_code = ?output.exit_code, "Build script exited with failure status");
            }
            Ok(_) => {}
            Err(e) => return Err(ReproError::build_failed(&layout.build_dir, e)),
        }

        let built = layout.build_dir.join(&self.config.built_binary);
        if !is_file(&built).await {
            return Err(ReproError::build_failed(
                &layout.build_dir,
                format!("{} was not produced", built.display()),
            ));
        }

        let bytes = tokio::fs::read(&built).await?;
        let target = self.store.publish(&layout.binary, &bytes).await?;
        tokio::fs::remove_dir_all(&layout.build_dir).await?;

        info!(binary = %target.display(), "Published binary");
        Ok(target)
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
