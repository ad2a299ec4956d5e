//! Per-stage configuration sections

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::preset::Preset;

/// Filesystem roots
///
/// Relative paths are resolved against the invocation directory by
/// [`PipelineConfig::resolve_paths`](super::PipelineConfig::resolve_paths).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Checkout of the project under test (revision source, fallback tools,
    /// tracer objects, regression suite)
    pub repo_dir: PathBuf,
    /// Parent directory for per-pass workspaces and build directories
    pub workspace_root: PathBuf,
    /// Artifact store root; external tools run here
    pub output_dir: PathBuf,
    /// Directory holding the converter programs
    pub converter_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from("."),
            workspace_root: PathBuf::from(".."),
            output_dir: PathBuf::from("."),
            converter_dir: PathBuf::from(".."),
        }
    }
}

impl PathsConfig {
    pub fn resolve_against(&mut self, base: &Path) {
        for path in [
            &mut self.repo_dir,
            &mut self.workspace_root,
            &mut self.output_dir,
            &mut self.converter_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Artifact and workspace naming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamingConfig {
    /// Prefix of published binaries (`jerry-` in `bin/jerry-i42nt-bug`)
    pub binary_prefix: String,
    /// Prefix of workspace directories (`js-` in `js-i42nt-bug`)
    pub workspace_prefix: String,
    /// Store directory for binaries
    pub binary_dir: String,
    /// Suffix appended to every record id (`nt` in `i42nt`)
    pub tag: String,
    /// Extension of the revision archive next to each workspace
    pub archive_extension: String,
    /// Captures the record id from a test file name
    pub id_pattern: String,
}

impl NamingConfig {
    fn for_preset(preset: Preset) -> Self {
        Self {
            binary_prefix: "jerry-".to_string(),
            workspace_prefix: "js-".to_string(),
            binary_dir: "bin".to_string(),
            tag: match preset {
                Preset::Callgrind => "nt".to_string(),
                Preset::FunctionTrace | Preset::RegressionSuite => String::new(),
            },
            archive_extension: "tar".to_string(),
            id_pattern: r"^regression-test-issues?-(.*)\.js$".to_string(),
        }
    }
}

/// Build-time instrumentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum Instrumentation {
    /// Plain build (the profiler observes the binary from outside)
    None,
    /// Compile with `-finstrument-functions` and link a hook object
    FunctionHooks {
        /// Object file base name in the repo dir (`tracerB` -> `tracerB.o`)
        tracer_object: String,
        /// Build argument that selects the 32-bit object (`tracerB-m32.o`)
        m32_marker: String,
        /// Extra library the hook object needs
        link_lib: String,
    },
}

/// What to do when a materialized revision has no build tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingToolPolicy {
    Fail,
    /// Copy `fallback_files` from the repo dir into the workspace
    CopyFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub interpreter: PathBuf,
    /// Build script, relative to the workspace
    pub tool: PathBuf,
    /// Command used when a record names neither `bld_cmd` nor `bld_typ`
    pub default_command: String,
    /// `bld_typ` value -> command
    pub command_aliases: BTreeMap<String, String>,
    pub warning_flags: Vec<String>,
    /// Append `--linker-flag=-static` unless the command enables ASan
    pub static_link: bool,
    /// Where the build leaves the executable, relative to the build dir
    pub built_binary: PathBuf,
    pub instrumentation: Instrumentation,
    pub missing_tool: MissingToolPolicy,
    /// Copied from the repo dir when `missing_tool` is `copy-fallback`
    pub fallback_files: Vec<PathBuf>,
}

impl BuildConfig {
    fn for_preset(preset: Preset) -> Self {
        let disable_warnings = vec![
            "--compile-flag=-Wno-return-type".to_string(),
            "--compile-flag=-Wno-implicit-fallthrough".to_string(),
        ];
        let hooks = |object: &str| Instrumentation::FunctionHooks {
            tracer_object: object.to_string(),
            m32_marker: "--compile-flag=-m32".to_string(),
            link_lib: "-lm".to_string(),
        };
        let aliases = BTreeMap::from([(
            "debug.linux".to_string(),
            "./tools/build.py --clean --debug".to_string(),
        )]);

        match preset {
            Preset::Callgrind => Self {
                default_command: "./tools/build.py --debug".to_string(),
                command_aliases: aliases,
                warning_flags: disable_warnings,
                instrumentation: Instrumentation::None,
                missing_tool: MissingToolPolicy::CopyFallback,
                ..Self::base()
            },
            Preset::FunctionTrace => Self {
                default_command: "./tools/build.py --debug".to_string(),
                command_aliases: aliases,
                warning_flags: disable_warnings,
                static_link: true,
                instrumentation: hooks("tracerB"),
                ..Self::base()
            },
            Preset::RegressionSuite => Self {
                default_command: "./tools/build.py --clean --debug --jerry-libc=OFF --jerry-libm=OFF --jerry-ext=OFF".to_string(),
                instrumentation: hooks("tracer"),
                ..Self::base()
            },
        }
    }

    fn base() -> Self {
        Self {
            interpreter: PathBuf::from("/usr/bin/python3"),
            tool: PathBuf::from("tools/build.py"),
            default_command: "./tools/build.py --debug".to_string(),
            command_aliases: BTreeMap::new(),
            warning_flags: Vec::new(),
            static_link: false,
            built_binary: PathBuf::from("bin/jerry"),
            instrumentation: Instrumentation::None,
            missing_tool: MissingToolPolicy::Fail,
            fallback_files: vec![
                PathBuf::from("tools/build.py"),
                PathBuf::from("tools/settings.py"),
            ],
        }
    }
}

/// How a binary is observed while it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum TraceStrategyConfig {
    /// The instrumented binary writes `trace_file` into the working directory
    FunctionCall { trace_file: String },
    /// Run under `valgrind --tool=callgrind`, then flatten `callgrind_annotate`
    Callgrind {
        valgrind: PathBuf,
        annotate: PathBuf,
        separate_callers: u32,
        separate_recs: u32,
        threshold: u32,
        /// Symbol decoration to strip (`.lto_priv.N`)
        private_symbol_pattern: String,
    },
}

/// Regression-suite mode: run every matching test instead of one input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    /// Test root, relative to the repo dir
    pub dir: PathBuf,
    /// File-name pattern of runnable tests
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TracerConfig {
    pub timeout_secs: u64,
    /// Raw trace extension, leading dot included
    pub trace_extension: String,
    /// File an inline test case is written to before each run
    pub inline_input_name: String,
    pub strategy: TraceStrategyConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<SuiteConfig>,
}

impl TracerConfig {
    fn for_preset(preset: Preset) -> Self {
        let base = Self {
            timeout_secs: 30,
            trace_extension: ".bchains".to_string(),
            inline_input_name: "temp.js".to_string(),
            strategy: TraceStrategyConfig::FunctionCall {
                trace_file: "tracer.bchains".to_string(),
            },
            suite: None,
        };

        match preset {
            Preset::Callgrind => Self {
                trace_extension: ".cgt".to_string(),
                strategy: TraceStrategyConfig::Callgrind {
                    valgrind: PathBuf::from("valgrind"),
                    annotate: PathBuf::from("callgrind_annotate"),
                    separate_callers: 1000,
                    separate_recs: 1000,
                    threshold: 100,
                    private_symbol_pattern: r"\.lto_priv\.[0-9]+".to_string(),
                },
                ..base
            },
            Preset::FunctionTrace => base,
            Preset::RegressionSuite => Self {
                trace_extension: ".trc".to_string(),
                strategy: TraceStrategyConfig::FunctionCall {
                    trace_file: "tracer.trc".to_string(),
                },
                suite: Some(SuiteConfig {
                    dir: PathBuf::from("tests/jerry"),
                    pattern: r"^(.*)\.js$".to_string(),
                }),
                ..base
            },
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// External converter programs, resolved against `paths.converter_dir`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConverterConfig {
    pub chain_tool: String,
    pub chain_args: Vec<String>,
    /// Address-to-symbol mapper; skipped when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_mapper: Option<String>,
    pub graph_formatter: String,
}

impl ConverterConfig {
    fn for_preset(preset: Preset) -> Self {
        let args = |list: &[&str]| list.iter().map(|a| a.to_string()).collect();
        match preset {
            Preset::Callgrind => Self {
                chain_tool: "chain-to-graph.py".to_string(),
                chain_args: args(&["-m", "-g"]),
                symbol_mapper: None,
                graph_formatter: "convert-graph-formats.py".to_string(),
            },
            Preset::FunctionTrace => Self {
                chain_tool: "chain-to-graph.py".to_string(),
                chain_args: args(&["-b", "-m", "-g"]),
                symbol_mapper: Some("elf-to-map.py".to_string()),
                graph_formatter: "convert-graph-formats.py".to_string(),
            },
            Preset::RegressionSuite => Self {
                chain_tool: "trace-to-graph.py".to_string(),
                chain_args: args(&["-m", "-g", "-d", "-c"]),
                symbol_mapper: Some("elf-to-map.py".to_string()),
                graph_formatter: "convert-graph-formats.py".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// strftime template of the per-run failure log
    pub file_template: String,
    /// Set the terminal title to `{record_id}::{variant}` per pass
    pub terminal_title: bool,
}

impl LogConfig {
    fn for_preset(preset: Preset) -> Self {
        Self {
            file_template: match preset {
                Preset::Callgrind => "build-nt-%Y%m%d-%H%M%S.log".to_string(),
                _ => "build-%Y%m%d-%H%M%S.log".to_string(),
            },
            terminal_title: true,
        }
    }
}

/// All sections of a preset
pub(super) fn preset_sections(
    preset: Preset,
) -> (
    NamingConfig,
    BuildConfig,
    TracerConfig,
    ConverterConfig,
    LogConfig,
) {
    (
        NamingConfig::for_preset(preset),
        BuildConfig::for_preset(preset),
        TracerConfig::for_preset(preset),
        ConverterConfig::for_preset(preset),
        LogConfig::for_preset(preset),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callgrind_build_is_uninstrumented() {
        let build = BuildConfig::for_preset(Preset::Callgrind);
        assert_eq!(build.instrumentation, Instrumentation::None);
        assert!(!build.static_link);
        assert_eq!(build.missing_tool, MissingToolPolicy::CopyFallback);
        assert_eq!(
            build.command_aliases.get("debug.linux").map(String::as_str),
            Some("./tools/build.py --clean --debug")
        );
    }

    #[test]
    fn test_regression_suite_runs_tests_dir() {
        let tracer = TracerConfig::for_preset(Preset::RegressionSuite);
        let suite = tracer.suite.unwrap();
        assert_eq!(suite.dir, PathBuf::from("tests/jerry"));
        assert_eq!(tracer.trace_extension, ".trc");
    }

    #[test]
    fn test_paths_resolve_only_relative() {
        let mut paths = PathsConfig {
            repo_dir: PathBuf::from("."),
            workspace_root: PathBuf::from("/abs/ws"),
            output_dir: PathBuf::from("out"),
            converter_dir: PathBuf::from(".."),
        };
        paths.resolve_against(Path::new("/home/u/jerryscript"));

        assert_eq!(paths.repo_dir, PathBuf::from("/home/u/jerryscript/."));
        assert_eq!(paths.workspace_root, PathBuf::from("/abs/ws"));
        assert_eq!(paths.output_dir, PathBuf::from("/home/u/jerryscript/out"));
    }
}
