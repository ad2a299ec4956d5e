//! Pipeline configuration
//!
//! Two levels:
//! - Preset: one of three complete configurations
//! - YAML v1: a preset plus per-section overrides
//!
//! # Examples
//!
//! ```rust,ignore
//! use bugtrace_orchestration::config::{PipelineConfig, Preset};
//!
//! let mut config = PipelineConfig::preset(Preset::Callgrind);
//! config.tracer.timeout_secs = 60;
//!
//! let config = PipelineConfig::from_yaml("jerry-callgrind.yaml")?;
//! ```

pub mod error;
pub mod io;
pub mod preset;
pub mod sections;

use std::path::Path;

use chrono::format::{Item, StrftimeItems};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use error::{ConfigError, ConfigResult};
pub use io::{ConfigExportV1, ConfigOverrides};
pub use preset::Preset;
pub use sections::{
    BuildConfig, ConverterConfig, Instrumentation, LogConfig, MissingToolPolicy, NamingConfig,
    PathsConfig, SuiteConfig, TraceStrategyConfig, TracerConfig,
};

const SUPPORTED_VERSIONS: &[u32] = &[1];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub preset: Preset,
    pub paths: PathsConfig,
    pub naming: NamingConfig,
    pub build: BuildConfig,
    pub tracer: TracerConfig,
    pub converter: ConverterConfig,
    pub log: LogConfig,
}

impl PipelineConfig {
    pub fn preset(preset: Preset) -> Self {
        let (naming, build, tracer, converter, log) = sections::preset_sections(preset);
        Self {
            preset,
            paths: PathsConfig::default(),
            naming,
            build,
            tracer,
            converter,
            log,
        }
    }

    /// Load a v1 YAML file and validate the result
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let export: ConfigExportV1 = serde_yaml::from_str(&content)?;

        match export.version {
            None => return Err(ConfigError::MissingVersion),
            Some(found) if !SUPPORTED_VERSIONS.contains(&found) => {
                return Err(ConfigError::UnsupportedVersion {
                    found,
                    supported: SUPPORTED_VERSIONS.to_vec(),
                })
            }
            Some(_) => {}
        }

        let mut config = Self::preset(Preset::from_str(&export.preset)?);
        if let Some(overrides) = export.overrides {
            config.paths = overlay(&config.paths, overrides.paths)?;
            config.naming = overlay(&config.naming, overrides.naming)?;
            config.build = overlay(&config.build, overrides.build)?;
            config.tracer = overlay(&config.tracer, overrides.tracer)?;
            config.converter = overlay(&config.converter, overrides.converter)?;
            config.log = overlay(&config.log, overrides.log)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Export as a v1 YAML document with every section spelled out
    pub fn to_yaml(&self) -> ConfigResult<String> {
        let export = ConfigExportV1 {
            version: Some(1),
            preset: self.preset.as_str().to_string(),
            overrides: Some(ConfigOverrides {
                paths: Some(serde_yaml::to_value(&self.paths)?),
                naming: Some(serde_yaml::to_value(&self.naming)?),
                build: Some(serde_yaml::to_value(&self.build)?),
                tracer: Some(serde_yaml::to_value(&self.tracer)?),
                converter: Some(serde_yaml::to_value(&self.converter)?),
                log: Some(serde_yaml::to_value(&self.log)?),
            }),
        };
        Ok(serde_yaml::to_string(&export)?)
    }

    /// Make every relative root absolute against `base` (normally the cwd)
    pub fn resolve_paths(&mut self, base: &Path) {
        self.paths.resolve_against(base);
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.tracer.timeout_secs == 0 {
            return Err(ConfigError::invalid_field(
                "tracer.timeout_secs",
                "must be greater than zero",
            ));
        }
        if !self.tracer.trace_extension.starts_with('.') {
            return Err(ConfigError::invalid_field(
                "tracer.trace_extension",
                format!("'{}' must start with '.'", self.tracer.trace_extension),
            ));
        }
        if self.tracer.inline_input_name.trim().is_empty() {
            return Err(ConfigError::invalid_field(
                "tracer.inline_input_name",
                "must not be empty",
            ));
        }
        if self.build.default_command.trim().is_empty() {
            return Err(ConfigError::invalid_field(
                "build.default_command",
                "must not be empty",
            ));
        }
        for (field, value) in [
            ("build.interpreter", self.build.interpreter.as_os_str().is_empty()),
            ("converter.chain_tool", self.converter.chain_tool.is_empty()),
            ("converter.graph_formatter", self.converter.graph_formatter.is_empty()),
        ] {
            if value {
                return Err(ConfigError::invalid_field(field, "must not be empty"));
            }
        }

        if self.log.file_template.trim().is_empty() {
            return Err(ConfigError::invalid_field("log.file_template", "must not be empty"));
        }
        if StrftimeItems::new(&self.log.file_template).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::invalid_field(
                "log.file_template",
                format!("'{}' is not a valid strftime format", self.log.file_template),
            ));
        }

        compile_pattern("naming.id_pattern", &self.naming.id_pattern)?;
        if let Some(suite) = &self.tracer.suite {
            compile_pattern("tracer.suite.pattern", &suite.pattern)?;
        }
        if let TraceStrategyConfig::Callgrind {
            private_symbol_pattern,
            ..
        } = &self.tracer.strategy
        {
            compile_pattern("tracer.strategy.private_symbol_pattern", private_symbol_pattern)?;
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::preset(Preset::default())
    }
}

pub(crate) fn compile_pattern(field: &str, pattern: &str) -> ConfigResult<Regex> {
    Regex::new(pattern).map_err(|e| ConfigError::pattern(field, e))
}

fn overlay<T>(base: &T, patch: Option<serde_yaml::Value>) -> ConfigResult<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    let Some(patch) = patch else {
        return Ok(base.clone());
    };
    let mut value = serde_yaml::to_value(base)?;
    io::merge_value(&mut value, patch);
    Ok(serde_yaml::from_value(value)?)
}
