//! Configuration I/O (YAML loading)
//!
//! A file names a base preset and may override any section. Overrides are
//! merged field by field over the preset's section, so a file only spells
//! out what differs:
//!
//! ```yaml
//! version: 1
//! preset: callgrind
//! overrides:
//!   tracer:
//!     timeout_secs: 60
//!   paths:
//!     workspace_root: /scratch/jerry-workspaces
//! ```

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// YAML Schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigExportV1 {
    /// Schema version (always 1 for v1)
    pub version: Option<u32>,

    /// Base preset
    pub preset: String,

    /// Per-section overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<ConfigOverrides>,
}

/// Section overrides, kept as raw YAML until merged over the preset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracer: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<Value>,
}

/// Merge `patch` into `base`.
///
/// Mappings merge key by key. A mapping carrying a `kind` tag switches
/// variant and replaces the base mapping outright; every other value
/// replaces.
pub(super) fn merge_value(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Mapping(base_map), Value::Mapping(patch_map)) => {
            let switches_variant = patch_map
                .get("kind")
                .is_some_and(|kind| base_map.get("kind") != Some(kind));
            if switches_variant {
                *base_map = patch_map;
                return;
            }
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::error::ConfigError;
    use crate::config::sections::{Instrumentation, TraceStrategyConfig};
    use crate::config::{PipelineConfig, Preset};
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn write_yaml(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = PipelineConfig::preset(Preset::FunctionTrace);

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert!(yaml.contains("preset: function-trace"));
        assert!(yaml.contains("tracerB"));
    }

    #[test]
    fn test_yaml_overrides_merge_field_by_field() {
        let file = write_yaml(
            r#"
version: 1
preset: callgrind
overrides:
  tracer:
    timeout_secs: 90
  paths:
    workspace_root: /scratch
"#,
        );

        let config = PipelineConfig::from_yaml(file.path()).unwrap();

        assert_eq!(config.preset, Preset::Callgrind);
        assert_eq!(config.tracer.timeout_secs, 90);
        assert_eq!(config.tracer.trace_extension, ".cgt");
        assert!(matches!(
            config.tracer.strategy,
            TraceStrategyConfig::Callgrind { .. }
        ));
        assert_eq!(config.paths.workspace_root, PathBuf::from("/scratch"));
        assert_eq!(config.paths.output_dir, PathBuf::from("."));
    }

    #[test]
    fn test_yaml_variant_switch_replaces_section_value() {
        let file = write_yaml(
            r#"
version: 1
preset: callgrind
overrides:
  build:
    instrumentation:
      kind: function-hooks
      tracer_object: tracerB
      m32_marker: --compile-flag=-m32
      link_lib: -lm
"#,
        );

        let config = PipelineConfig::from_yaml(file.path()).unwrap();
        assert!(matches!(
            config.build.instrumentation,
            Instrumentation::FunctionHooks { ref tracer_object, .. } if tracer_object == "tracerB"
        ));
    }

    #[test]
    fn test_yaml_missing_version() {
        let file = write_yaml("preset: callgrind\n");

        let result = PipelineConfig::from_yaml(file.path());
        assert!(matches!(result, Err(ConfigError::MissingVersion)));
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let file = write_yaml("version: 2\npreset: callgrind\n");

        let result = PipelineConfig::from_yaml(file.path());
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::UnsupportedVersion { found: 2, .. }
        ));
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let file = write_yaml(
            r#"
version: 1
preset: callgrind
overrides:
  tracer:
    timeout: 10
"#,
        );

        assert!(matches!(
            PipelineConfig::from_yaml(file.path()),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_yaml_unknown_preset() {
        let file = write_yaml("version: 1\npreset: gdb\n");

        assert!(matches!(
            PipelineConfig::from_yaml(file.path()),
            Err(ConfigError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_merge_value_nested() {
        let mut base: Value = serde_yaml::from_str("a: {b: 1, c: 2}\nd: [1]").unwrap();
        let patch: Value = serde_yaml::from_str("a: {c: 3}\nd: [4, 5]").unwrap();

        merge_value(&mut base, patch);

        let expected: Value = serde_yaml::from_str("a: {b: 1, c: 3}\nd: [4, 5]").unwrap();
        assert_eq!(base, expected);
    }
}
