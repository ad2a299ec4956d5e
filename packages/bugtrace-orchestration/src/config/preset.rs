//! Preset configurations
//!
//! Presets provide complete default configurations for the three ways the
//! pipeline has been driven.

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};

/// Configuration preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Uninstrumented build, traced under the callgrind profiler
    ///
    /// - Missing build tool: copied from the orchestration checkout
    /// - Warning suppression flags
    /// - Trace file extension `.cgt`, run log `build-nt-%Y%m%d-%H%M%S.log`
    Callgrind,

    /// Build linked against a function-entry/exit hook object
    ///
    /// - `-finstrument-functions` + `tracerB.o` (`tracerB-m32.o` for 32-bit)
    /// - Warning suppression flags, static link unless ASan
    /// - The binary writes its own trace file
    FunctionTrace,

    /// Debug build with hooks, run against every regression test
    ///
    /// - `--clean --debug`, libc/libm/ext disabled
    /// - Pass/fail ledger per binary
    RegressionSuite,
}

impl Preset {
    /// Parse preset from string
    pub fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "callgrind" => Ok(Self::Callgrind),
            "function-trace" => Ok(Self::FunctionTrace),
            "regression-suite" => Ok(Self::RegressionSuite),
            _ => Err(ConfigError::UnknownPreset(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Callgrind => "callgrind",
            Self::FunctionTrace => "function-trace",
            Self::RegressionSuite => "regression-suite",
        }
    }
}

impl Default for Preset {
    fn default() -> Self {
        Self::Callgrind
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_from_str() {
        assert_eq!(Preset::from_str("callgrind").unwrap(), Preset::Callgrind);
        assert_eq!(Preset::from_str("Function-Trace").unwrap(), Preset::FunctionTrace);
        assert_eq!(
            Preset::from_str("regression-suite").unwrap(),
            Preset::RegressionSuite
        );
        assert!(matches!(
            Preset::from_str("valgrind"),
            Err(ConfigError::UnknownPreset(name)) if name == "valgrind"
        ));
    }

    #[test]
    fn test_preset_display_roundtrip() {
        for preset in [Preset::Callgrind, Preset::FunctionTrace, Preset::RegressionSuite] {
            assert_eq!(Preset::from_str(&preset.to_string()).unwrap(), preset);
        }
    }

    #[test]
    fn test_default_is_callgrind() {
        assert_eq!(Preset::default(), Preset::Callgrind);
    }
}
