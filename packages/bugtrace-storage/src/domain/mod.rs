//! Domain layer for the artifact store
//!
//! # Core Principles
//!
//! 1. **Existence is the cache**: a key that exists is never rebuilt
//! 2. **No partial artifacts**: `publish` makes a key visible only once its
//!    content is complete
//! 3. **Stable keys**: every key is derived from `{record_id}-{variant}`, so
//!    no artifact is shared across bug entries
//!
//! # Port Trait
//!
//! - `ArtifactStore`: `exists` / `publish` / `locate`

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Result, StorageError};

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// What an artifact is, as far as publishing is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Instrumented executable (published with rwxr-xr-x)
    Binary,
    /// Tracer/profiler output, relocated to its artifact name
    RawTrace,
    /// Intermediate graph JSON produced by the first converter step
    GraphJson,
    /// Address-to-symbol map derived from a binary
    SymbolMap,
    /// Final compressed call graph (`.dynamic.graphml.gz`)
    Graph,
    /// Pass/fail ledger of a regression-suite run
    Ledger,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Binary => "binary",
            ArtifactKind::RawTrace => "raw_trace",
            ArtifactKind::GraphJson => "graph_json",
            ArtifactKind::SymbolMap => "symbol_map",
            ArtifactKind::Graph => "graph",
            ArtifactKind::Ledger => "ledger",
        }
    }

    /// Whether a published artifact of this kind must be executable
    pub fn is_executable(&self) -> bool {
        matches!(self, ArtifactKind::Binary)
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Store-relative artifact key
///
/// Keys are relative, `/`-separated paths such as `bin/jerry-i42nt-bug` or
/// `jerry-i42nt-bug.dynamic.graphml.gz`. They cannot be absolute and cannot
/// contain `..`, so every key stays inside the store root.
///
/// # Examples
///
/// ```rust
/// use bugtrace_storage::{ArtifactKey, ArtifactKind};
///
/// let key = ArtifactKey::new(ArtifactKind::Binary, "bin/jerry-i42nt-bug").unwrap();
/// assert_eq!(key.file_name(), "jerry-i42nt-bug");
/// assert!(ArtifactKey::new(ArtifactKind::Binary, "../jerry").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    kind: ArtifactKind,
    path: String,
}

impl ArtifactKey {
    pub fn new(kind: ArtifactKind, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(StorageError::invalid_key(path, "key is empty"));
        }
        for component in Path::new(&path).components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(StorageError::invalid_key(
                        path,
                        "parent components are not allowed",
                    ))
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::invalid_key(path, "key must be relative"))
                }
            }
        }
        Ok(Self { kind, path })
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Last path component (`bin/jerry-i42-bug` -> `jerry-i42-bug`)
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Resolve against a store root
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(&self.path)
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait: ArtifactStore
// ═══════════════════════════════════════════════════════════════════════════

/// Artifact storage abstraction
///
/// # Implementations
///
/// - `FsArtifactStore`: artifacts are files under a root directory
/// - `InMemoryArtifactStore`: artifacts are byte buffers (tests)
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Filesystem location of `key`.
    ///
    /// Stages that hand artifacts to external tools need a path even when
    /// the store is not filesystem-backed; in-memory stores return a
    /// virtual path under their nominal root.
    fn locate(&self, key: &ArtifactKey) -> PathBuf;

    /// Whether `key` has been published
    async fn exists(&self, key: &ArtifactKey) -> bool;

    /// Publish `data` under `key`, replacing any previous content.
    ///
    /// The key only becomes visible to `exists` once the full content is in
    /// place. Returns the artifact location.
    async fn publish(&self, key: &ArtifactKey, data: &[u8]) -> Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_accepts_nested_relative_paths() {
        let key = ArtifactKey::new(ArtifactKind::Binary, "bin/jerry-i42nt-bug").unwrap();
        assert_eq!(key.as_str(), "bin/jerry-i42nt-bug");
        assert_eq!(key.file_name(), "jerry-i42nt-bug");
        assert_eq!(key.kind(), ArtifactKind::Binary);
        assert_eq!(
            key.resolve(Path::new("/work")),
            PathBuf::from("/work/bin/jerry-i42nt-bug")
        );
    }

    #[test]
    fn test_key_rejects_escaping_paths() {
        assert!(ArtifactKey::new(ArtifactKind::Graph, "").is_err());
        assert!(ArtifactKey::new(ArtifactKind::Graph, "/etc/passwd").is_err());
        assert!(ArtifactKey::new(ArtifactKind::Graph, "bin/../../x").is_err());
    }

    #[test]
    fn test_only_binaries_are_executable() {
        assert!(ArtifactKind::Binary.is_executable());
        assert!(!ArtifactKind::Graph.is_executable());
        assert!(!ArtifactKind::RawTrace.is_executable());
    }

    #[test]
    fn test_file_name_without_directory() {
        let key = ArtifactKey::new(ArtifactKind::Graph, "jerry-1234-fix.dynamic.graphml.gz").unwrap();
        assert_eq!(key.file_name(), "jerry-1234-fix.dynamic.graphml.gz");
        assert_eq!(key.to_string(), "jerry-1234-fix.dynamic.graphml.gz");
    }
}
