//! In-memory adapter for ArtifactStore (tests and dry runs)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{ArtifactKey, ArtifactKind, ArtifactStore};
use crate::Result;

#[derive(Debug, Clone)]
struct StoredArtifact {
    kind: ArtifactKind,
    data: Vec<u8>,
}

/// Artifact store backed by a map of key -> bytes
///
/// `locate` returns paths under a nominal root that never touches disk.
#[derive(Clone)]
pub struct InMemoryArtifactStore {
    root: PathBuf,
    artifacts: Arc<Mutex<BTreeMap<String, StoredArtifact>>>,
}

impl InMemoryArtifactStore {
    pub fn new_in_memory() -> Self {
        Self::with_root("/in-memory")
    }

    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            artifacts: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Seed an artifact without going through `publish`
    pub fn insert(&self, key: &ArtifactKey, data: impl Into<Vec<u8>>) {
        self.artifacts.lock().insert(
            key.as_str().to_string(),
            StoredArtifact {
                kind: key.kind(),
                data: data.into(),
            },
        );
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<Vec<u8>> {
        self.artifacts
            .lock()
            .get(key.as_str())
            .map(|artifact| artifact.data.clone())
    }

    /// All published keys in lexical order
    pub fn keys(&self) -> Vec<String> {
        self.artifacts.lock().keys().cloned().collect()
    }

    pub fn count_of(&self, kind: ArtifactKind) -> usize {
        self.artifacts
            .lock()
            .values()
            .filter(|artifact| artifact.kind == kind)
            .count()
    }
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    fn locate(&self, key: &ArtifactKey) -> PathBuf {
        key.resolve(&self.root)
    }

    async fn exists(&self, key: &ArtifactKey) -> bool {
        self.artifacts.lock().contains_key(key.as_str())
    }

    async fn publish(&self, key: &ArtifactKey, data: &[u8]) -> Result<PathBuf> {
        self.insert(key, data);
        Ok(self.locate(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_then_exists() {
        let store = InMemoryArtifactStore::new_in_memory();
        let key = ArtifactKey::new(ArtifactKind::Binary, "bin/jerry-i1-bug").unwrap();

        assert!(!store.exists(&key).await);
        let location = store.publish(&key, b"elf").await.unwrap();

        assert!(store.exists(&key).await);
        assert_eq!(location, PathBuf::from("/in-memory/bin/jerry-i1-bug"));
        assert_eq!(store.get(&key), Some(b"elf".to_vec()));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = InMemoryArtifactStore::new_in_memory();
        let view = store.clone();
        let key = ArtifactKey::new(ArtifactKind::Graph, "jerry-i1-bug.dynamic.graphml.gz").unwrap();

        store.insert(&key, "gz");

        assert!(view.exists(&key).await);
        assert_eq!(view.keys(), vec!["jerry-i1-bug.dynamic.graphml.gz".to_string()]);
    }

    #[test]
    fn test_count_by_kind() {
        let store = InMemoryArtifactStore::new_in_memory();
        store.insert(
            &ArtifactKey::new(ArtifactKind::Binary, "bin/jerry-i1-bug").unwrap(),
            "a",
        );
        store.insert(
            &ArtifactKey::new(ArtifactKind::Binary, "bin/jerry-i1-fix").unwrap(),
            "b",
        );
        store.insert(
            &ArtifactKey::new(ArtifactKind::Graph, "jerry-i1-bug.dynamic.graphml.gz").unwrap(),
            "c",
        );

        assert_eq!(store.count_of(ArtifactKind::Binary), 2);
        assert_eq!(store.count_of(ArtifactKind::Graph), 1);
        assert_eq!(store.count_of(ArtifactKind::Ledger), 0);
    }
}
