//! Infrastructure layer - Artifact store adapters

pub mod fs;
pub mod memory;

pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;
