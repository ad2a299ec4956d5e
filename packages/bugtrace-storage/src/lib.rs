//! Artifact store for the bug reproduction pipeline.
//!
//! Every expensive pipeline step is cached by the *existence* of its output:
//! a published binary means "already built", a compressed graph means
//! "already traced". This crate owns that question so the orchestrator never
//! probes the filesystem directly.
//!
//! ## Layers
//!
//! - `domain`: [`ArtifactKey`], [`ArtifactKind`] and the [`ArtifactStore`] port
//! - `infrastructure`: [`FsArtifactStore`] (real runs) and
//!   [`InMemoryArtifactStore`] (tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bugtrace_storage::{ArtifactKey, ArtifactKind, ArtifactStore, FsArtifactStore};
//!
//! let store = FsArtifactStore::new("/work/jerryscript");
//! let key = ArtifactKey::new(ArtifactKind::Binary, "bin/jerry-i42nt-bug")?;
//!
//! if !store.exists(&key).await {
//!     store.publish(&key, &bytes).await?;
//! }
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{ArtifactKey, ArtifactKind, ArtifactStore};
pub use infrastructure::{FsArtifactStore, InMemoryArtifactStore};
