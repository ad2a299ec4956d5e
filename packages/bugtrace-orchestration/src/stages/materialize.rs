//! Revision materialization
//!
//! A revision is exported to `{workspace}.tar` once and unpacked into the
//! workspace directory. Both steps stage into temporary siblings and rename
//! into place, so an interrupted run never leaves a half-written archive or
//! a half-unpacked workspace that a later run would mistake for a good one.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{ReproError, Result};
use crate::layout::PassLayout;
use crate::pipeline::MaterializeStage;
use crate::vcs::VcsArchiver;

pub struct RevisionMaterializer {
    archiver: Arc<dyn VcsArchiver>,
}

impl RevisionMaterializer {
    pub fn new(archiver: Arc<dyn VcsArchiver>) -> Self {
        Self { archiver }
    }
}

#[async_trait]
impl MaterializeStage for RevisionMaterializer {
    async fn materialize(&self, layout: &PassLayout) -> Result<()> {
        if tokio::fs::try_exists(&layout.workspace_dir)
            .await
            .unwrap_or(false)
        {
            debug!(workspace = %layout.workspace_dir.display(), "Workspace exists, reusing");
            return Ok(());
        }

        let archiver = Arc::clone(&self.archiver);
        let revision = layout.revision.clone();
        let archive = layout.archive_path.clone();
        let workspace = layout.workspace_dir.clone();

        tokio::task::spawn_blocking(move || {
            materialize_blocking(archiver.as_ref(), &revision, &archive, &workspace)
        })
        .await
        .map_err(|e| ReproError::materialization(&layout.revision, &layout.workspace_dir, e))?
    }
}

fn materialize_blocking(
    archiver: &dyn VcsArchiver,
    revision: &str,
    archive: &Path,
    workspace: &Path,
) -> Result<()> {
    let fail = |reason: String| ReproError::materialization(revision, workspace, reason);

    let parent = workspace
        .parent()
        .ok_or_else(|| fail("workspace has no parent directory".to_string()))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| fail(format!("cannot create {}: {}", parent.display(), e)))?;

    if !archive.exists() {
        let mut staging = tempfile::Builder::new()
            .prefix(".archive-")
            .tempfile_in(parent)
            .map_err(|e| fail(format!("cannot stage archive: {}", e)))?;
        {
            let mut writer = BufWriter::new(staging.as_file_mut());
            archiver
                .write_archive(revision, &mut writer)
                .map_err(|e| fail(e.to_string()))?;
            writer
                .flush()
                .map_err(|e| fail(format!("cannot write archive: {}", e)))?;
        }
        staging
            .persist(archive)
            .map_err(|e| fail(format!("cannot store {}: {}", archive.display(), e.error)))?;
        info!(revision, archive = %archive.display(), "Exported revision");
    }

    let unpack_dir = tempfile::Builder::new()
        .prefix(".unpack-")
        .tempdir_in(parent)
        .map_err(|e| fail(format!("cannot stage workspace: {}", e)))?;
    let file = File::open(archive)
        .map_err(|e| fail(format!("cannot open {}: {}", archive.display(), e)))?;

    if let Err(e) = tar::Archive::new(BufReader::new(file)).unpack(unpack_dir.path()) {
        // A corrupt archive would fail the same way on every run; drop it so
        // the next run exports a fresh one
        if let Err(remove_err) = std::fs::remove_file(archive) {
            warn!(archive = %archive.display(), error = %remove_err, "Could not delete corrupt archive");
        }
        return Err(fail(format!("corrupt archive {}: {}", archive.display(), e)));
    }

    std::fs::rename(unpack_dir.path(), workspace)
        .map_err(|e| fail(format!("cannot move unpacked tree into place: {}", e)))?;
    info!(revision, workspace = %workspace.display(), "Materialized revision");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, Preset};
    use crate::job::Variant;
    use crate::layout::LayoutPlanner;
    use crate::testing::ScriptedArchiver;

    fn layout(root: &Path, revision: &str) -> PassLayout {
        let mut config = PipelineConfig::preset(Preset::Callgrind);
        config.paths.workspace_root = root.join("ws");
        config.paths.output_dir = root.join("out");
        LayoutPlanner::new(config.paths, config.naming, config.tracer.trace_extension)
            .plan("i42nt", Variant::Bug, revision)
            .unwrap()
    }

    #[tokio::test]
    async fn test_materialize_exports_and_unpacks() {
        let root = tempfile::tempdir().unwrap();
        let archiver = Arc::new(
            ScriptedArchiver::new().with_revision("abc123", &[("tools/build.py", "print(1)")]),
        );
        let stage = RevisionMaterializer::new(archiver.clone());
        let layout = layout(root.path(), "abc123");

        stage.materialize(&layout).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(layout.workspace_dir.join("tools/build.py")).unwrap(),
            "print(1)"
        );
        assert!(layout.archive_path.exists());
        assert_eq!(archiver.calls(), vec!["abc123".to_string()]);

        // No staging leftovers next to the workspace
        let leftovers: Vec<_> = std::fs::read_dir(root.path().join("ws"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_existing_workspace_is_reused() {
        let root = tempfile::tempdir().unwrap();
        let archiver = Arc::new(ScriptedArchiver::new());
        let stage = RevisionMaterializer::new(archiver.clone());
        let layout = layout(root.path(), "abc123");
        std::fs::create_dir_all(&layout.workspace_dir).unwrap();

        stage.materialize(&layout).await.unwrap();

        assert!(archiver.calls().is_empty());
        assert!(!layout.archive_path.exists());
    }

    #[tokio::test]
    async fn test_existing_archive_is_not_refetched() {
        let root = tempfile::tempdir().unwrap();
        let layout = layout(root.path(), "abc123");
        let seeded = ScriptedArchiver::new().with_revision("abc123", &[("a.js", "1")]);
        std::fs::create_dir_all(layout.archive_path.parent().unwrap()).unwrap();
        let mut bytes = Vec::new();
        seeded.write_archive("abc123", &mut bytes).unwrap();
        std::fs::write(&layout.archive_path, bytes).unwrap();

        let archiver = Arc::new(ScriptedArchiver::new());
        RevisionMaterializer::new(archiver.clone())
            .materialize(&layout)
            .await
            .unwrap();

        assert!(archiver.calls().is_empty());
        assert!(layout.workspace_dir.join("a.js").exists());
    }

    #[tokio::test]
    async fn test_unknown_revision_fails_without_leaving_archive() {
        let root = tempfile::tempdir().unwrap();
        let stage = RevisionMaterializer::new(Arc::new(ScriptedArchiver::new()));
        let layout = layout(root.path(), "nope");

        let err = stage.materialize(&layout).await.unwrap_err();

        assert!(matches!(err, ReproError::Materialization { ref revision, .. } if revision == "nope"));
        assert!(!layout.archive_path.exists());
        assert!(!layout.workspace_dir.exists());
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_deleted() {
        let root = tempfile::tempdir().unwrap();
        let archiver = Arc::new(ScriptedArchiver::new().with_corrupt_revision("bad"));
        let stage = RevisionMaterializer::new(archiver);
        let layout = layout(root.path(), "bad");

        let err = stage.materialize(&layout).await.unwrap_err();

        assert!(err.to_string().contains("corrupt archive"));
        assert!(!layout.archive_path.exists());
        assert!(!layout.workspace_dir.exists());
    }
}
