//! Revision archives
//!
//! A revision is exported as a tar stream of its tree, the same snapshot
//! `git archive` would produce: regular files, executables and symlinks,
//! with submodules left out.

use std::io::Write;
use std::path::{Path, PathBuf};

use git2::{ObjectType, Repository, Tree};
use tar::{EntryType, Header};
use thiserror::Error;
use tracing::debug;

const GIT_MODE_EXECUTABLE: i32 = 0o100755;
const GIT_MODE_SYMLINK: i32 = 0o120000;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("cannot resolve revision '{revision}': {source}")]
    UnknownRevision {
        revision: String,
        #[source]
        source: git2::Error,
    },

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("archive write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of revision snapshots
pub trait VcsArchiver: Send + Sync {
    /// Write a tar archive of `revision`'s tree to `out`
    fn write_archive(&self, revision: &str, out: &mut dyn Write) -> Result<(), VcsError>;
}

/// Archives revisions of a local git repository
pub struct Git2Archiver {
    repo_dir: PathBuf,
}

impl Git2Archiver {
    pub fn new(repo_dir: impl AsRef<Path>) -> Self {
        Self {
            repo_dir: repo_dir.as_ref().to_path_buf(),
        }
    }

    fn append_tree<W: Write>(
        repo: &Repository,
        tree: &Tree<'_>,
        prefix: &Path,
        mtime: u64,
        builder: &mut tar::Builder<W>,
    ) -> Result<(), VcsError> {
        for entry in tree.iter() {
            let Some(name) = entry.name() else {
                debug!(prefix = %prefix.display(), "Skipping entry with non UTF-8 name");
                continue;
            };
            let path = prefix.join(name);

            match entry.kind() {
                Some(ObjectType::Tree) => {
                    let subtree = repo.find_tree(entry.id())?;
                    Self::append_tree(repo, &subtree, &path, mtime, builder)?;
                }
                Some(ObjectType::Blob) => {
                    let blob = repo.find_blob(entry.id())?;
                    let mut header = Header::new_gnu();
                    header.set_mtime(mtime);

                    if entry.filemode() == GIT_MODE_SYMLINK {
                        let target = String::from_utf8_lossy(blob.content()).into_owned();
                        header.set_entry_type(EntryType::Symlink);
                        header.set_mode(0o777);
                        header.set_size(0);
                        builder.append_link(&mut header, &path, target)?;
                    } else {
                        header.set_entry_type(EntryType::Regular);
                        header.set_mode(if entry.filemode() == GIT_MODE_EXECUTABLE {
                            0o755
                        } else {
                            0o644
                        });
                        header.set_size(blob.content().len() as u64);
                        builder.append_data(&mut header, &path, blob.content())?;
                    }
                }
                // Submodule commits are not part of the snapshot
                _ => debug!(path = %path.display(), "Skipping non-blob entry"),
            }
        }
        Ok(())
    }
}

impl VcsArchiver for Git2Archiver {
    fn write_archive(&self, revision: &str, out: &mut dyn Write) -> Result<(), VcsError> {
        let repo = Repository::open(&self.repo_dir)?;
        let object = repo
            .revparse_single(revision)
            .map_err(|source| VcsError::UnknownRevision {
                revision: revision.to_string(),
                source,
            })?;
        let tree = object.peel_to_tree()?;
        let mtime = object
            .peel_to_commit()
            .map(|commit| commit.time().seconds().max(0) as u64)
            .unwrap_or(0);

        let mut builder = tar::Builder::new(out);
        Self::append_tree(&repo, &tree, Path::new(""), mtime, &mut builder)?;
        builder.finish()?;
        Ok(())
    }
}
