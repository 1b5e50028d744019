use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;

use crate::{Error, Result};

const PREFIX: &str = ".haul-staging-";

/// Staging area for a single transfer request.
///
/// Everything left in the workspace is removed when it is dropped,
/// whether or not [`Workspace::commit`] ran.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a workspace under the system temp directory.
    pub fn new() -> Result<Self> {
        Self::in_dir(std::env::temp_dir())
    }

    /// Create a workspace under `root`.
    pub fn in_dir(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| Error::CreateDir {
            path: root.to_path_buf(),
            source: e,
        })?;
        let dir = tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir_in(root)
            .map_err(Error::Staging)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path for a staged entry, rejecting names that would leave the workspace.
    pub fn entry_path(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = relative.as_ref();
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || relative.as_os_str().is_empty() {
            return Err(Error::OutsideStaging {
                path: relative.to_path_buf(),
            });
        }
        Ok(self.dir.path().join(relative))
    }

    /// Create a fresh subdirectory inside the workspace.
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let path = self.entry_path(name)?;
        std::fs::create_dir_all(&path).map_err(|e| Error::CreateDir {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    /// Move `entries` (absolute paths inside `root`, itself inside the
    /// workspace) into `destination`, keeping their path relative to `root`.
    ///
    /// Either every entry is placed or none is: entries that already exist
    /// in `destination` are copied aside first and restored if a later
    /// entry fails. Returns the placed paths in the order given.
    pub fn commit(
        self,
        root: &Path,
        entries: &[PathBuf],
        destination: &Path,
    ) -> Result<Vec<PathBuf>> {
        if !root.starts_with(self.dir.path()) {
            return Err(Error::OutsideStaging {
                path: root.to_path_buf(),
            });
        }

        let mut targets: Vec<PathBuf> = Vec::with_capacity(entries.len());
        for entry in entries {
            let relative = entry
                .strip_prefix(root)
                .map_err(|_| Error::OutsideStaging { path: entry.clone() })?;
            let target = destination.join(relative);
            if targets.contains(&target) {
                return Err(Error::DuplicateEntry { path: target });
            }
            targets.push(target);
        }

        let backups = self.dir.path().join(BACKUPS);
        let mut journal = Journal::default();
        for (index, (entry, target)) in entries.iter().zip(&targets).enumerate() {
            if let Err(e) = journal.place(entry, target, &backups.join(index.to_string())) {
                journal.roll_back();
                return Err(e);
            }
        }
        Ok(targets)
    }
}

const BACKUPS: &str = ".replaced";

/// What a commit has changed in the destination so far.
#[derive(Default)]
struct Journal {
    placed: Vec<PathBuf>,
    replaced: Vec<(PathBuf, PathBuf)>,
}

impl Journal {
    fn place(&mut self, entry: &Path, target: &Path, backup: &Path) -> Result<()> {
        let existed = std::fs::symlink_metadata(target).is_ok();
        if existed {
            if let Some(parent) = backup.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            crate::copy_all(target, backup)?;
            self.replaced.push((target.to_path_buf(), backup.to_path_buf()));
        }

        tracing::debug!(
            from = %entry.display(),
            to = %target.display(),
            "placing staged entry"
        );
        if let Err(e) = crate::place(entry, target) {
            if !existed && std::fs::symlink_metadata(target).is_ok() {
                let _ = crate::remove_all(target);
            }
            return Err(e);
        }
        self.placed.push(target.to_path_buf());
        Ok(())
    }

    /// Remove what was placed and put replaced entries back.
    fn roll_back(self) {
        for target in self.placed.iter().rev() {
            if let Err(e) = crate::remove_all(target) {
                tracing::warn!(path = %target.display(), error = %e, "failed to remove placed entry");
            }
        }
        for (target, backup) in self.replaced.into_iter().rev() {
            if std::fs::symlink_metadata(&target).is_ok() {
                let _ = crate::remove_all(&target);
            }
            if let Err(e) = crate::place(&backup, &target) {
                tracing::warn!(path = %target.display(), error = %e, "failed to restore replaced entry");
            }
        }
    }
}
