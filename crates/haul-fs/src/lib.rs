//! Filesystem capabilities used by haul transfers.
//!
//! - [`ensure_directory`] resolves a destination and creates it when missing
//! - [`Workspace`] is a per-request staging area that is removed on drop
//! - [`place`] moves a staged entry into its final location

mod error;
mod workspace;

pub use error::{Error, Result};
pub use workspace::Workspace;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Resolve `dir` to an absolute path and make sure it exists as a directory.
///
/// An existing non-directory path is an error; anything else is created
/// with all missing parents.
pub fn ensure_directory(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let resolved = absolute(dir)?;

    match fs::metadata(&resolved) {
        Ok(meta) if meta.is_dir() => return Ok(resolved),
        Ok(_) => return Err(Error::NotADirectory { path: resolved }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(Error::Read {
                path: resolved,
                source: e,
            });
        }
    }

    tracing::debug!(path = %resolved.display(), "creating destination directory");
    fs::create_dir_all(&resolved).map_err(|e| Error::CreateDir {
        path: resolved.clone(),
        source: e,
    })?;
    Ok(resolved)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| Error::Read {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Move `src` to `dest`, replacing an existing file at `dest`.
///
/// Falls back to copy + remove when the rename crosses devices. Parent
/// directories of `dest` are created as needed.
pub fn place(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
    let src = src.as_ref();
    let dest = dest.as_ref();

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::CreateDir {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    if dest.is_dir() && src.is_dir() {
        return merge_dir(src, dest);
    }

    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            copy_all(src, dest)?;
            remove_all(src)
        }
        Err(e) => Err(Error::Move {
            from: src.to_path_buf(),
            to: dest.to_path_buf(),
            source: e,
        }),
    }
}

fn merge_dir(src: &Path, dest: &Path) -> Result<()> {
    for entry in fs::read_dir(src).map_err(|e| Error::Read {
        path: src.to_path_buf(),
        source: e,
    })? {
        let entry = entry.map_err(|e| Error::Read {
            path: src.to_path_buf(),
            source: e,
        })?;
        place(entry.path(), dest.join(entry.file_name()))?;
    }
    remove_all(src)
}

fn copy_all(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_dir() {
        fs::copy(src, dest).map_err(|e| Error::Write {
            path: dest.to_path_buf(),
            source: e,
        })?;
        return Ok(());
    }

    fs::create_dir_all(dest).map_err(|e| Error::CreateDir {
        path: dest.to_path_buf(),
        source: e,
    })?;
    for entry in fs::read_dir(src).map_err(|e| Error::Read {
        path: src.to_path_buf(),
        source: e,
    })? {
        let entry = entry.map_err(|e| Error::Read {
            path: src.to_path_buf(),
            source: e,
        })?;
        copy_all(&entry.path(), &dest.join(entry.file_name()))?;
    }
    Ok(())
}

fn remove_all(path: &Path) -> Result<()> {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| Error::Write {
        path: path.to_path_buf(),
        source: e,
    })
}
