use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Result of sanitizing an archive entry path.
#[derive(Clone, Debug)]
pub struct SanitizedPath {
    pub original: PathBuf,
    pub resolved: PathBuf,
}

/// Resolve an entry path against `base`, stripping `strip` leading components.
///
/// Returns `Ok(None)` when stripping leaves nothing, which callers treat as
/// "skip this entry".
pub fn sanitize_path(
    entry_path: impl AsRef<Path>,
    base: impl AsRef<Path>,
    strip: usize,
) -> Result<Option<SanitizedPath>> {
    let entry_path = entry_path.as_ref();
    let base = base.as_ref();

    if entry_path.is_absolute() || entry_path.as_os_str().to_string_lossy().contains('\0') {
        return Err(Error::ZipSlip {
            entry: entry_path.to_path_buf(),
            resolved: entry_path.to_path_buf(),
        });
    }

    let normalized = normalize_path(entry_path);
    let components: Vec<_> = normalized.components().collect();
    if components.len() <= strip {
        return Ok(None);
    }
    let stripped: PathBuf = components[strip..].iter().collect();

    let resolved = normalize_path(&base.join(&stripped));
    if !resolved.starts_with(base) || resolved == base {
        return Err(Error::ZipSlip {
            entry: entry_path.to_path_buf(),
            resolved,
        });
    }

    Ok(Some(SanitizedPath {
        original: entry_path.to_path_buf(),
        resolved,
    }))
}

/// Check that a symlink placed at `link` and pointing at `target` stays under `base`.
pub(crate) fn check_symlink_target(target: &Path, link: &Path, base: &Path) -> Result<()> {
    if target.is_absolute() {
        return Err(Error::SymlinkEscape {
            target: target.to_path_buf(),
            resolved: target.to_path_buf(),
        });
    }
    let resolved = normalize_path(&link.parent().unwrap_or(base).join(target));
    if !resolved.starts_with(base) {
        return Err(Error::SymlinkEscape {
            target: target.to_path_buf(),
            resolved,
        });
    }
    Ok(())
}

/// Resolve `.` and `..` lexically. `..` at the root of a relative path
/// is kept so the containment check can reject it.
fn normalize_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = parts.last().copied();
                match last {
                    Some(Component::Normal(_)) => {
                        parts.pop();
                    }
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                    _ => parts.push(component),
                }
            }
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}
