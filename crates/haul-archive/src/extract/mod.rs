//! Archive extraction for ZIP and TAR formats.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use crate::entry::{ArchiveReport, Entry, EntryKind};
use crate::error::{Error, Result};
use crate::format::{self, ArchiveFormat};
use crate::options::ExtractOptions;
use crate::sanitize::{check_symlink_target, sanitize_path};

mod tar;
mod zip;

/// Extract the archive at `src` into `destination`.
pub fn extract(
    src: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    options: &ExtractOptions,
) -> Result<ArchiveReport> {
    let src = src.as_ref();
    let file = File::open(src).map_err(|e| Error::ExtractionFailed {
        path: src.to_path_buf(),
        source: e,
    })?;
    extract_from_reader(file, destination.as_ref(), options)
}

/// Extract archive with automatic format detection.
pub fn extract_from_reader<R: Read + Seek + 'static>(
    mut reader: R,
    destination: &Path,
    options: &ExtractOptions,
) -> Result<ArchiveReport> {
    let format = format::detect_from_reader(&mut reader)?.ok_or(Error::UnsupportedFormat)?;
    tracing::debug!(?format, destination = %destination.display(), "extracting archive");

    std::fs::create_dir_all(destination).map_err(|e| Error::DirectoryCreationFailed {
        path: destination.to_path_buf(),
        source: e,
    })?;

    let mut sink = Sink::new(destination, options);
    match format {
        ArchiveFormat::Zip => zip::extract(reader, &mut sink)?,
        ArchiveFormat::Tar(codec) => tar::extract(codec.decoder(reader), &mut sink)?,
    }
    Ok(sink.into_report(format))
}

/// Pending entry handed from a format reader to the shared writer.
pub(crate) struct Pending<'r> {
    pub path: &'r Path,
    pub size: u64,
    pub mode: Option<u32>,
    pub kind: PendingKind<'r>,
}

pub(crate) enum PendingKind<'r> {
    File(&'r mut dyn Read),
    Directory,
    Symlink(&'r Path),
}

/// Writes sanitized entries under the destination and records them.
pub(crate) struct Sink<'a> {
    destination: &'a Path,
    options: &'a ExtractOptions,
    entries: Vec<Entry>,
    total_bytes: u64,
}

impl<'a> Sink<'a> {
    fn new(destination: &'a Path, options: &'a ExtractOptions) -> Self {
        Self {
            destination,
            options,
            entries: Vec::new(),
            total_bytes: 0,
        }
    }

    pub(crate) fn write(&mut self, pending: Pending<'_>) -> Result<()> {
        let Some(sanitized) =
            sanitize_path(pending.path, self.destination, self.options.strip_components)?
        else {
            return Ok(());
        };
        let target = sanitized.resolved;

        let kind = match pending.kind {
            PendingKind::Directory => {
                create_dir(&target)?;
                EntryKind::Directory
            }
            PendingKind::File(reader) => {
                if let Some(parent) = target.parent() {
                    create_dir(parent)?;
                }
                let mut out = File::create(&target).map_err(|e| Error::ExtractionFailed {
                    path: target.clone(),
                    source: e,
                })?;
                std::io::copy(reader, &mut out).map_err(|e| Error::ExtractionFailed {
                    path: target.clone(),
                    source: e,
                })?;
                apply_mode(&target, pending.mode)?;
                EntryKind::File
            }
            PendingKind::Symlink(link_target) => {
                check_symlink_target(link_target, &target, self.destination)?;
                if let Some(parent) = target.parent() {
                    create_dir(parent)?;
                }
                write_symlink(link_target, &target)?;
                EntryKind::Symlink {
                    target: link_target.to_path_buf(),
                }
            }
        };

        self.total_bytes += pending.size;
        self.entries.push(Entry {
            original_path: sanitized.original,
            target_path: target,
            size: pending.size,
            mode: pending.mode,
            kind,
        });
        Ok(())
    }

    fn into_report(self, format: ArchiveFormat) -> ArchiveReport {
        ArchiveReport {
            format,
            entry_count: self.entries.len(),
            total_bytes: self.total_bytes,
            entries: self.entries,
        }
    }
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::DirectoryCreationFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    // Keep executables executable, everything else at least owner-writable.
    let mode = match mode {
        Some(m) if m & 0o111 != 0 => m & 0o7777,
        Some(m) => (m | 0o644) & 0o7777,
        None => 0o644,
    };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn write_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| Error::ExtractionFailed {
        path: link.to_path_buf(),
        source: e,
    })
}

#[cfg(windows)]
fn write_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::windows::fs::symlink_file(target, link).map_err(|e| Error::ExtractionFailed {
        path: link.to_path_buf(),
        source: e,
    })
}
