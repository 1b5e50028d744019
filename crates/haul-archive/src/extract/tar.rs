use std::io::Read;

use super::{Pending, PendingKind, Sink};
use crate::error::{Error, Result};

pub(super) fn extract<R: Read>(reader: R, sink: &mut Sink<'_>) -> Result<()> {
    let mut archive = ::tar::Archive::new(reader);

    for entry in archive.entries().map_err(|_| Error::Corrupted)? {
        let mut entry = entry.map_err(|_| Error::Corrupted)?;
        let path = entry.path().map_err(|_| Error::InvalidPath)?.into_owned();
        let header = entry.header();
        let size = header.size().unwrap_or(0);
        let mode = header.mode().ok();
        let entry_type = header.entry_type();

        if entry_type.is_dir() {
            sink.write(Pending {
                path: &path,
                size: 0,
                mode,
                kind: PendingKind::Directory,
            })?;
        } else if entry_type.is_symlink() {
            let target = entry
                .link_name()
                .map_err(|_| Error::InvalidPath)?
                .ok_or(Error::InvalidPath)?
                .into_owned();
            sink.write(Pending {
                path: &path,
                size: 0,
                mode,
                kind: PendingKind::Symlink(&target),
            })?;
        } else if entry_type.is_file() {
            sink.write(Pending {
                path: &path,
                size,
                mode,
                kind: PendingKind::File(&mut entry),
            })?;
        } else {
            tracing::debug!(path = %path.display(), ?entry_type, "skipping unsupported tar entry");
        }
    }
    Ok(())
}
