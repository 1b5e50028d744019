use std::io::{Read, Seek};

use super::{Pending, PendingKind, Sink};
use crate::error::{Error, Result};

pub(super) fn extract<R: Read + Seek>(reader: R, sink: &mut Sink<'_>) -> Result<()> {
    let mut archive = ::zip::ZipArchive::new(reader)?;

    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let path = file.enclosed_name().ok_or(Error::InvalidPath)?;
        let size = file.size();
        let mode = file.unix_mode();

        if file.is_dir() {
            sink.write(Pending {
                path: &path,
                size: 0,
                mode,
                kind: PendingKind::Directory,
            })?;
        } else {
            sink.write(Pending {
                path: &path,
                size,
                mode,
                kind: PendingKind::File(&mut file),
            })?;
        }
    }
    Ok(())
}
