use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::Path;

/// Magic-byte sniffing needs at most one tar header block.
const SNIFF_LEN: u64 = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar(TarCompress),
}

/// Compression codec wrapping a tar stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TarCompress {
    None,
    Gzip,
}

impl TarCompress {
    pub(crate) fn decoder<R: Read + 'static>(self, reader: R) -> Box<dyn Read> {
        match self {
            Self::None => Box::new(reader),
            Self::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
        }
    }
}

pub fn detect_format(data: &[u8]) -> Option<ArchiveFormat> {
    match data {
        [0x50, 0x4B, 0x03, 0x04, ..] | [0x50, 0x4B, 0x05, 0x06, ..] => Some(ArchiveFormat::Zip),
        [0x1F, 0x8B, ..] => Some(ArchiveFormat::Tar(TarCompress::Gzip)),
        _ if is_tar_header(data) => Some(ArchiveFormat::Tar(TarCompress::None)),
        _ => None,
    }
}

fn is_tar_header(data: &[u8]) -> bool {
    data.len() >= 263 && &data[257..262] == b"ustar"
}

pub fn detect_from_reader<R: Read + Seek>(reader: &mut R) -> io::Result<Option<ArchiveFormat>> {
    let mut header = Vec::with_capacity(SNIFF_LEN as usize);
    reader.by_ref().take(SNIFF_LEN).read_to_end(&mut header)?;
    reader.rewind()?;
    Ok(detect_format(&header))
}

/// Sniff the archive format of a file on disk.
pub fn detect_path(path: impl AsRef<Path>) -> io::Result<Option<ArchiveFormat>> {
    let mut file = File::open(path)?;
    detect_from_reader(&mut file)
}
