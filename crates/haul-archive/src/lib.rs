//! Archive extraction with path sanitization.
//!
//! # Architecture
//!
//! - `format.rs` - Format detection by magic bytes
//! - `sanitize.rs` - Path sanitization (zip-slip prevention) and component stripping
//! - `extract/` - Per-format implementations
//! - `entry.rs` - Extraction report types

pub use entry::{ArchiveReport, Entry, EntryKind};
pub use error::{Error, Result};
pub use extract::{extract, extract_from_reader};
pub use format::{ArchiveFormat, TarCompress, detect_format, detect_path};
pub use options::ExtractOptions;
pub use sanitize::{SanitizedPath, sanitize_path};

mod entry;
mod error;
mod extract;
mod format;
mod options;
mod sanitize;
