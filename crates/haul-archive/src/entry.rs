use std::path::{Path, PathBuf};

use crate::format::ArchiveFormat;

/// An entry written to disk during extraction.
#[derive(Clone, Debug)]
pub struct Entry {
    pub original_path: PathBuf,
    pub target_path: PathBuf,
    pub size: u64,
    pub mode: Option<u32>,
    pub kind: EntryKind,
}

impl Entry {
    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File)
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    pub fn symlink_target(&self) -> Option<&Path> {
        match &self.kind {
            EntryKind::Symlink { target } => Some(target),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink { target: PathBuf },
}

#[derive(Clone, Debug)]
pub struct ArchiveReport {
    pub format: ArchiveFormat,
    pub entry_count: usize,
    pub total_bytes: u64,
    pub entries: Vec<Entry>,
}

impl ArchiveReport {
    /// Top-level paths created under the extraction root, in first-seen order.
    pub fn top_level(&self, root: &Path) -> Vec<PathBuf> {
        let mut seen = Vec::new();
        for entry in &self.entries {
            let Ok(relative) = entry.target_path.strip_prefix(root) else {
                continue;
            };
            if let Some(first) = relative.components().next() {
                let top = root.join(first);
                if !seen.contains(&top) {
                    seen.push(top);
                }
            }
        }
        seen
    }
}
