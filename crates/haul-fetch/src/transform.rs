//! Post-staging transforms.
//!
//! Transforms run over the complete set of staged files of one request,
//! after every file has been written and synced. Each transform works in
//! place inside the staging root and returns the entries that are left.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use haul_archive::ExtractOptions;

use crate::error::{Error, Result};

#[async_trait]
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    /// Transform `files` (paths under `root`) and return the resulting entries.
    async fn apply(&self, root: &Path, files: Vec<PathBuf>) -> Result<Vec<PathBuf>>;
}

/// Replaces archives with their contents.
#[derive(Debug, Clone, Default)]
pub struct Extract {
    options: ExtractOptions,
}

impl Extract {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Transform for Extract {
    fn name(&self) -> &str {
        "extract"
    }

    async fn apply(&self, root: &Path, files: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
        let root = root.to_path_buf();
        let options = self.options.clone();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::with_capacity(files.len());
            for file in files {
                out.extend(extract_one(&root, file, &options)?);
            }
            Ok(out)
        })
        .await
        .map_err(|e| Error::TransformFailed {
            name: "extract".into(),
            message: e.to_string(),
        })?
    }
}

fn extract_one(root: &Path, file: PathBuf, options: &ExtractOptions) -> Result<Vec<PathBuf>> {
    if file.is_dir() || haul_archive::detect_path(&file)
        .map_err(haul_archive::Error::from)?
        .is_none()
    {
        return Ok(vec![file]);
    }

    let scratch = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(root)
        .map_err(|e| Error::TransformFailed {
            name: "extract".into(),
            message: e.to_string(),
        })?;
    let report = haul_archive::extract(&file, scratch.path(), options)?;
    if report.entry_count == 0 {
        tracing::debug!(archive = %file.display(), "archive produced no entries, keeping it");
        return Ok(vec![file]);
    }

    tracing::debug!(
        archive = %file.display(),
        entries = report.entry_count,
        bytes = report.total_bytes,
        "extracted archive"
    );
    std::fs::remove_file(&file).map_err(|e| Error::TransformFailed {
        name: "extract".into(),
        message: format!("removing {}: {e}", file.display()),
    })?;

    let mut placed = Vec::new();
    for top in report.top_level(scratch.path()) {
        let relative = top
            .strip_prefix(scratch.path())
            .map_err(|_| haul_fs::Error::OutsideStaging { path: top.clone() })?;
        let target = root.join(relative);
        haul_fs::place(&top, &target)?;
        placed.push(target);
    }
    Ok(placed)
}

/// Path split the way rename functions see it.
///
/// `dirname` is relative to the destination (`.` for the top level),
/// `basename` excludes the extension and `extname` includes its dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub dirname: String,
    pub basename: String,
    pub extname: String,
}

impl ParsedPath {
    pub fn parse(relative: &Path) -> Self {
        let dirname = relative
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());
        let file_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (basename, extname) = match file_name.rfind('.') {
            Some(i) if i > 0 => (file_name[..i].to_string(), file_name[i..].to_string()),
            _ => (file_name, String::new()),
        };
        Self {
            dirname,
            basename,
            extname,
        }
    }

    pub fn to_path(&self) -> PathBuf {
        let name = format!("{}{}", self.basename, self.extname);
        if self.dirname.is_empty() || self.dirname == "." {
            PathBuf::from(name)
        } else {
            Path::new(&self.dirname).join(name)
        }
    }
}

/// Field overrides applied to a [`ParsedPath`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameFields {
    pub dirname: Option<String>,
    pub prefix: Option<String>,
    pub basename: Option<String>,
    pub suffix: Option<String>,
    pub extname: Option<String>,
}

/// How staged entries are renamed before placement.
#[derive(Clone)]
pub enum Rename {
    /// Literal new name, relative to the destination. Only valid when a
    /// single entry is left to rename.
    To(String),
    Map(Arc<dyn Fn(ParsedPath) -> ParsedPath + Send + Sync>),
    Fields(RenameFields),
}

impl Rename {
    pub fn map<F>(f: F) -> Self
    where
        F: Fn(ParsedPath) -> ParsedPath + Send + Sync + 'static,
    {
        Rename::Map(Arc::new(f))
    }

    /// New relative path for `relative`.
    pub fn rename(&self, relative: &Path) -> PathBuf {
        match self {
            Rename::To(name) => PathBuf::from(name),
            Rename::Map(f) => f(ParsedPath::parse(relative)).to_path(),
            Rename::Fields(fields) => {
                let mut parsed = ParsedPath::parse(relative);
                if let Some(dirname) = &fields.dirname {
                    parsed.dirname = dirname.clone();
                }
                if let Some(basename) = &fields.basename {
                    parsed.basename = basename.clone();
                }
                if let Some(extname) = &fields.extname {
                    parsed.extname = extname.clone();
                }
                parsed.basename = format!(
                    "{}{}{}",
                    fields.prefix.as_deref().unwrap_or_default(),
                    parsed.basename,
                    fields.suffix.as_deref().unwrap_or_default()
                );
                parsed.to_path()
            }
        }
    }

    /// The single destination name this rename targets, if it is literal.
    pub fn literal(&self) -> Option<&str> {
        match self {
            Rename::To(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Debug for Rename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rename::To(name) => f.debug_tuple("To").field(name).finish(),
            Rename::Map(_) => f.write_str("Map({ ... })"),
            Rename::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
        }
    }
}

#[async_trait]
impl Transform for Rename {
    fn name(&self) -> &str {
        "rename"
    }

    async fn apply(&self, root: &Path, files: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
        if files.len() > 1 {
            if let Some(name) = self.literal() {
                return Err(Error::TransformFailed {
                    name: "rename".into(),
                    message: format!("{} entries cannot all be renamed to `{name}`", files.len()),
                });
            }
        }

        let mut out = Vec::with_capacity(files.len());
        for file in files {
            let relative = file
                .strip_prefix(root)
                .map_err(|_| haul_fs::Error::OutsideStaging { path: file.clone() })?;
            let renamed = self.rename(relative);
            if !stays_inside(&renamed) {
                return Err(Error::TransformFailed {
                    name: "rename".into(),
                    message: format!("{} leaves the destination", renamed.display()),
                });
            }
            if renamed == relative {
                out.push(file);
                continue;
            }

            let target = root.join(&renamed);
            tracing::debug!(from = %relative.display(), to = %renamed.display(), "renaming");
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| haul_fs::Error::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            tokio::fs::rename(&file, &target)
                .await
                .map_err(|e| haul_fs::Error::Move {
                    from: file.clone(),
                    to: target.clone(),
                    source: e,
                })?;
            out.push(target);
        }
        Ok(out)
    }
}

fn stays_inside(relative: &Path) -> bool {
    !relative.as_os_str().is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_path_parts() {
        let parsed = ParsedPath::parse(Path::new("bin/tool.tar.gz"));
        assert_eq!(parsed.dirname, "bin");
        assert_eq!(parsed.basename, "tool.tar");
        assert_eq!(parsed.extname, ".gz");

        let dotfile = ParsedPath::parse(Path::new(".env"));
        assert_eq!(dotfile.dirname, ".");
        assert_eq!(dotfile.basename, ".env");
        assert_eq!(dotfile.extname, "");
        assert_eq!(dotfile.to_path(), PathBuf::from(".env"));
    }

    #[test]
    fn rename_forms() {
        let path = Path::new("report.csv");
        assert_eq!(Rename::To("out.csv".into()).rename(path), PathBuf::from("out.csv"));

        let upper = Rename::map(|mut p| {
            p.basename = p.basename.to_uppercase();
            p
        });
        assert_eq!(upper.rename(path), PathBuf::from("REPORT.csv"));

        let fields = Rename::Fields(RenameFields {
            dirname: Some("archive".into()),
            prefix: Some("2024-".into()),
            suffix: Some("-final".into()),
            extname: Some(".txt".into()),
            ..RenameFields::default()
        });
        assert_eq!(fields.rename(path), PathBuf::from("archive/2024-report-final.txt"));
    }

    #[tokio::test]
    async fn rename_moves_within_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();

        let out = Rename::To("nested/b.txt".into())
            .apply(dir.path(), vec![file.clone()])
            .await
            .unwrap();
        assert_eq!(out, vec![dir.path().join("nested/b.txt")]);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn rename_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();

        let result = Rename::To("../a.txt".into())
            .apply(dir.path(), vec![file])
            .await;
        assert!(matches!(result, Err(Error::TransformFailed { .. })));
    }

    #[tokio::test]
    async fn literal_rename_needs_a_single_entry() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();

        let result = Rename::To("out.txt".into())
            .apply(dir.path(), vec![a.clone(), b.clone()])
            .await;
        assert!(matches!(result, Err(Error::TransformFailed { .. })));
        assert!(a.exists());
        assert!(b.exists());
        assert!(!dir.path().join("out.txt").exists());
    }

    #[tokio::test]
    async fn extract_passes_plain_files_through() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "plain text").unwrap();

        let out = Extract::default()
            .apply(dir.path(), vec![file.clone()])
            .await
            .unwrap();
        assert_eq!(out, vec![file]);
    }
}
