use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("'{path}' exists and is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("failed to create directory '{path}': {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to read '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to move '{from}' to '{to}': {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("staged entry '{path}' escapes the staging area")]
    OutsideStaging { path: PathBuf },

    #[error("more than one staged entry targets '{path}'")]
    DuplicateEntry { path: PathBuf },

    #[error("failed to create staging area: {0}")]
    Staging(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
