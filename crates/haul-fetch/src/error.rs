//! Error types for haul-fetch.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("the {0} channel has not been registered")]
    UnknownChannel(String),

    #[error("invalid channel registration `{name}`: {reason}")]
    InvalidChannelCapability { name: String, reason: String },

    #[error("malformed remote location `{location}`: expected [user[:pass]@]host:path")]
    MalformedRemoteLocation { location: String },

    #[error("destination {path} is not a writable directory")]
    DestinationNotWritable {
        path: PathBuf,
        #[source]
        source: haul_fs::Error,
    },

    #[error("{name} exists and will not be overwritten")]
    OverwriteDeclined { name: String },

    #[error("failed to stat remote file {path}: {source}")]
    RemoteStatFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("authentication failed for {host}: {message}")]
    AuthenticationFailed { host: String, message: String },

    #[error("private key for {host} requires a passphrase")]
    PassphraseRequired { host: String },

    #[error("transport error on {location}: {source}")]
    StreamTransportError {
        location: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to stage {name}: {source}")]
    StagingWriteFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("prompt for {field} failed: {message}")]
    PromptFailed { field: String, message: String },

    #[error("transform {name} failed: {message}")]
    TransformFailed { name: String, message: String },

    #[error(transparent)]
    Config(#[from] Box<figment::Error>),

    #[error(transparent)]
    Fs(#[from] haul_fs::Error),

    #[error(transparent)]
    Archive(#[from] haul_archive::Error),
}

impl Error {
    pub(crate) fn transport(location: impl Into<String>, source: io::Error) -> Self {
        Error::StreamTransportError {
            location: location.into(),
            source,
        }
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::Config(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
