//! Transport channels and their registry.
//!
//! A [`Channel`] turns the locations of a [`TransferRequest`] into readable,
//! sized byte streams. Channels are looked up by name in a
//! [`ChannelRegistry`]; `http` and `scp` are built in, anything else is
//! registered as [`ChannelKind::Custom`].

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::error::{Error, Result};
use crate::pipeline::TransferRequest;
use crate::stats::StatsTracker;

pub mod http;
pub mod scp;

pub use http::HttpChannel;
pub use scp::ScpChannel;

/// A boxed, sendable stream.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Body of a remote file.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// A remote file resolved into a readable stream.
pub struct FileHandle {
    pub name: String,
    pub location: String,
    /// Total bytes when known at acquisition time.
    pub size: Option<u64>,
    pub stream: ByteStream,
    pub stats: Option<StatsTracker>,
}

impl FileHandle {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        size: Option<u64>,
        stream: ByteStream,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            size,
            stream,
            stats: None,
        }
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("size", &self.size)
            .field("stream", &"{ ... }")
            .field("stats", &self.stats.is_some())
            .finish()
    }
}

/// A location that could not be acquired while its siblings were.
#[derive(Debug)]
pub struct FileFailure {
    pub location: String,
    pub error: Error,
}

/// An open transport connection owned by one request.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Release the connection. Calling this more than once is a no-op.
    async fn close(&self);
}

/// What a channel produced for one request.
#[derive(Default)]
pub struct Acquisition {
    pub files: Vec<FileHandle>,
    pub failures: Vec<FileFailure>,
    pub connection: Option<Arc<dyn Connection>>,
}

impl fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquisition")
            .field("files", &self.files)
            .field("failures", &self.failures)
            .field("connection", &self.connection.is_some())
            .finish()
    }
}

/// Transport capability.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Resolve every location of `request` into a readable stream.
    async fn read_streams(&self, request: &TransferRequest) -> Result<Acquisition>;

    /// Name a location is staged under. Must agree with the
    /// [`FileHandle::name`] produced by [`read_streams`](Self::read_streams).
    fn file_name(&self, location: &str) -> String {
        location_file_name(location)
    }

    /// Release per-request resources, returning the request without them.
    async fn cleanup(&self, mut request: TransferRequest) -> Result<TransferRequest> {
        if let Some(connection) = request.connection.take() {
            connection.close().await;
        }
        Ok(request)
    }
}

/// Registered channel variant.
#[derive(Clone)]
pub enum ChannelKind {
    Http(Arc<HttpChannel>),
    Scp(Arc<ScpChannel>),
    Custom(Arc<dyn Channel>),
}

impl ChannelKind {
    pub fn custom(channel: impl Channel + 'static) -> Self {
        ChannelKind::Custom(Arc::new(channel))
    }

    pub fn as_channel(&self) -> &dyn Channel {
        match self {
            ChannelKind::Http(c) => c.as_ref(),
            ChannelKind::Scp(c) => c.as_ref(),
            ChannelKind::Custom(c) => c.as_ref(),
        }
    }

    fn builtin_name(&self) -> Option<&'static str> {
        match self {
            ChannelKind::Http(_) => Some(HTTP),
            ChannelKind::Scp(_) => Some(SCP),
            ChannelKind::Custom(_) => None,
        }
    }
}

impl fmt::Debug for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.builtin_name() {
            Some(name) => write!(f, "ChannelKind::{name}"),
            None => f.write_str("ChannelKind::Custom"),
        }
    }
}

pub const HTTP: &str = "http";
pub const SCP: &str = "scp";

/// Channels keyed by transport name.
#[derive(Clone, Debug, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, ChannelKind>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `http` and `scp` channels.
    pub fn with_defaults(scp: ScpChannel) -> Self {
        let mut channels = BTreeMap::new();
        channels.insert(
            HTTP.to_string(),
            ChannelKind::Http(Arc::new(HttpChannel::new())),
        );
        channels.insert(SCP.to_string(), ChannelKind::Scp(Arc::new(scp)));
        Self { channels }
    }

    /// Add or replace the channel registered under `name`.
    ///
    /// Names are non-empty and limited to `[a-z0-9_-]`; a built-in variant
    /// may not be registered under the other built-in's name.
    pub fn register(&mut self, name: impl Into<String>, kind: ChannelKind) -> Result<()> {
        let name = name.into();
        let invalid = |reason: &str| Error::InvalidChannelCapability {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(invalid("name may only contain [a-z0-9_-]"));
        }
        let reserved = name == HTTP || name == SCP;
        if reserved && kind.builtin_name().is_some_and(|builtin| builtin != name) {
            return Err(invalid("built-in channel registered under another built-in name"));
        }

        tracing::debug!(channel = %name, "registering channel");
        self.channels.insert(name, kind);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<ChannelKind> {
        self.channels
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownChannel(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }
}

/// Final path segment of a location, used as the staged file name.
pub(crate) fn location_file_name(location: &str) -> String {
    let path = location
        .split(['?', '#'])
        .next()
        .unwrap_or(location)
        .trim_end_matches('/');
    let name = path.rsplit(['/', ':']).next().unwrap_or(path);
    if name.is_empty() {
        "index.html".to_string()
    } else {
        name.to_string()
    }
}
