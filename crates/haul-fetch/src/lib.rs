//! Fetch remote files over HTTP or SCP into a local directory.
//!
//! # Architecture
//!
//! - [`channel`] - Transports (`http`, `scp`, custom) and their registry
//! - [`pipeline`] - Request stages, staging and final placement
//! - [`multi`] - Several requests sharing one adapter
//! - [`stats`] / [`progress`] - Throughput accounting and notification
//! - [`transform`] - Extract and rename on staged files
//! - [`credentials`] - Host-scoped private keys with a shared cache
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> haul_fetch::Result<()> {
//! use haul_fetch::{Downloader, TransferOptions};
//!
//! let downloader = Downloader::new()?;
//! let report = downloader
//!     .download(
//!         "https://example.com/tool.tar.gz",
//!         "/tmp/tools",
//!         TransferOptions::default().extract(true),
//!     )
//!     .await?;
//! println!("placed {:?}", report.files);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod credentials;
mod error;
pub mod multi;
mod options;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod stats;
pub mod transform;

use std::path::PathBuf;
use std::sync::Arc;

pub use channel::{
    Acquisition, Channel, ChannelKind, ChannelRegistry, Connection, FileFailure, FileHandle,
    HttpChannel, ScpChannel,
};
pub use credentials::{CredentialCache, CredentialConfig, CredentialResolver};
pub use error::{Error, Result};
pub use multi::{Descriptor, MultiTransfer};
pub use options::TransferOptions;
pub use pipeline::{Prepared, TransferReport, TransferRequest};
pub use progress::{Adapter, Bars, FnProgress, ProgressAdapter, Silent, Text, TrackedFile};
pub use prompt::{DialoguerPrompter, Prompter};
pub use stats::{StatsSnapshot, StatsTracker, TrackedStream};
pub use transform::{Extract, ParsedPath, Rename, RenameFields, Transform};

/// One or more source locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locations(Vec<String>);

impl Locations {
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<&str> for Locations {
    fn from(location: &str) -> Self {
        Self(vec![location.to_string()])
    }
}

impl From<String> for Locations {
    fn from(location: String) -> Self {
        Self(vec![location])
    }
}

impl From<Vec<String>> for Locations {
    fn from(locations: Vec<String>) -> Self {
        Self(locations)
    }
}

impl From<Vec<&str>> for Locations {
    fn from(locations: Vec<&str>) -> Self {
        Self(locations.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Locations {
    fn from(locations: [&str; N]) -> Self {
        Self(locations.into_iter().map(str::to_string).collect())
    }
}

/// Channel registry plus the default adapter used by transfers.
#[derive(Debug, Clone)]
pub struct Downloader {
    registry: ChannelRegistry,
    adapter: Adapter,
}

impl Downloader {
    /// Built-in channels, credential config from `~/.haulrc.toml` and the
    /// environment, terminal bars and prompts.
    pub fn new() -> Result<Self> {
        let credentials =
            CredentialResolver::new(CredentialConfig::load()?, Arc::new(CredentialCache::new()))?;
        Ok(Self::with_registry(
            ChannelRegistry::with_defaults(ScpChannel::new(credentials)),
            Adapter::default(),
        ))
    }

    pub fn with_registry(registry: ChannelRegistry, adapter: Adapter) -> Self {
        Self { registry, adapter }
    }

    #[must_use]
    pub fn with_adapter(mut self, adapter: Adapter) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn register(&mut self, name: impl Into<String>, kind: ChannelKind) -> Result<()> {
        self.registry.register(name, kind)
    }

    /// Build a request, resolving its channel and adapter.
    pub fn request(
        &self,
        locations: impl Into<Locations>,
        destination: impl Into<PathBuf>,
        options: TransferOptions,
    ) -> Result<TransferRequest> {
        let channel = self.registry.get(&options.channel)?;
        let adapter = options.adapter.clone().unwrap_or_else(|| self.adapter.clone());
        tracing::debug!(channel = %options.channel, "using channel");
        Ok(TransferRequest::new(
            locations.into().into_vec(),
            destination,
            options,
            channel,
            adapter,
        ))
    }

    pub async fn download(
        &self,
        locations: impl Into<Locations>,
        destination: impl Into<PathBuf>,
        options: TransferOptions,
    ) -> Result<TransferReport> {
        self.request(locations, destination, options)?.run().await
    }

    /// Run several transfers sharing this downloader's adapter.
    pub async fn multi(&self, descriptors: Vec<Descriptor>) -> Result<Vec<TransferReport>> {
        let requests = descriptors
            .into_iter()
            .map(|d| self.request(d.locations, d.destination, d.options))
            .collect::<Result<Vec<_>>>()?;
        MultiTransfer::new(requests, self.adapter.clone()).run().await
    }
}

/// Download with a default [`Downloader`].
pub async fn download(
    locations: impl Into<Locations>,
    destination: impl Into<PathBuf>,
    options: TransferOptions,
) -> Result<TransferReport> {
    Downloader::new()?
        .download(locations, destination, options)
        .await
}

/// Run `downloader.download` on the current runtime and hand the outcome
/// to `callback`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_download<F>(
    downloader: Downloader,
    locations: impl Into<Locations>,
    destination: impl Into<PathBuf>,
    options: TransferOptions,
    callback: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnOnce(Result<TransferReport>) + Send + 'static,
{
    let locations = locations.into();
    let destination = destination.into();
    tokio::spawn(async move {
        let result = downloader.download(locations, destination, options).await;
        callback(result);
    })
}
