//! The request pipeline.
//!
//! A [`TransferRequest`] moves through explicit stages, each consuming the
//! previous value and returning a new one:
//!
//! validate → authenticate → ensure destination → overwrite check → acquire
//!
//! Acquisition yields a [`Prepared`] transfer holding open streams. Writing
//! it stages every stream into a per-request [`Workspace`], waits for every
//! staged file to be synced, releases the channel, runs the transforms
//! (extract, rename, user transforms) and finally moves the result into
//! the destination directory.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{StreamExt, future};
use haul_fs::Workspace;
use tokio::io::AsyncWriteExt;

use crate::channel::{ChannelKind, Connection, FileFailure, FileHandle};
use crate::error::{Error, Result};
use crate::options::TransferOptions;
use crate::progress::{Adapter, TrackedFile};
use crate::stats::{StatsTracker, TrackedStream};
use crate::transform::{Extract, Transform};

const STAGED_FILES: &str = "files";

/// One transfer: locations fetched through one channel into one directory.
#[derive(Clone)]
pub struct TransferRequest {
    pub locations: Vec<String>,
    pub destination: PathBuf,
    pub options: TransferOptions,
    pub channel: ChannelKind,
    pub adapter: Adapter,
    /// Open transport connection, attached after acquisition.
    pub connection: Option<Arc<dyn Connection>>,
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRequest")
            .field("locations", &self.locations)
            .field("destination", &self.destination)
            .field("options", &self.options)
            .field("channel", &self.channel)
            .field("connection", &self.connection.is_some())
            .finish()
    }
}

/// Outcome of a completed request.
#[derive(Debug)]
pub struct TransferReport {
    pub destination: PathBuf,
    /// Placed entries, in staging order.
    pub files: Vec<PathBuf>,
    /// Locations that failed on their own while the rest succeeded.
    pub failures: Vec<FileFailure>,
}

impl TransferRequest {
    pub fn new(
        locations: Vec<String>,
        destination: impl Into<PathBuf>,
        options: TransferOptions,
        channel: ChannelKind,
        adapter: Adapter,
    ) -> Self {
        Self {
            locations,
            destination: destination.into(),
            options,
            channel,
            adapter,
            connection: None,
        }
    }

    /// Run every stage up to and including acquisition.
    pub async fn prepare(self) -> Result<Prepared> {
        self.validate()?
            .authenticate()
            .ensure_destination()?
            .check_overwrite()
            .await?
            .acquire()
            .await
    }

    /// Prepare, report progress and write.
    pub async fn run(self) -> Result<TransferReport> {
        let adapter = self.adapter.clone();
        let prepared = self.prepare().await?;
        adapter.progress(&prepared.tracked());
        prepared.write().await
    }

    pub fn validate(self) -> Result<Self> {
        if self.locations.is_empty() {
            return Err(Error::InvalidRequest("no locations given".into()));
        }
        if self.locations.iter().any(|l| l.trim().is_empty()) {
            return Err(Error::InvalidRequest("empty location".into()));
        }
        if self.locations.len() > 1 {
            if let Some(name) = self.options.rename.as_ref().and_then(|r| r.literal()) {
                return Err(Error::InvalidRequest(format!(
                    "{} locations cannot all be renamed to `{name}`",
                    self.locations.len()
                )));
            }
        }
        let channel = self.channel.as_channel();
        if let Some(name) = first_duplicate(self.locations.iter().map(|l| channel.file_name(l))) {
            return Err(duplicate_name(&name));
        }
        Ok(self)
    }

    /// Drop blank credentials so channels only see usable ones.
    pub fn authenticate(mut self) -> Self {
        let blank = |v: &Option<String>| v.as_deref().is_some_and(str::is_empty);
        if blank(&self.options.username) {
            self.options.username = None;
        }
        if blank(&self.options.password) {
            self.options.password = None;
        }
        self
    }

    pub fn ensure_destination(mut self) -> Result<Self> {
        let resolved = haul_fs::ensure_directory(&self.destination).map_err(|source| {
            Error::DestinationNotWritable {
                path: self.destination.clone(),
                source,
            }
        })?;
        self.destination = resolved;
        tracing::debug!(destination = %self.destination.display(), "destination resolved");
        Ok(self)
    }

    /// Names in the destination that this request would replace.
    pub fn conflicts(&self) -> Vec<String> {
        if self.options.force {
            return Vec::new();
        }
        let names: Vec<String> = match &self.options.rename {
            Some(rename) => match rename.literal() {
                Some(name) => vec![name.to_string()],
                None => return Vec::new(),
            },
            None => {
                let channel = self.channel.as_channel();
                self.locations.iter().map(|l| channel.file_name(l)).collect()
            }
        };

        let mut conflicts: Vec<String> = Vec::new();
        for name in names {
            if self.destination.join(&name).exists() && !conflicts.contains(&name) {
                conflicts.push(name);
            }
        }
        conflicts
    }

    /// Ask once per existing name; any refusal aborts the request.
    pub async fn check_overwrite(self) -> Result<Self> {
        for name in self.conflicts() {
            let confirmed = self.adapter.prompter().confirm_overwrite(&name).await?;
            if !confirmed {
                return Err(Error::OverwriteDeclined { name });
            }
        }
        Ok(self)
    }

    pub async fn acquire(self) -> Result<Prepared> {
        tracing::debug!(channel = ?self.channel, locations = self.locations.len(), "acquiring streams");
        let acquisition = self.channel.as_channel().read_streams(&self).await?;

        let reports_stats = self.adapter.reports_stats();
        let files = acquisition
            .files
            .into_iter()
            .map(|mut file| {
                if reports_stats {
                    file.stats = Some(StatsTracker::new(file.location.clone(), file.size));
                }
                file
            })
            .collect();

        let prepared = Prepared {
            request: TransferRequest {
                connection: acquisition.connection,
                ..self
            },
            files,
            failures: acquisition.failures,
        };
        if let Some(name) = first_duplicate(prepared.files.iter().map(|f| f.name.clone())) {
            prepared.abandon().await?;
            return Err(duplicate_name(&name));
        }
        Ok(prepared)
    }

    /// Transforms in application order: extract, rename, then user transforms.
    fn transforms(&self) -> Vec<Arc<dyn Transform>> {
        let mut transforms: Vec<Arc<dyn Transform>> = Vec::new();
        if let Some(options) = &self.options.extract {
            transforms.push(Arc::new(Extract::new(options.clone())));
        }
        if let Some(rename) = &self.options.rename {
            transforms.push(Arc::new(rename.clone()));
        }
        transforms.extend(self.options.transforms.iter().cloned());
        transforms
    }

    async fn cleanup(self) -> Result<Self> {
        let channel = self.channel.clone();
        channel.as_channel().cleanup(self).await
    }
}

/// A request whose streams are open and ready to be written.
#[derive(Debug)]
pub struct Prepared {
    request: TransferRequest,
    files: Vec<FileHandle>,
    failures: Vec<FileFailure>,
}

impl Prepared {
    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    pub fn tracked(&self) -> Vec<TrackedFile> {
        self.files
            .iter()
            .map(|f| TrackedFile {
                name: f.name.clone(),
                location: f.location.clone(),
                size: f.size,
                stats: f.stats.clone(),
            })
            .collect()
    }

    /// Release the channel without writing anything.
    pub async fn abandon(self) -> Result<()> {
        self.request.cleanup().await.map(drop)
    }

    pub async fn write(self) -> Result<TransferReport> {
        let Prepared {
            request,
            files,
            failures,
        } = self;

        let staging = match Workspace::new().and_then(|ws| ws.subdir(STAGED_FILES).map(|root| (ws, root))) {
            Ok(staging) => staging,
            Err(e) => {
                request.cleanup().await?;
                return Err(e.into());
            }
        };
        let (workspace, root) = staging;

        let outcomes = future::join_all(files.into_iter().map(|file| stage(&root, file))).await;
        let cleanup = request.cleanup().await;
        let staged = outcomes.into_iter().collect::<Result<Vec<_>>>()?;
        let request = cleanup?;

        let mut entries = staged;
        for transform in request.transforms() {
            tracing::debug!(transform = transform.name(), "running transform");
            entries = transform.apply(&root, entries).await?;
        }

        let destination = request.destination.clone();
        let placed = tokio::task::spawn_blocking(move || workspace.commit(&root, &entries, &destination))
            .await
            .map_err(|e| Error::StagingWriteFailed {
                name: request.destination.display().to_string(),
                source: std::io::Error::other(e),
            })??;

        tracing::info!(
            destination = %request.destination.display(),
            files = placed.len(),
            failures = failures.len(),
            "transfer complete"
        );
        Ok(TransferReport {
            destination: request.destination,
            files: placed,
            failures,
        })
    }
}

/// Write one stream into the staging root and sync it to disk.
async fn stage(root: &Path, file: FileHandle) -> Result<PathBuf> {
    let FileHandle {
        name,
        location,
        stream,
        stats,
        ..
    } = file;

    let staging_failed = |source: std::io::Error| Error::StagingWriteFailed {
        name: name.clone(),
        source,
    };
    if !is_plain_name(&name) {
        return Err(staging_failed(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "file name is not a single path component",
        )));
    }

    let target = root.join(&name);
    let mut out = tokio::fs::File::create(&target).await.map_err(staging_failed)?;
    let mut stream = match stats {
        Some(tracker) => TrackedStream::new(stream, tracker).boxed(),
        None => stream,
    };

    tracing::debug!(name = %name, "staging");
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::transport(location.as_str(), e))?;
        out.write_all(&chunk).await.map_err(staging_failed)?;
    }
    out.flush().await.map_err(staging_failed)?;
    out.sync_all().await.map_err(staging_failed)?;
    Ok(target)
}

fn first_duplicate(names: impl IntoIterator<Item = String>) -> Option<String> {
    let mut seen = HashSet::new();
    names.into_iter().find(|name| !seen.insert(name.clone()))
}

fn duplicate_name(name: &str) -> Error {
    Error::InvalidRequest(format!("more than one location would be saved as `{name}`"))
}

fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}
