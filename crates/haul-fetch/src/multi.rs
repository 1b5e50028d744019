//! Several transfers sharing one adapter.
//!
//! Acquisition runs one request at a time, so at most one request is
//! opening connections at any moment. Once every request holds its
//! streams, the adapter is told about all files at once and the write
//! phases run concurrently.

use std::path::PathBuf;

use futures_util::future;

use crate::error::Result;
use crate::options::TransferOptions;
use crate::pipeline::{Prepared, TransferReport, TransferRequest};
use crate::progress::Adapter;

/// One entry of a multi-transfer.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub locations: Vec<String>,
    pub destination: PathBuf,
    pub options: TransferOptions,
}

impl Descriptor {
    pub fn new(locations: impl Into<crate::Locations>, destination: impl Into<PathBuf>) -> Self {
        Self {
            locations: locations.into().into_vec(),
            destination: destination.into(),
            options: TransferOptions::default(),
        }
    }

    #[must_use]
    pub fn options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug)]
pub struct MultiTransfer {
    requests: Vec<TransferRequest>,
    adapter: Adapter,
}

impl MultiTransfer {
    /// Every request is switched to `adapter`.
    pub fn new(requests: Vec<TransferRequest>, adapter: Adapter) -> Self {
        let requests = requests
            .into_iter()
            .map(|request| TransferRequest {
                adapter: adapter.clone(),
                ..request
            })
            .collect();
        Self { requests, adapter }
    }

    /// Reports are returned in request order.
    pub async fn run(self) -> Result<Vec<TransferReport>> {
        let mut prepared: Vec<Prepared> = Vec::with_capacity(self.requests.len());
        for request in self.requests {
            match request.prepare().await {
                Ok(ready) => prepared.push(ready),
                Err(error) => {
                    release(prepared).await;
                    return Err(error);
                }
            }
        }

        let tracked: Vec<_> = prepared.iter().flat_map(Prepared::tracked).collect();
        tracing::debug!(requests = prepared.len(), files = tracked.len(), "all streams acquired");
        self.adapter.progress(&tracked);

        future::join_all(prepared.into_iter().map(Prepared::write))
            .await
            .into_iter()
            .collect()
    }
}

async fn release(prepared: Vec<Prepared>) {
    for ready in prepared {
        if let Err(error) = ready.abandon().await {
            tracing::warn!(error = %error, "failed to release channel");
        }
    }
}
