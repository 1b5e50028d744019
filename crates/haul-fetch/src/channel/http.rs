use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt, future};
use reqwest::{Client, Proxy, Url};

use super::{Acquisition, Channel, FileHandle, location_file_name};
use crate::error::{Error, Result};
use crate::pipeline::TransferRequest;

/// HTTP(S) channel backed by `reqwest`.
///
/// One client is kept per URL scheme so that the proxy configured for that
/// scheme (`http_proxy`, `https_proxy`, ...) applies to it.
#[derive(Debug, Default)]
pub struct HttpChannel {
    clients: Mutex<HashMap<String, Client>>,
}

impl HttpChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, url: &Url) -> Result<Client> {
        let scheme = url.scheme().to_string();
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&scheme) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder().no_proxy();
        if let Some(proxy_url) = proxy_from_env(&scheme) {
            tracing::debug!(scheme = %scheme, proxy = %proxy_url, "using proxy");
            let proxy = Proxy::all(&proxy_url)
                .map_err(|e| Error::transport(url.as_str(), io::Error::other(e)))?
                .no_proxy(reqwest::NoProxy::from_env());
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| Error::transport(url.as_str(), io::Error::other(e)))?;
        clients.insert(scheme, client.clone());
        Ok(client)
    }

    async fn fetch_one(&self, location: &str, request: &TransferRequest) -> Result<FileHandle> {
        let url = Url::parse(location).map_err(|e| {
            Error::transport(location, io::Error::new(io::ErrorKind::InvalidInput, e))
        })?;
        let client = self.client_for(&url)?;

        let mut builder = client.get(url.clone());
        let options = &request.options;
        if let (Some(username), Some(password)) = (&options.username, &options.password) {
            builder = builder.basic_auth(username, Some(password));
        }

        tracing::debug!(url = %url, "requesting");
        let response = builder
            .send()
            .await
            .map_err(|e| Error::transport(location, io::Error::other(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: location.to_string(),
                status: status.as_u16(),
            });
        }

        let size = response.content_length();
        let stream = response.bytes_stream().map_err(io::Error::other).boxed();
        Ok(FileHandle::new(
            self.file_name(location),
            location,
            size,
            stream,
        ))
    }
}

#[async_trait]
impl Channel for HttpChannel {
    /// Last segment of the URL path, ignoring host, port and query.
    fn file_name(&self, location: &str) -> String {
        match Url::parse(location) {
            Ok(url) => location_file_name(url.path()),
            Err(_) => location_file_name(location),
        }
    }

    async fn read_streams(&self, request: &TransferRequest) -> Result<Acquisition> {
        let files = future::try_join_all(
            request
                .locations
                .iter()
                .map(|location| self.fetch_one(location, request)),
        )
        .await?;
        Ok(Acquisition {
            files,
            ..Acquisition::default()
        })
    }
}

fn proxy_from_env(scheme: &str) -> Option<String> {
    let lower = format!("{scheme}_proxy");
    let upper = lower.to_uppercase();
    [lower, upper]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.is_empty())
}
