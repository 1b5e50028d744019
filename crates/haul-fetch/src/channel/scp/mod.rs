//! SCP/SFTP channel.
//!
//! A request opens exactly one session, shared by all of its locations.
//! Each location is `stat`ed for its size before a read stream is opened;
//! a failed `stat` only fails that location.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future;

use super::{Acquisition, Channel, Connection, FileFailure, FileHandle, location_file_name};
use crate::credentials::CredentialResolver;
use crate::error::{Error, Result};
use crate::pipeline::TransferRequest;

mod location;
mod session;
mod ssh;

pub use location::{RemoteLocation, path_on_host};
pub use session::{ConnectError, ConnectParams, Connector, RemoteSession};
pub use ssh::{Ssh2Connector, Ssh2Session};

use session::SessionConnection;

pub struct ScpChannel {
    connector: Arc<dyn Connector>,
    credentials: CredentialResolver,
}

impl std::fmt::Debug for ScpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScpChannel")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl ScpChannel {
    pub fn new(credentials: CredentialResolver) -> Self {
        Self::with_connector(Arc::new(Ssh2Connector), credentials)
    }

    pub fn with_connector(connector: Arc<dyn Connector>, credentials: CredentialResolver) -> Self {
        Self {
            connector,
            credentials,
        }
    }

    /// Host, remote paths and connection parameters for `request`.
    async fn resolve(&self, request: &TransferRequest) -> Result<(ConnectParams, Vec<String>)> {
        let options = &request.options;
        let mut username = options.username.clone();
        let mut password = options.password.clone();

        let (host, paths) = match &options.host {
            Some(host) => (host.clone(), request.locations.clone()),
            None => {
                let first = request.locations.first().ok_or_else(|| {
                    Error::MalformedRemoteLocation {
                        location: String::new(),
                    }
                })?;
                let parsed = RemoteLocation::parse(first)?;
                username = parsed.username.or(username);
                password = parsed.password.or(password);
                let mut paths = vec![parsed.path];
                paths.extend(
                    request.locations[1..]
                        .iter()
                        .map(|l| path_on_host(l, &parsed.host)),
                );
                (parsed.host, paths)
            }
        };

        let prompter = request.adapter.prompter();
        let username = match username {
            Some(username) => username,
            None => prompter.username(&host).await?,
        };

        let mut private_key = options.private_key.clone();
        let mut passphrase = options.passphrase.clone();
        if private_key.is_none() {
            if let Some(resolved) = self.credentials.resolve(&host).await {
                private_key = Some(resolved.key);
                passphrase = passphrase.or(resolved.passphrase);
            }
        }

        let params = ConnectParams {
            host,
            port: options.port,
            username,
            password,
            private_key,
            passphrase,
            ready_timeout: options.ready_timeout,
        };
        Ok((params, paths))
    }
}

#[async_trait]
impl Channel for ScpChannel {
    async fn read_streams(&self, request: &TransferRequest) -> Result<Acquisition> {
        let (params, paths) = self.resolve(request).await?;
        let initial_passphrase = params.passphrase.clone();

        let prompter = request.adapter.prompter();
        let (session, params) =
            session::establish(self.connector.as_ref(), params, prompter.as_ref()).await?;
        // A caller-supplied key is not the one cached for the host.
        if let (Some(passphrase), None) = (&params.passphrase, &request.options.private_key) {
            if params.passphrase != initial_passphrase {
                self.credentials.remember_passphrase(&params.host, passphrase);
            }
        }

        let host = params.host.as_str();
        let outcomes = future::join_all(paths.iter().map(|path| {
            let session = Arc::clone(&session);
            async move {
                let size = session.stat(path).await.map_err(|e| Error::RemoteStatFailed {
                    path: path.clone(),
                    source: e,
                })?;
                let stream = session
                    .open_read(path)
                    .await
                    .map_err(|e| Error::transport(path.as_str(), e))?;
                tracing::debug!(host = %host, path = %path, ?size, "opened remote file");
                Ok::<_, Error>(FileHandle::new(location_file_name(path), path.as_str(), size, stream))
            }
        }))
        .await;

        let mut acquisition = Acquisition {
            connection: Some(Arc::new(SessionConnection::new(session)) as Arc<dyn Connection>),
            ..Acquisition::default()
        };
        for (path, outcome) in paths.into_iter().zip(outcomes) {
            match outcome {
                Ok(file) => acquisition.files.push(file),
                Err(error) => {
                    tracing::warn!(path = %path, error = %error, "remote file unavailable");
                    acquisition.failures.push(FileFailure {
                        location: path,
                        error,
                    });
                }
            }
        }
        Ok(acquisition)
    }
}
