//! Remote session contract and the connect / passphrase retry loop.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::{ByteStream, Connection};
use crate::error::{Error, Result};
use crate::prompt::Prompter;

/// libssh2 `LIBSSH2_ERROR_FILE`, raised for unreadable or locked key files.
const ERROR_FILE: i32 = -16;
/// libssh2 `LIBSSH2_ERROR_AUTHENTICATION_FAILED`.
const ERROR_AUTHENTICATION_FAILED: i32 = -18;
/// libssh2 `LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED`.
const ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;

const PASSPHRASE_SIGNATURES: &[&str] = &[
    "Encrypted private key detected, but no passphrase given",
    "Unable to parse private key",
    "Wrong passphrase",
];

/// Everything needed to open one authenticated session.
#[derive(Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<Arc<[u8]>>,
    pub passphrase: Option<String>,
    pub ready_timeout: Duration,
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key.as_ref().map(|k| k.len()))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .field("ready_timeout", &self.ready_timeout)
            .finish()
    }
}

/// Classified failure of a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Credentials were rejected. Terminal.
    Authentication(String),
    /// The key is locked or could not be parsed without a passphrase.
    Passphrase(String),
    Transport(String),
}

impl ConnectError {
    /// Classify a libssh2 error by code and message.
    pub fn classify(code: Option<i32>, message: &str) -> Self {
        let message_owned = message.to_string();
        if code == Some(ERROR_FILE) || PASSPHRASE_SIGNATURES.iter().any(|s| message.contains(s)) {
            return ConnectError::Passphrase(message_owned);
        }
        match code {
            Some(ERROR_AUTHENTICATION_FAILED) | Some(ERROR_PUBLICKEY_UNVERIFIED) => {
                ConnectError::Authentication(message_owned)
            }
            _ => ConnectError::Transport(message_owned),
        }
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Authentication(m) => write!(f, "authentication: {m}"),
            ConnectError::Passphrase(m) => write!(f, "passphrase: {m}"),
            ConnectError::Transport(m) => write!(f, "transport: {m}"),
        }
    }
}

/// One SSH connection with its SFTP sub-session.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Connect, authenticate and open the SFTP sub-session.
    async fn connect(&self, params: &ConnectParams) -> std::result::Result<(), ConnectError>;

    /// Size of the remote file, if the server reports one.
    async fn stat(&self, path: &str) -> io::Result<Option<u64>>;

    async fn open_read(&self, path: &str) -> io::Result<ByteStream>;

    /// Drop the SFTP sub-session and the connection. Idempotent.
    async fn close(&self);
}

/// Factory for unconnected sessions.
pub trait Connector: Send + Sync {
    fn create(&self) -> Arc<dyn RemoteSession>;
}

/// [`Connection`] wrapper handed back to the request. Only the first
/// close reaches the session.
pub(crate) struct SessionConnection {
    session: Arc<dyn RemoteSession>,
    closed: AtomicBool,
}

impl SessionConnection {
    pub(crate) fn new(session: Arc<dyn RemoteSession>) -> Self {
        Self {
            session,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Connection for SessionConnection {
    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.session.close().await;
        }
    }
}

/// Open a ready session, prompting for a passphrase as long as the key
/// stays locked.
///
/// Every failed attempt's session is closed before the next one is created,
/// so a closed session is never reused. Returns the session together with
/// the parameters that succeeded.
pub(crate) async fn establish(
    connector: &dyn Connector,
    mut params: ConnectParams,
    prompter: &dyn Prompter,
) -> Result<(Arc<dyn RemoteSession>, ConnectParams)> {
    loop {
        let session = connector.create();
        tracing::debug!(host = %params.host, user = %params.username, "connecting");

        let attempt = tokio::time::timeout(params.ready_timeout, session.connect(&params)).await;
        let error = match attempt {
            Ok(Ok(())) => {
                tracing::debug!(host = %params.host, "session ready");
                return Ok((session, params));
            }
            Ok(Err(error)) => error,
            Err(_) => ConnectError::Transport(format!(
                "timed out after {:?} waiting for the session",
                params.ready_timeout
            )),
        };

        match error {
            ConnectError::Passphrase(message) => {
                tracing::debug!(host = %params.host, %message, "private key needs a passphrase");
                let answer = prompter.passphrase(&params.host).await;
                session.close().await;
                match answer? {
                    Some(passphrase) => params.passphrase = Some(passphrase),
                    None => {
                        return Err(Error::PassphraseRequired { host: params.host });
                    }
                }
            }
            ConnectError::Authentication(message) => {
                session.close().await;
                tracing::info!(host = %params.host, %message, "authentication failed");
                return Err(Error::AuthenticationFailed {
                    host: params.host,
                    message,
                });
            }
            ConnectError::Transport(message) => {
                session.close().await;
                return Err(Error::transport(
                    format!("{}:{}", params.host, params.port),
                    io::Error::other(message),
                ));
            }
        }
    }
}
