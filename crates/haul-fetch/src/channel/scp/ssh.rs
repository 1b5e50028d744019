use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use ssh2::{ErrorCode, Session, Sftp};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::session::{ConnectError, ConnectParams, Connector, RemoteSession};
use crate::channel::ByteStream;

const READ_CHUNK: usize = 32 * 1024;

/// [`Connector`] producing libssh2 sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ssh2Connector;

impl Connector for Ssh2Connector {
    fn create(&self) -> Arc<dyn RemoteSession> {
        Arc::new(Ssh2Session::default())
    }
}

struct Live {
    session: Session,
    sftp: Option<Sftp>,
}

#[derive(Default)]
struct Inner {
    live: Mutex<Option<Live>>,
    closed: AtomicBool,
}

impl Inner {
    fn live(&self) -> std::sync::MutexGuard<'_, Option<Live>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_sftp<T>(&self, f: impl FnOnce(&Sftp) -> Result<T, ssh2::Error>) -> io::Result<T> {
        let live = self.live();
        let sftp = live
            .as_ref()
            .and_then(|l| l.sftp.as_ref())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "sftp session is closed"))?;
        f(sftp).map_err(io::Error::from)
    }
}

/// libssh2 session driven from the blocking pool.
#[derive(Default)]
pub struct Ssh2Session {
    inner: Arc<Inner>,
}

#[async_trait]
impl RemoteSession for Ssh2Session {
    async fn connect(&self, params: &ConnectParams) -> Result<(), ConnectError> {
        let inner = Arc::clone(&self.inner);
        let params = params.clone();
        tokio::task::spawn_blocking(move || {
            let live = open(&params)?;
            let mut slot = inner.live();
            // Closed while the handshake was running, e.g. after a timeout.
            if inner.closed.load(Ordering::SeqCst) {
                drop(slot);
                disconnect(live);
                return Err(ConnectError::Transport("session closed while connecting".into()));
            }
            *slot = Some(live);
            Ok(())
        })
        .await
        .map_err(|e| ConnectError::Transport(e.to_string()))?
    }

    async fn stat(&self, path: &str) -> io::Result<Option<u64>> {
        let inner = Arc::clone(&self.inner);
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            inner.with_sftp(|sftp| sftp.stat(Path::new(&path)).map(|stat| stat.size))
        })
        .await
        .map_err(io::Error::other)?
    }

    async fn open_read(&self, path: &str) -> io::Result<ByteStream> {
        let inner = Arc::clone(&self.inner);
        let path = path.to_string();
        let file = tokio::task::spawn_blocking(move || {
            inner.with_sftp(|sftp| sftp.open(Path::new(&path)))
        })
        .await
        .map_err(io::Error::other)??;

        let (tx, rx) = mpsc::channel(8);
        tokio::task::spawn_blocking(move || pump(file, tx));
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let Some(live) = self.inner.live().take() else {
            return;
        };
        tracing::debug!("closing ssh session");
        if let Err(e) = tokio::task::spawn_blocking(move || disconnect(live)).await {
            tracing::warn!(error = %e, "ssh disconnect task failed");
        }
    }
}

fn open(params: &ConnectParams) -> Result<Live, ConnectError> {
    let tcp = TcpStream::connect((params.host.as_str(), params.port))
        .map_err(|e| ConnectError::Transport(e.to_string()))?;
    let mut session = Session::new().map_err(|e| classify(&e))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| classify(&e))?;

    authenticate(&session, params)?;

    let sftp = session.sftp().map_err(|e| classify(&e))?;
    Ok(Live {
        session,
        sftp: Some(sftp),
    })
}

fn authenticate(session: &Session, params: &ConnectParams) -> Result<(), ConnectError> {
    if let Some(key) = &params.private_key {
        let mut key_file =
            tempfile::NamedTempFile::new().map_err(|e| ConnectError::Transport(e.to_string()))?;
        key_file
            .write_all(key)
            .and_then(|()| key_file.flush())
            .map_err(|e| ConnectError::Transport(e.to_string()))?;

        match session.userauth_pubkey_file(
            &params.username,
            None,
            key_file.path(),
            params.passphrase.as_deref(),
        ) {
            Ok(()) => return Ok(()),
            Err(e) => {
                let error = classify(&e);
                if params.password.is_none() || matches!(error, ConnectError::Passphrase(_)) {
                    return Err(error);
                }
                tracing::debug!(error = %error, "key rejected, trying password");
            }
        }
    }

    if let Some(password) = &params.password {
        session
            .userauth_password(&params.username, password)
            .map_err(|e| classify(&e))?;
    }

    if session.authenticated() {
        Ok(())
    } else {
        Err(ConnectError::Authentication(
            "no usable private key or password".into(),
        ))
    }
}

fn classify(error: &ssh2::Error) -> ConnectError {
    let code = match error.code() {
        ErrorCode::Session(code) => Some(code),
        ErrorCode::SFTP(_) => None,
    };
    ConnectError::classify(code, error.message())
}

fn disconnect(mut live: Live) {
    drop(live.sftp.take());
    if let Err(e) = live.session.disconnect(None, "closing", None) {
        tracing::debug!(error = %e, "ssh disconnect failed");
    }
}

fn pump(mut file: ssh2::File, tx: mpsc::Sender<io::Result<Bytes>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let item = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
            Err(e) => Err(e),
        };
        let failed = item.is_err();
        if tx.blocking_send(item).is_err() || failed {
            break;
        }
    }
}
