#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use haul_fetch::channel::ByteStream;
use haul_fetch::channel::scp::{ConnectError, ConnectParams, Connector, RemoteSession};
use haul_fetch::{
    Acquisition, Adapter, Channel, Connection, CredentialCache, CredentialConfig,
    CredentialResolver, FileHandle, Prompter, Result, TrackedFile, TransferRequest,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Canned response for one path of the loopback server.
#[derive(Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_length: bool,
    /// Advertised length when it should differ from the body.
    pub declared_length: Option<usize>,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            content_length: true,
            declared_length: None,
        }
    }

    /// Advertises `declared` bytes, sends `body`, then hangs up.
    pub fn truncated(body: impl Into<Vec<u8>>, declared: usize) -> Self {
        Self {
            declared_length: Some(declared),
            ..Self::ok(body)
        }
    }

    pub fn chunked(body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_length: false,
            ..Self::ok(body)
        }
    }
}

/// Minimal HTTP/1.1 server on 127.0.0.1. Unknown paths answer 404.
///
/// Returns the base URL, e.g. `http://127.0.0.1:41234`.
pub async fn serve(routes: Vec<(&str, Route)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes: Arc<HashMap<String, Route>> = Arc::new(
        routes
            .into_iter()
            .map(|(path, route)| (path.to_string(), route))
            .collect(),
    );

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let routes = Arc::clone(&routes);
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&head);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();

                let route = routes.get(&path).cloned().unwrap_or(Route {
                    status: 404,
                    body: b"not found".to_vec(),
                    content_length: true,
                    declared_length: None,
                });
                let reason = if route.status == 200 { "OK" } else { "Error" };
                let mut response = format!("HTTP/1.1 {} {reason}\r\nConnection: close\r\n", route.status);
                if route.content_length {
                    response.push_str(&format!(
                        "Content-Length: {}\r\n",
                        route.declared_length.unwrap_or(route.body.len())
                    ));
                }
                response.push_str("\r\n");

                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.write_all(&route.body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

/// Prompter answering from a script and counting every question.
#[derive(Default)]
pub struct ScriptedPrompter {
    pub username: Option<String>,
    pub passphrases: Mutex<VecDeque<Option<String>>>,
    pub overwrite: bool,
    pub username_calls: AtomicUsize,
    pub passphrase_calls: AtomicUsize,
    pub overwrite_calls: AtomicUsize,
}

impl ScriptedPrompter {
    pub fn overwrite(answer: bool) -> Self {
        Self {
            overwrite: answer,
            ..Self::default()
        }
    }

    pub fn passphrases<I>(answers: I) -> Self
    where
        I: IntoIterator<Item = Option<&'static str>>,
    {
        Self {
            passphrases: Mutex::new(
                answers
                    .into_iter()
                    .map(|a| a.map(str::to_string))
                    .collect(),
            ),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn username(&self, _host: &str) -> Result<String> {
        self.username_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.username.clone().unwrap_or_else(|| "prompted".into()))
    }

    async fn passphrase(&self, _host: &str) -> Result<Option<String>> {
        self.passphrase_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.passphrases.lock().unwrap().pop_front().flatten())
    }

    async fn confirm_overwrite(&self, _name: &str) -> Result<bool> {
        self.overwrite_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.overwrite)
    }
}

/// Silent adapter using `prompter`, with trackers attached and every
/// progress call recorded.
pub fn recording_adapter(
    prompter: Arc<dyn Prompter>,
) -> (Adapter, Arc<Mutex<Vec<Vec<TrackedFile>>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    let adapter = Adapter::silent()
        .with_prompter(prompter)
        .with_progress_fn(move |files: &[TrackedFile]| sink.lock().unwrap().push(files.to_vec()));
    (adapter, calls)
}

/// Session over an in-memory file table.
pub struct MockSession {
    pub id: usize,
    outcome: Mutex<Option<std::result::Result<(), ConnectError>>>,
    files: HashMap<String, Vec<u8>>,
    pub seen: Mutex<Option<ConnectParams>>,
    pub closes: AtomicUsize,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn connect(&self, params: &ConnectParams) -> std::result::Result<(), ConnectError> {
        *self.seen.lock().unwrap() = Some(params.clone());
        self.outcome.lock().unwrap().take().unwrap_or(Ok(()))
    }

    async fn stat(&self, path: &str) -> io::Result<Option<u64>> {
        match self.files.get(path) {
            Some(body) => Ok(Some(body.len() as u64)),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
        }
    }

    async fn open_read(&self, path: &str) -> io::Result<ByteStream> {
        let body = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        Ok(stream::once(async move { Ok(Bytes::from(body)) }).boxed())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector handing out [`MockSession`]s whose connect results follow a
/// script; once the script runs out every connect succeeds.
#[derive(Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<std::result::Result<(), ConnectError>>>,
    files: HashMap<String, Vec<u8>>,
    pub sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockConnector {
    pub fn new<I>(script: I, files: &[(&str, &str)]) -> Self
    where
        I: IntoIterator<Item = std::result::Result<(), ConnectError>>,
    {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            files: files
                .iter()
                .map(|(path, body)| (path.to_string(), body.as_bytes().to_vec()))
                .collect(),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    fn create(&self) -> Arc<dyn RemoteSession> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = Arc::new(MockSession {
            id: sessions.len(),
            outcome: Mutex::new(self.script.lock().unwrap().pop_front()),
            files: self.files.clone(),
            seen: Mutex::new(None),
            closes: AtomicUsize::new(0),
        });
        sessions.push(Arc::clone(&session));
        session
    }
}

/// Resolver reading keys from an empty temporary ssh dir.
pub fn empty_credentials(ssh_dir: &std::path::Path) -> CredentialResolver {
    let config = CredentialConfig {
        ssh_dir: ssh_dir.to_path_buf(),
        hosts: Default::default(),
    };
    CredentialResolver::new(config, Arc::new(CredentialCache::new())).unwrap()
}

/// Connection counting its closes.
pub struct CountingConnection(pub Arc<AtomicUsize>);

#[async_trait]
impl Connection for CountingConnection {
    async fn close(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Channel serving fixed bodies keyed by location, logging when each
/// acquisition starts and ends and when each chunk is produced.
pub struct MemoryChannel {
    pub label: &'static str,
    pub files: HashMap<String, Vec<&'static [u8]>>,
    pub acquire_delay: Duration,
    pub chunk_delay: Duration,
    pub events: Arc<Mutex<Vec<String>>>,
    pub closes: Arc<AtomicUsize>,
}

impl MemoryChannel {
    pub fn new(label: &'static str, events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            label,
            files: HashMap::new(),
            acquire_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            events,
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn delays(mut self, acquire: Duration, chunk: Duration) -> Self {
        self.acquire_delay = acquire;
        self.chunk_delay = chunk;
        self
    }

    pub fn file(mut self, location: &str, chunks: Vec<&'static [u8]>) -> Self {
        self.files.insert(location.to_string(), chunks);
        self
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn read_streams(&self, request: &TransferRequest) -> Result<Acquisition> {
        self.events.lock().unwrap().push(format!("{}:acquire", self.label));
        tokio::time::sleep(self.acquire_delay).await;

        let mut acquisition = Acquisition {
            connection: Some(Arc::new(CountingConnection(Arc::clone(&self.closes))) as Arc<dyn Connection>),
            ..Acquisition::default()
        };
        for location in &request.locations {
            let chunks = self.files.get(location).cloned().unwrap_or_default();
            let size = chunks.iter().map(|c| c.len() as u64).sum();
            let events = Arc::clone(&self.events);
            let label = self.label;
            let delay = self.chunk_delay;
            let body = stream::iter(chunks)
                .then(move |chunk| {
                    let events = Arc::clone(&events);
                    async move {
                        tokio::time::sleep(delay).await;
                        events.lock().unwrap().push(format!("{label}:chunk"));
                        Ok::<_, io::Error>(Bytes::from_static(chunk))
                    }
                })
                .boxed();
            let name = location.rsplit('/').next().unwrap_or(location);
            acquisition
                .files
                .push(FileHandle::new(name, location.as_str(), Some(size), body));
        }

        self.events.lock().unwrap().push(format!("{}:acquired", self.label));
        Ok(acquisition)
    }
}
