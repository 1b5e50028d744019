use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use haul_archive::ExtractOptions;

use crate::channel::HTTP;
use crate::progress::Adapter;
use crate::transform::{Rename, Transform};

/// Per-transfer configuration.
///
/// # Examples
///
/// ```
/// use haul_fetch::{Rename, TransferOptions};
///
/// let options = TransferOptions::default()
///     .channel("scp")
///     .username("deploy")
///     .extract(true)
///     .rename(Rename::To("release".into()))
///     .force(true);
/// ```
#[derive(Clone)]
pub struct TransferOptions {
    /// Name of the registered channel. Default: `http`.
    pub channel: String,

    /// Archive extraction applied after staging.
    pub extract: Option<ExtractOptions>,

    pub rename: Option<Rename>,

    /// Replace existing files without asking.
    pub force: bool,

    pub username: Option<String>,
    pub password: Option<String>,
    pub private_key: Option<Arc<[u8]>>,
    pub passphrase: Option<String>,

    /// Remote host when locations are plain paths (SCP only).
    pub host: Option<String>,
    /// Default: 22.
    pub port: u16,
    /// How long an SCP connection may take to become ready. Default: 20s.
    pub ready_timeout: Duration,

    /// Extra transforms, run after extract and rename.
    pub transforms: Vec<Arc<dyn Transform>>,

    /// Overrides the downloader's adapter for this transfer.
    pub adapter: Option<Adapter>,
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hidden = |set: bool| if set { Some("***") } else { None };
        f.debug_struct("TransferOptions")
            .field("channel", &self.channel)
            .field("extract", &self.extract)
            .field("rename", &self.rename)
            .field("force", &self.force)
            .field("username", &self.username)
            .field("password", &hidden(self.password.is_some()))
            .field("private_key", &hidden(self.private_key.is_some()))
            .field("passphrase", &hidden(self.passphrase.is_some()))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ready_timeout", &self.ready_timeout)
            .field(
                "transforms",
                &self.transforms.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("adapter", &self.adapter)
            .finish()
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            channel: HTTP.to_string(),
            extract: None,
            rename: None,
            force: false,
            username: None,
            password: None,
            private_key: None,
            passphrase: None,
            host: None,
            port: 22,
            ready_timeout: Duration::from_secs(20),
            transforms: Vec::new(),
            adapter: None,
        }
    }
}

impl TransferOptions {
    #[must_use]
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Extract archives with default options.
    #[must_use]
    pub fn extract(mut self, extract: bool) -> Self {
        self.extract = extract.then(ExtractOptions::default);
        self
    }

    #[must_use]
    pub fn extract_with(mut self, options: ExtractOptions) -> Self {
        self.extract = Some(options);
        self
    }

    #[must_use]
    pub fn rename(mut self, rename: Rename) -> Self {
        self.rename = Some(rename);
        self
    }

    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn private_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.private_key = Some(Arc::from(key.into()));
        self
    }

    #[must_use]
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Append a transform.
    #[must_use]
    pub fn transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    #[must_use]
    pub fn adapter(mut self, adapter: Adapter) -> Self {
        self.adapter = Some(adapter);
        self
    }
}
