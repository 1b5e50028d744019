//! Host-scoped private keys.
//!
//! Key selection is configured in `~/.haulrc.toml` (or `HAUL_*` variables):
//!
//! ```toml
//! ssh_dir = "/home/me/.ssh"
//!
//! [hosts]
//! "^build\\." = "build_ed25519"
//! ```
//!
//! The default key is `<ssh_dir>/id_rsa`; every pattern matching the host
//! overrides it, so the last match wins. Patterns are visited in key order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const RC_FILE: &str = ".haulrc.toml";
const ENV_PREFIX: &str = "HAUL_";
const DEFAULT_KEY: &str = "id_rsa";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub ssh_dir: PathBuf,
    #[serde(default)]
    pub hosts: BTreeMap<String, PathBuf>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            ssh_dir: home::home_dir().unwrap_or_default().join(".ssh"),
            hosts: BTreeMap::new(),
        }
    }
}

impl CredentialConfig {
    /// Load from `~/.haulrc.toml` and the environment.
    pub fn load() -> Result<Self> {
        let rc = home::home_dir().unwrap_or_default().join(RC_FILE);
        Self::figment(rc).extract().map_err(Error::from)
    }

    /// Defaults, then the TOML file at `rc`, then `HAUL_*` variables.
    pub fn figment(rc: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(rc.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
    }
}

/// A private key and the passphrase known for it.
#[derive(Clone)]
pub struct CachedKey {
    pub key: Arc<[u8]>,
    pub passphrase: Option<String>,
}

impl fmt::Debug for CachedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedKey")
            .field("key", &format_args!("{} bytes", self.key.len()))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Process-wide key cache, shared by reference between resolvers.
#[derive(Debug, Default)]
pub struct CredentialCache {
    by_file: Mutex<HashMap<PathBuf, CachedKey>>,
    by_host: Mutex<HashMap<String, PathBuf>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self, file: &Path) -> Option<CachedKey> {
        lock(&self.by_file).get(file).cloned()
    }

    pub fn key_file(&self, host: &str) -> Option<PathBuf> {
        lock(&self.by_host).get(host).cloned()
    }

    fn insert_key(&self, file: PathBuf, key: CachedKey) {
        lock(&self.by_file).insert(file, key);
    }

    fn insert_host(&self, host: &str, file: PathBuf) {
        lock(&self.by_host).insert(host.to_string(), file);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Key material resolved for a host.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub file: PathBuf,
    pub key: Arc<[u8]>,
    pub passphrase: Option<String>,
}

#[derive(Clone)]
pub struct CredentialResolver {
    ssh_dir: PathBuf,
    hosts: Vec<(Regex, PathBuf)>,
    cache: Arc<CredentialCache>,
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("ssh_dir", &self.ssh_dir)
            .field("hosts", &self.hosts.len())
            .finish_non_exhaustive()
    }
}

impl CredentialResolver {
    pub fn new(config: CredentialConfig, cache: Arc<CredentialCache>) -> Result<Self> {
        let hosts = config
            .hosts
            .into_iter()
            .map(|(pattern, file)| {
                Regex::new(&pattern)
                    .map(|re| (re, file))
                    .map_err(|e| Error::from(figment::Error::from(format!("host pattern `{pattern}`: {e}"))))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            ssh_dir: config.ssh_dir,
            hosts,
            cache,
        })
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    /// Key file configured for `host`.
    pub fn key_file(&self, host: &str) -> PathBuf {
        if let Some(file) = self.cache.key_file(host) {
            return file;
        }
        let mut file = self.ssh_dir.join(DEFAULT_KEY);
        for (pattern, candidate) in &self.hosts {
            if pattern.is_match(host) {
                file = self.ssh_dir.join(candidate);
            }
        }
        self.cache.insert_host(host, file.clone());
        file
    }

    /// Key for `host`, or `None` when the key file cannot be read.
    pub async fn resolve(&self, host: &str) -> Option<ResolvedKey> {
        let file = self.key_file(host);
        if let Some(cached) = self.cache.key(&file) {
            return Some(ResolvedKey {
                file,
                key: cached.key,
                passphrase: cached.passphrase,
            });
        }

        match tokio::fs::read(&file).await {
            Ok(bytes) => {
                let key: Arc<[u8]> = Arc::from(bytes);
                self.cache.insert_key(
                    file.clone(),
                    CachedKey {
                        key: Arc::clone(&key),
                        passphrase: None,
                    },
                );
                tracing::debug!(host = %host, path = %file.display(), "loaded private key");
                Some(ResolvedKey {
                    file,
                    key,
                    passphrase: None,
                })
            }
            Err(e) => {
                tracing::debug!(host = %host, path = %file.display(), error = %e, "no private key");
                None
            }
        }
    }

    /// Record the passphrase that unlocked the key used for `host`.
    pub fn remember_passphrase(&self, host: &str, passphrase: &str) {
        let file = self.key_file(host);
        if let Some(cached) = self.cache.key(&file) {
            self.cache.insert_key(
                file,
                CachedKey {
                    key: cached.key,
                    passphrase: Some(passphrase.to_string()),
                },
            );
        }
    }
}
