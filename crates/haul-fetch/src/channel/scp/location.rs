use crate::error::{Error, Result};

/// A parsed `[user[:pass]@]host:path` location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteLocation {
    pub host: String,
    pub path: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RemoteLocation {
    pub fn parse(location: &str) -> Result<Self> {
        let malformed = || Error::MalformedRemoteLocation {
            location: location.to_string(),
        };

        let (auth, server) = match location.split_once('@') {
            Some((auth, server)) => (Some(auth), server),
            None => (None, location),
        };
        let (host, path) = server.split_once(':').ok_or_else(malformed)?;
        if host.is_empty() || path.is_empty() {
            return Err(malformed());
        }

        let (username, password) = match auth.map(|a| a.split_once(':').unwrap_or((a, ""))) {
            Some((user, pass)) => (non_empty(user), non_empty(pass)),
            None => (None, None),
        };

        Ok(Self {
            host: host.to_string(),
            path: path.to_string(),
            username,
            password,
        })
    }
}

/// Remote path for a location on an already known `host`.
///
/// A `host:` prefix (with or without credentials) naming the same host is
/// removed; anything else is taken as a path on that host.
pub fn path_on_host(location: &str, host: &str) -> String {
    match RemoteLocation::parse(location) {
        Ok(parsed) if parsed.host == host => parsed.path,
        _ => location.to_string(),
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}
