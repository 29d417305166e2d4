use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

use http::uri::{Authority, Scheme, Uri};
use thiserror::Error;

/// Errors related to backend handling.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BackendError {
    /// The upstream URL could not be parsed or is missing required parts.
    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// A validated upstream address (scheme + authority).
///
/// Only `http` and `https` upstreams are accepted. The parsed parts are kept
/// so the forwarder can rewrite request URIs without re-parsing per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamUrl {
    scheme: Scheme,
    authority: Authority,
}

impl UpstreamUrl {
    /// Parse and validate an upstream URL such as `http://10.0.0.4:8081`.
    pub fn new(url: &str) -> BackendResult<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| BackendError::InvalidUrl(format!("{url}: {e}")))?;

        let scheme = match uri.scheme() {
            Some(s) if *s == Scheme::HTTP || *s == Scheme::HTTPS => s.clone(),
            Some(other) => {
                return Err(BackendError::InvalidUrl(format!(
                    "Upstream URL must use http or https, got: {other}"
                )));
            }
            None => {
                return Err(BackendError::InvalidUrl(format!(
                    "Upstream URL is missing a scheme: {url}"
                )));
            }
        };

        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| BackendError::InvalidUrl(format!("Upstream URL has no host: {url}")))?;

        Ok(Self { scheme, authority })
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }
}

impl FromStr for UpstreamUrl {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpstreamUrl::new(s)
    }
}

impl fmt::Display for UpstreamUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}

/// One upstream instance serving a logical service.
///
/// The liveness flag starts `true` and is the only mutable part: the
/// forwarder demotes a backend on transport error, the discovery watcher
/// re-promotes it while discovery still lists the instance.
#[derive(Debug)]
pub struct Backend {
    id: String,
    url: UpstreamUrl,
    alive: AtomicBool,
}

impl Backend {
    pub fn new(id: impl Into<String>, url: UpstreamUrl) -> Self {
        Self {
            id: id.into(),
            url,
            alive: AtomicBool::new(true),
        }
    }

    /// Stable instance id assigned by service discovery.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &UpstreamUrl {
        &self.url
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    /// Error hook invoked by the forwarder when a proxied request fails at
    /// the transport layer. The backend stays out of selection until the
    /// next discovery pass re-lists it.
    pub fn mark_failed(&self) {
        self.set_alive(false);
        tracing::warn!(backend_id = %self.id, url = %self.url, "backend marked dead after transport error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_url_valid() {
        let url = UpstreamUrl::new("http://10.1.2.3:8081").expect("valid http URL should parse");
        assert_eq!(url.authority().as_str(), "10.1.2.3:8081");
        assert!(!url.is_secure());

        let secure = UpstreamUrl::new("https://svc.internal:8443").expect("valid https URL");
        assert!(secure.is_secure());
    }

    #[test]
    fn test_upstream_url_invalid() {
        assert!(UpstreamUrl::new("10.1.2.3:8081").is_err());
        assert!(UpstreamUrl::new("ftp://example.com").is_err());
        assert!(UpstreamUrl::new("http://").is_err());
    }

    #[test]
    fn test_upstream_url_display_round_trip() {
        let url: UpstreamUrl = "http://backend:9000".parse().expect("parse should succeed");
        assert_eq!(url.to_string(), "http://backend:9000");
    }

    #[test]
    fn test_backend_liveness_transitions() {
        let url = UpstreamUrl::new("http://127.0.0.1:8081").unwrap();
        let backend = Backend::new("svc-1", url);

        assert!(backend.is_alive());

        backend.mark_failed();
        assert!(!backend.is_alive());

        backend.set_alive(true);
        assert!(backend.is_alive());
    }
}
