//! Pluggable per-scheme transports.
//!
//! A [`Transport`] performs one request without following redirects or
//! touching cookies, and hands back the status, headers and an undecoded body
//! stream. The agent layers everything else on top.

mod file;
mod http;

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use reqwest::Method;
use reqwest::header::HeaderMap;
use thiserror::Error;
use url::Url;

use crate::config::{AgentConfig, ConfigError};

pub use file::FileTransport;
pub use http::HttpTransport;

/// Undecoded body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// Errors raised by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection-level failure (DNS, refused, TLS, reset).
    #[error("network error requesting {uri}: {source}")]
    Network {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout requesting {uri}")]
    Timeout { uri: String },

    /// Local I/O failure, or an interrupted stream from a custom transport.
    #[error("I/O error requesting {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Classifies a reqwest error, separating timeouts.
    pub fn from_reqwest(uri: &Url, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                uri: uri.to_string(),
            }
        } else {
            Self::Network {
                uri: uri.to_string(),
                source,
            }
        }
    }

    pub fn io(uri: &Url, source: std::io::Error) -> Self {
        Self::Io {
            uri: uri.to_string(),
            source,
        }
    }
}

/// One outgoing request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub uri: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

/// Status, headers and the raw body stream.
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Connection factory for one or more URI schemes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns once response headers are available.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no response could be obtained.
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Scheme to transport mapping.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.transports.keys().collect();
        schemes.sort();
        f.debug_struct("TransportRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

impl TransportRegistry {
    /// `http`/`https` over reqwest and `file` over the local filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when proxy or TLS settings cannot be applied.
    pub fn with_defaults(config: &AgentConfig) -> Result<Self, ConfigError> {
        let http: Arc<dyn Transport> = Arc::new(HttpTransport::from_config(config)?);
        let mut registry = Self::default();
        registry.register("http", Arc::clone(&http));
        registry.register("https", http);
        registry.register("file", Arc::new(FileTransport));
        Ok(registry)
    }

    /// Registers (or replaces) the transport for `scheme`.
    pub fn register(&mut self, scheme: &str, transport: Arc<dyn Transport>) {
        self.transports.insert(scheme.to_ascii_lowercase(), transport);
    }

    #[must_use]
    pub fn get(&self, scheme: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(&scheme.to_ascii_lowercase()).cloned()
    }

    #[must_use]
    pub fn supports(&self, scheme: &str) -> bool {
        self.transports.contains_key(&scheme.to_ascii_lowercase())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schemes() {
        let registry = TransportRegistry::with_defaults(&AgentConfig::default()).unwrap();
        assert!(registry.supports("http"));
        assert!(registry.supports("HTTPS"));
        assert!(registry.supports("file"));
        assert!(!registry.supports("ftp"));
        assert!(registry.get("ftp").is_none());
    }

    #[test]
    fn test_register_custom_scheme() {
        let mut registry = TransportRegistry::default();
        registry.register("Data", Arc::new(FileTransport));
        assert!(registry.supports("data"));
        assert!(format!("{registry:?}").contains("data"));
    }
}
