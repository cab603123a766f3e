//! Error taxonomy surfaced by [`Agent`](crate::Agent).
//!
//! Module-level errors are wrapped as-is; the remaining variants carry the
//! context a caller needs to recover (the last page, the partial body, the
//! realms that were offered).

use std::sync::Arc;

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::cookies::CookieError;
use crate::decode::DecodeError;
use crate::page::{ElementNotFound, Page};
use crate::transport::TransportError;

/// Errors from a fetch or navigation.
#[derive(Debug, Error)]
pub enum AgentError {
    /// 401 with no usable credentials, or 403.
    #[error("unauthorized (HTTP {status}) for {uri}{}", format_realms(.realms))]
    Unauthorized {
        uri: String,
        status: u16,
        /// Realm names offered by the server's challenges.
        realms: Vec<String>,
    },

    /// Another redirect or refresh was needed after the hop limit was used up.
    #[error("redirect limit of {hops} hops reached at {}", .page.uri())]
    RedirectLimitReached {
        /// The last response received, not pushed to history.
        page: Arc<Page>,
        hops: usize,
    },

    /// Status outside 2xx that is not followed and not allowed.
    #[error("unexpected HTTP {status} for {}", .page.uri())]
    ResponseCode { page: Arc<Page>, status: u16 },

    /// The body ended before `Content-Length` bytes, or the stream failed.
    #[error(
        "response body for {uri} incomplete: received {received} bytes{}",
        .expected.map(|e| format!(" of {e}")).unwrap_or_default()
    )]
    ResponseRead {
        uri: String,
        expected: Option<u64>,
        received: u64,
        /// Bytes read before the failure, still encoded.
        partial: Vec<u8>,
        #[source]
        source: Option<TransportError>,
    },

    /// A chunked or close-delimited body was cut off.
    #[error("chunked body for {uri} terminated early after {} bytes", .partial.len())]
    ChunkedTermination {
        uri: String,
        partial: Vec<u8>,
        #[source]
        source: TransportError,
    },

    /// No transport is registered for the destination scheme, or a web page
    /// pointed the agent at a non-web scheme.
    #[error("unsupported scheme {scheme:?} in {uri}")]
    UnsupportedScheme { scheme: String, uri: String },

    /// robots.txt or a `nofollow` directive forbids the request.
    #[error("robots directives disallow {uri}")]
    RobotsDisallowed { uri: String },

    #[error("invalid URI {uri:?}: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    /// Local failure spooling a body or running a content parser.
    #[error("I/O error handling response from {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    ElementNotFound(#[from] ElementNotFound),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Cookie(#[from] CookieError),
}

fn format_realms(realms: &[String]) -> String {
    if realms.is_empty() {
        String::new()
    } else {
        format!("; realms offered: {}", realms.join(", "))
    }
}

impl AgentError {
    pub fn unauthorized(uri: impl Into<String>, status: u16, realms: Vec<String>) -> Self {
        Self::Unauthorized {
            uri: uri.into(),
            status,
            realms,
        }
    }

    pub fn unsupported_scheme(uri: &url::Url) -> Self {
        Self::UnsupportedScheme {
            scheme: uri.scheme().to_string(),
            uri: uri.to_string(),
        }
    }

    pub fn robots_disallowed(uri: impl Into<String>) -> Self {
        Self::RobotsDisallowed { uri: uri.into() }
    }

    pub fn invalid_uri(uri: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            source,
        }
    }

    pub fn io(uri: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            uri: uri.into(),
            source,
        }
    }

    /// The page attached to limit and status errors.
    #[must_use]
    pub fn page(&self) -> Option<&Arc<Page>> {
        match self {
            Self::RedirectLimitReached { page, .. } | Self::ResponseCode { page, .. } => Some(page),
            _ => None,
        }
    }

    /// Partial body kept by read failures.
    #[must_use]
    pub fn partial_body(&self) -> Option<&[u8]> {
        match self {
            Self::ResponseRead { partial, .. } | Self::ChunkedTermination { partial, .. } => {
                Some(partial)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_lists_realms() {
        let err = AgentError::unauthorized("http://h/x", 401, vec!["r1".into(), "r2".into()]);
        let msg = err.to_string();
        assert!(msg.contains("HTTP 401"), "message: {msg}");
        assert!(msg.contains("realms offered: r1, r2"), "message: {msg}");

        let forbidden = AgentError::unauthorized("http://h/x", 403, Vec::new());
        assert!(!forbidden.to_string().contains("realms"));
    }

    #[test]
    fn test_response_read_message() {
        let err = AgentError::ResponseRead {
            uri: "http://h/".into(),
            expected: Some(10),
            received: 4,
            partial: b"abcd".to_vec(),
            source: None,
        };
        assert_eq!(
            err.to_string(),
            "response body for http://h/ incomplete: received 4 bytes of 10"
        );
        assert_eq!(err.partial_body().unwrap(), b"abcd");
    }

    #[test]
    fn test_unsupported_scheme_names_scheme() {
        let uri = url::Url::parse("ftp://h/file").unwrap();
        let err = AgentError::unsupported_scheme(&uri);
        assert!(err.to_string().contains("\"ftp\""));
        assert!(err.page().is_none());
    }
}
