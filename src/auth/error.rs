//! Error types for credential registration and header computation.

use thiserror::Error;

/// Errors raised by the auth store and the scheme implementations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// NTLM has no realm concept, so a domain cannot be scoped to one.
    #[error("NTLM domain cannot be combined with realm {realm:?} for {uri}")]
    NtlmDomainWithRealm {
        /// Prefix the credential was registered for.
        uri: String,
        /// The realm that was supplied.
        realm: String,
    },

    /// Credentials can only be scoped to URIs with a host.
    #[error("cannot scope credentials to {uri}: URI has no host")]
    InvalidUri {
        /// The rejected URI.
        uri: String,
    },

    /// A Digest challenge without a nonce cannot be answered.
    #[error("Digest challenge for realm {realm:?} has no nonce")]
    MissingNonce {
        /// Realm of the challenge, if named.
        realm: Option<String>,
    },

    /// The Digest challenge names an algorithm this agent does not implement.
    #[error("unsupported Digest algorithm {algorithm:?}")]
    UnsupportedDigestAlgorithm {
        /// Algorithm token from the challenge.
        algorithm: String,
    },

    /// The server's NTLM message could not be decoded.
    #[error("invalid NTLM message: {reason}")]
    InvalidNtlmMessage {
        /// What was wrong with the message.
        reason: String,
    },
}

impl AuthError {
    /// Creates an NTLM decoding error.
    pub fn invalid_ntlm(reason: impl Into<String>) -> Self {
        Self::InvalidNtlmMessage {
            reason: reason.into(),
        }
    }
}
