//! Basic and Digest `Authorization` header computation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest as _, Md5};
use rand::Rng;
use sha2::Sha256;

use super::challenge::AuthChallenge;
use super::error::AuthError;
use super::store::Credential;

/// `Basic base64(user:pass)`.
#[must_use]
pub fn basic_authorization(credential: &Credential) -> String {
    let pair = format!("{}:{}", credential.username, credential.password());
    format!("Basic {}", STANDARD.encode(pair))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl Algorithm {
    fn from_param(value: Option<&str>) -> Result<Self, AuthError> {
        let Some(value) = value else {
            return Ok(Self::Md5);
        };
        match value.to_ascii_uppercase().as_str() {
            "MD5" => Ok(Self::Md5),
            "MD5-SESS" => Ok(Self::Md5Sess),
            "SHA-256" => Ok(Self::Sha256),
            "SHA-256-SESS" => Ok(Self::Sha256Sess),
            _ => Err(AuthError::UnsupportedDigestAlgorithm {
                algorithm: value.to_string(),
            }),
        }
    }

    fn is_session(self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn hash(self, input: &str) -> String {
        match self {
            Self::Md5 | Self::Md5Sess => hex(&Md5::digest(input.as_bytes())),
            Self::Sha256 | Self::Sha256Sess => hex(&Sha256::digest(input.as_bytes())),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// State for answering one Digest challenge, possibly several times.
///
/// The nonce count increases with every header computed for the same nonce.
#[derive(Debug, Clone)]
pub struct DigestSession {
    challenge: AuthChallenge,
    algorithm: Algorithm,
    nonce_count: u32,
    cnonce: Option<String>,
}

impl DigestSession {
    /// Prepares a session for `challenge`.
    ///
    /// # Errors
    ///
    /// Fails when the challenge has no nonce or names an unknown algorithm.
    pub fn new(challenge: AuthChallenge) -> Result<Self, AuthError> {
        if challenge.param("nonce").is_none() {
            return Err(AuthError::MissingNonce {
                realm: challenge.realm_name().map(str::to_string),
            });
        }
        let algorithm = Algorithm::from_param(challenge.param("algorithm"))?;
        Ok(Self {
            challenge,
            algorithm,
            nonce_count: 0,
            cnonce: None,
        })
    }

    /// Fixes the client nonce instead of generating a random one.
    #[must_use]
    pub fn with_cnonce(mut self, cnonce: impl Into<String>) -> Self {
        self.cnonce = Some(cnonce.into());
        self
    }

    /// The challenge this session answers.
    #[must_use]
    pub fn challenge(&self) -> &AuthChallenge {
        &self.challenge
    }

    /// Computes the `Authorization` value for `method` and request-target `uri`.
    pub fn authorization(&mut self, credential: &Credential, method: &str, uri: &str) -> String {
        let realm = self.challenge.param("realm").unwrap_or_default().to_string();
        let nonce = self.challenge.param("nonce").unwrap_or_default().to_string();
        let qop = self.challenge.param("qop").and_then(|qop| {
            qop.split(',')
                .map(str::trim)
                .find(|q| q.eq_ignore_ascii_case("auth"))
                .map(|_| "auth")
        });

        self.nonce_count += 1;
        let nc = format!("{:08x}", self.nonce_count);
        let cnonce = self
            .cnonce
            .get_or_insert_with(|| hex(&rand::thread_rng().r#gen::<[u8; 8]>()))
            .clone();

        let mut ha1 = self.algorithm.hash(&format!(
            "{}:{realm}:{}",
            credential.username,
            credential.password()
        ));
        if self.algorithm.is_session() {
            ha1 = self.algorithm.hash(&format!("{ha1}:{nonce}:{cnonce}"));
        }
        let ha2 = self.algorithm.hash(&format!("{method}:{uri}"));
        let response = match qop {
            Some(qop) => self
                .algorithm
                .hash(&format!("{ha1}:{nonce}:{nc}:{cnonce}:{qop}:{ha2}")),
            None => self.algorithm.hash(&format!("{ha1}:{nonce}:{ha2}")),
        };

        let mut parts = vec![
            format!("username=\"{}\"", quote(&credential.username)),
            format!("realm=\"{}\"", quote(&realm)),
        ];
        if let Some(algorithm) = self.challenge.param("algorithm") {
            parts.push(format!("algorithm={algorithm}"));
        }
        if let Some(qop) = qop {
            parts.push(format!("qop={qop}"));
        }
        parts.push(format!("uri=\"{}\"", quote(uri)));
        parts.push(format!("nonce=\"{}\"", quote(&nonce)));
        if qop.is_some() {
            parts.push(format!("nc={nc}"));
            parts.push(format!("cnonce=\"{cnonce}\""));
        }
        parts.push(format!("response=\"{response}\""));
        if let Some(opaque) = self.challenge.param("opaque") {
            parts.push(format!("opaque=\"{}\"", quote(opaque)));
        }
        format!("Digest {}", parts.join(", "))
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::parse_challenges;

    fn challenge(header: &str) -> AuthChallenge {
        parse_challenges([header]).remove(0)
    }

    #[test]
    fn test_basic_authorization() {
        let credential = Credential::new("Aladdin", "open sesame");
        assert_eq!(
            basic_authorization(&credential),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn test_digest_rfc2617_vector() {
        let challenge = challenge(
            "Digest realm=\"testrealm@host.com\", qop=\"auth,auth-int\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", \
             opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"",
        );
        let mut session = DigestSession::new(challenge).unwrap().with_cnonce("0a4f113b");
        let credential = Credential::new("Mufasa", "Circle Of Life");
        let header = session.authorization(&credential, "GET", "/dir/index.html");

        assert!(header.starts_with("Digest username=\"Mufasa\", realm=\"testrealm@host.com\""));
        assert!(header.contains("qop=auth, uri=\"/dir/index.html\""));
        assert!(header.contains("nc=00000001"));
        assert!(header.contains("response=\"6629fae49393a05397450978507c4ef1\""));
        assert!(header.ends_with("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
    }

    #[test]
    fn test_digest_nonce_count_increments() {
        let mut session = DigestSession::new(challenge("Digest realm=r, nonce=n, qop=auth")).unwrap();
        let credential = Credential::new("u", "p");
        let first = session.authorization(&credential, "GET", "/");
        let second = session.authorization(&credential, "GET", "/");
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
    }

    #[test]
    fn test_digest_without_qop_uses_rfc2069_response() {
        let mut session = DigestSession::new(challenge("Digest realm=r, nonce=n")).unwrap();
        let header = session.authorization(&Credential::new("u", "p"), "GET", "/");
        assert!(!header.contains("nc="));
        assert!(!header.contains("cnonce="));

        let ha1 = hex(&Md5::digest(b"u:r:p"));
        let ha2 = hex(&Md5::digest(b"GET:/"));
        let expected = hex(&Md5::digest(format!("{ha1}:n:{ha2}").as_bytes()));
        assert!(header.contains(&format!("response=\"{expected}\"")));
    }

    #[test]
    fn test_digest_sha256_session_algorithm_is_echoed() {
        let mut session =
            DigestSession::new(challenge("Digest realm=r, nonce=n, qop=auth, algorithm=SHA-256-sess"))
                .unwrap();
        let header = session.authorization(&Credential::new("u", "p"), "GET", "/");
        assert!(header.contains("algorithm=SHA-256-sess"));
        let response = header.split("response=\"").nth(1).unwrap();
        assert_eq!(response.find('"'), Some(64));
    }

    #[test]
    fn test_digest_rejects_missing_nonce_and_unknown_algorithm() {
        assert!(matches!(
            DigestSession::new(challenge("Digest realm=r")),
            Err(AuthError::MissingNonce { .. })
        ));
        assert!(matches!(
            DigestSession::new(challenge("Digest realm=r, nonce=n, algorithm=SHA-512")),
            Err(AuthError::UnsupportedDigestAlgorithm { .. })
        ));
    }
}
