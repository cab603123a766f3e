//! HTTP authentication: challenge parsing, credential storage, and
//! Basic / Digest / NTLM header computation.
//!
//! The agent parses every `WWW-Authenticate` value of a 401 response with
//! [`parse_challenges`], picks one with [`select_challenge`], and answers it
//! with the scheme-specific helpers re-exported here.

mod challenge;
mod digest;
mod error;
pub mod ntlm;
mod store;

pub use challenge::{AuthChallenge, AuthRealm, AuthScheme, parse_challenges};
pub use digest::{DigestSession, basic_authorization};
pub use error::AuthError;
pub use store::{AuthStore, Credential};

use url::Url;

/// Picks the challenge to answer for `uri`.
///
/// Only challenges with registered credentials qualify. Digest beats
/// NTLM/Negotiate, which beat Basic; ties go to the earliest challenge.
#[must_use]
pub fn select_challenge<'a>(
    store: &'a AuthStore,
    uri: &Url,
    challenges: &'a [AuthChallenge],
) -> Option<(&'a AuthChallenge, &'a Credential)> {
    challenges
        .iter()
        .filter(|c| c.scheme != AuthScheme::Other)
        .filter_map(|c| store.credentials_for(uri, c.realm_name()).map(|cred| (c, cred)))
        .min_by_key(|(c, _)| c.scheme.preference())
}
