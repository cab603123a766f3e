//! Credential registry keyed by URI prefix and realm.

use std::fmt;

use tracing::{debug, instrument};
use url::Url;

use super::challenge::{AuthChallenge, AuthScheme};
use super::error::AuthError;

/// Username, password and optional NTLM domain.
///
/// The password is redacted in Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    password: String,
    pub domain: Option<String>,
}

impl Credential {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            domain: None,
        }
    }

    /// Attaches an NTLM domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Returns the password. Never log the return value.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("domain", &self.domain)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct CredentialEntry {
    prefix: Url,
    realm: Option<String>,
    credential: Credential,
}

/// Registry of credentials scoped by URI prefix and realm name.
#[derive(Debug, Clone, Default)]
pub struct AuthStore {
    entries: Vec<CredentialEntry>,
    default: Option<Credential>,
}

impl AuthStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers credentials for requests under `uri_prefix`.
    ///
    /// `realm = None` registers the fallback for any realm at that prefix.
    /// Registering again for the same prefix and realm replaces the entry.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NtlmDomainWithRealm`] when an NTLM domain is
    /// combined with a realm, and [`AuthError::InvalidUri`] for URIs without
    /// a host.
    #[instrument(level = "debug", skip(self, password), fields(uri = %uri_prefix))]
    pub fn add_credential(
        &mut self,
        uri_prefix: &Url,
        username: &str,
        password: &str,
        realm: Option<&str>,
        ntlm_domain: Option<&str>,
    ) -> Result<(), AuthError> {
        if let (Some(realm), Some(_)) = (realm, ntlm_domain) {
            return Err(AuthError::NtlmDomainWithRealm {
                uri: uri_prefix.to_string(),
                realm: realm.to_string(),
            });
        }
        let prefix = normalize_prefix(uri_prefix)?;
        let mut credential = Credential::new(username, password);
        credential.domain = ntlm_domain.map(str::to_string);

        let realm = realm.map(str::to_string);
        self.entries
            .retain(|entry| !(entry.prefix == prefix && entry.realm == realm));
        debug!(realm = ?realm, "registered credentials");
        self.entries.push(CredentialEntry {
            prefix,
            realm,
            credential,
        });
        Ok(())
    }

    /// Registers a credential used for any URI when nothing more specific matches.
    pub fn add_default_credential(&mut self, credential: Credential) {
        self.default = Some(credential);
    }

    /// Finds credentials for `uri` and a challenge realm.
    ///
    /// Lookup order: an entry for exactly `realm` (case-sensitive), then the
    /// realm-less entry for a matching prefix, then the default credential.
    /// Longer prefixes win within each step.
    #[must_use]
    pub fn credentials_for(&self, uri: &Url, realm: Option<&str>) -> Option<&Credential> {
        let mut candidates: Vec<&CredentialEntry> = self
            .entries
            .iter()
            .filter(|entry| prefix_matches(&entry.prefix, uri))
            .collect();
        candidates.sort_by(|a, b| b.prefix.path().len().cmp(&a.prefix.path().len()));

        if let Some(realm) = realm {
            if let Some(entry) = candidates
                .iter()
                .find(|entry| entry.realm.as_deref() == Some(realm))
            {
                return Some(&entry.credential);
            }
        }
        candidates
            .iter()
            .find(|entry| entry.realm.is_none())
            .map(|entry| &entry.credential)
            .or(self.default.as_ref())
    }

    /// Removes credentials for `uri`: one realm, or every realm when `None`.
    pub fn remove_credential(&mut self, uri: &Url, realm: Option<&str>) {
        let Ok(prefix) = normalize_prefix(uri) else {
            return;
        };
        self.entries.retain(|entry| {
            entry.prefix != prefix || realm.is_some_and(|r| entry.realm.as_deref() != Some(r))
        });
    }

    /// Whether at least one of `challenges` can be answered for `uri`.
    #[must_use]
    pub fn has_credentials(&self, uri: &Url, challenges: &[AuthChallenge]) -> bool {
        challenges
            .iter()
            .filter(|c| c.scheme != AuthScheme::Other)
            .any(|c| self.credentials_for(uri, c.realm_name()).is_some())
    }
}

/// Origin plus a directory path ending in `/`, without userinfo, query or fragment.
fn normalize_prefix(uri: &Url) -> Result<Url, AuthError> {
    if uri.host_str().is_none() {
        return Err(AuthError::InvalidUri {
            uri: uri.to_string(),
        });
    }
    let mut prefix = uri.clone();
    prefix.set_query(None);
    prefix.set_fragment(None);
    let _ = prefix.set_username("");
    let _ = prefix.set_password(None);
    if !prefix.path().ends_with('/') {
        let path = format!("{}/", prefix.path());
        prefix.set_path(&path);
    }
    Ok(prefix)
}

fn prefix_matches(prefix: &Url, uri: &Url) -> bool {
    if prefix.origin() != uri.origin() {
        return false;
    }
    let path = uri.path();
    path.starts_with(prefix.path()) || format!("{path}/") == prefix.path()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::parse_challenges;

    fn uri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_realm_lookup_falls_back_to_realmless_then_default() {
        let mut store = AuthStore::new();
        let site = uri("http://example.com/");
        store.add_credential(&site, "realm-user", "p1", Some("Admin"), None).unwrap();
        store.add_credential(&site, "any-user", "p2", None, None).unwrap();
        store.add_default_credential(Credential::new("fallback", "p3"));

        let page = uri("http://example.com/secret");
        assert_eq!(store.credentials_for(&page, Some("Admin")).unwrap().username, "realm-user");
        assert_eq!(store.credentials_for(&page, Some("admin")).unwrap().username, "any-user");
        assert_eq!(store.credentials_for(&page, None).unwrap().username, "any-user");
        assert_eq!(
            store.credentials_for(&uri("http://other.com/"), Some("Admin")).unwrap().username,
            "fallback"
        );
    }

    #[test]
    fn test_ntlm_domain_with_realm_is_rejected() {
        let mut store = AuthStore::new();
        let err = store
            .add_credential(&uri("http://example.com/"), "u", "p", Some("r"), Some("CORP"))
            .unwrap_err();
        assert!(matches!(err, AuthError::NtlmDomainWithRealm { .. }), "got: {err}");
    }

    #[test]
    fn test_prefix_scoping() {
        let mut store = AuthStore::new();
        store.add_credential(&uri("http://example.com/private"), "u", "p", None, None).unwrap();
        assert!(store.credentials_for(&uri("http://example.com/private/x"), None).is_some());
        assert!(store.credentials_for(&uri("http://example.com/private"), None).is_some());
        assert!(store.credentials_for(&uri("http://example.com/public"), None).is_none());
        assert!(store.credentials_for(&uri("https://example.com/private/x"), None).is_none());
    }

    #[test]
    fn test_remove_single_realm_or_all() {
        let mut store = AuthStore::new();
        let site = uri("http://example.com/");
        store.add_credential(&site, "a", "p", Some("r1"), None).unwrap();
        store.add_credential(&site, "b", "p", Some("r2"), None).unwrap();

        store.remove_credential(&site, Some("r1"));
        assert!(store.credentials_for(&site, Some("r1")).is_none());
        assert!(store.credentials_for(&site, Some("r2")).is_some());

        store.remove_credential(&site, None);
        assert!(store.credentials_for(&site, Some("r2")).is_none());
    }

    #[test]
    fn test_has_credentials_checks_challenge_realms() {
        let mut store = AuthStore::new();
        let site = uri("http://example.com/");
        store.add_credential(&site, "u", "p", Some("r1"), None).unwrap();

        let matching = parse_challenges(["Basic realm=\"r1\""]);
        let other = parse_challenges(["Basic realm=\"r2\""]);
        assert!(store.has_credentials(&site, &matching));
        assert!(!store.has_credentials(&site, &other));
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let credential = Credential::new("user", "hunter2");
        assert!(!format!("{credential:?}").contains("hunter2"));
    }
}
