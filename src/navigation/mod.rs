//! Redirect and meta-refresh decisions.
//!
//! HTTP redirects and refreshes share one [`HopCounter`] per fetch, so a
//! chain mixing both still terminates at the configured limit.

mod refresh;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

pub use refresh::{MetaRefresh, find_meta_refresh, resolve_refresh_target};

/// Which 3xx responses are followed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectPolicy {
    /// Every 3xx response is a terminal page.
    Never,
    #[default]
    Always,
    /// Only 301 and 308 are followed.
    Permanent,
}

impl RedirectPolicy {
    /// Whether a response with `status` is followed under this policy.
    #[must_use]
    pub fn follows(self, status: u16) -> bool {
        match self {
            Self::Never => false,
            Self::Always => matches!(status, 301 | 302 | 303 | 307 | 308),
            Self::Permanent => matches!(status, 301 | 308),
        }
    }
}

/// Where meta refresh tags are honoured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaRefreshMode {
    #[default]
    Never,
    /// Only inside `<head>`.
    Head,
    /// Anywhere in the document.
    Anywhere,
}

/// Hop budget for one logical fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopCounter {
    limit: usize,
    hops: usize,
}

/// Another hop was needed after the limit was used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopLimitReached {
    pub hops: usize,
}

impl HopCounter {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit, hops: 0 }
    }

    /// Records one more hop.
    ///
    /// # Errors
    ///
    /// Fails once `limit` hops have already been taken.
    pub fn advance(&mut self) -> Result<usize, HopLimitReached> {
        if self.hops >= self.limit {
            return Err(HopLimitReached { hops: self.hops });
        }
        self.hops += 1;
        Ok(self.hops)
    }

    #[must_use]
    pub fn hops(&self) -> usize {
        self.hops
    }
}

/// Method for the request following a redirect, and whether the body is kept.
///
/// Everything becomes a bodiless GET unless `preserve` is set and the status
/// is 307 or 308.
#[must_use]
pub fn redirect_method(status: u16, method: &Method, preserve: bool) -> (Method, bool) {
    if preserve && matches!(status, 307 | 308) {
        (method.clone(), true)
    } else if *method == Method::HEAD {
        (Method::HEAD, false)
    } else {
        (Method::GET, false)
    }
}

/// `Referer` for a request to `to` made from a page at `from`.
///
/// Omitted when downgrading from https to http. Fragments and userinfo are
/// stripped.
#[must_use]
pub fn referer_for(from: Option<&Url>, to: &Url) -> Option<String> {
    let from = from?;
    if !matches!(from.scheme(), "http" | "https") {
        return None;
    }
    if from.scheme() == "https" && to.scheme() == "http" {
        return None;
    }
    let mut referer = from.clone();
    referer.set_fragment(None);
    let _ = referer.set_username("");
    let _ = referer.set_password(None);
    Some(referer.to_string())
}

/// Whether `target` is the same document as `current` (fragments ignored).
#[must_use]
pub fn is_same_document(current: &Url, target: &Url) -> bool {
    let mut a = current.clone();
    let mut b = target.clone();
    a.set_fragment(None);
    b.set_fragment(None);
    a == b
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_follows() {
        assert!(RedirectPolicy::Always.follows(302));
        assert!(!RedirectPolicy::Always.follows(304));
        assert!(!RedirectPolicy::Always.follows(300));
        assert!(RedirectPolicy::Permanent.follows(301));
        assert!(RedirectPolicy::Permanent.follows(308));
        assert!(!RedirectPolicy::Permanent.follows(302));
        assert!(!RedirectPolicy::Permanent.follows(307));
        assert!(!RedirectPolicy::Never.follows(301));
    }

    #[test]
    fn test_hop_counter_boundary() {
        let mut counter = HopCounter::new(2);
        assert_eq!(counter.advance(), Ok(1));
        assert_eq!(counter.advance(), Ok(2));
        assert_eq!(counter.advance(), Err(HopLimitReached { hops: 2 }));

        let mut zero = HopCounter::new(0);
        assert_eq!(zero.advance(), Err(HopLimitReached { hops: 0 }));
    }

    #[test]
    fn test_redirect_method() {
        assert_eq!(redirect_method(302, &Method::POST, false), (Method::GET, false));
        assert_eq!(redirect_method(307, &Method::POST, false), (Method::GET, false));
        assert_eq!(redirect_method(307, &Method::POST, true), (Method::POST, true));
        assert_eq!(redirect_method(308, &Method::PUT, true), (Method::PUT, true));
        assert_eq!(redirect_method(303, &Method::POST, true), (Method::GET, false));
        assert_eq!(redirect_method(301, &Method::HEAD, false), (Method::HEAD, false));
    }

    #[test]
    fn test_referer_rules() {
        let https = Url::parse("https://user:pw@secure.com/a#frag").unwrap();
        let http = Url::parse("http://plain.com/b").unwrap();
        assert_eq!(referer_for(Some(&https), &http), None);
        assert_eq!(
            referer_for(Some(&https), &Url::parse("https://x.com/").unwrap()).as_deref(),
            Some("https://secure.com/a")
        );
        assert_eq!(referer_for(Some(&http), &https).as_deref(), Some("http://plain.com/b"));
        assert_eq!(referer_for(None, &http), None);
        let file = Url::parse("file:///tmp/x.html").unwrap();
        assert_eq!(referer_for(Some(&file), &http), None);
    }

    #[test]
    fn test_same_document_ignores_fragment() {
        let a = Url::parse("http://e.com/p#one").unwrap();
        let b = Url::parse("http://e.com/p#two").unwrap();
        let c = Url::parse("http://e.com/p?x").unwrap();
        assert!(is_same_document(&a, &b));
        assert!(!is_same_document(&a, &c));
    }
}
