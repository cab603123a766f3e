//! A single HTTP cookie and `Set-Cookie` header parsing.

use std::fmt;
use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Netscape-style dates (`Wed, 09-Jun-2021 10:18:14 GMT`) that httpdate rejects.
static DASHED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^(\w{3}),?\s+(\d{1,2})-(\w{3})-(\d{2,4})\s+(\d{1,2}:\d{2}:\d{2})\s*(?:GMT|UTC)?$")
        .expect("dashed cookie date regex is valid")
});

/// `SameSite` attribute values. Stored for inspection only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// A cookie as held by the [`CookieJar`](super::CookieJar).
///
/// `domain` is stored lowercased and without a leading dot. `host_only`
/// records whether the cookie came without a `Domain` attribute, in which
/// case it only matches the exact host that set it.
///
/// The value is redacted in Debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    value: String,
    pub domain: String,
    pub path: String,
    /// Unix timestamp in seconds; `None` for session cookies.
    pub expires: Option<u64>,
    pub secure: bool,
    pub http_only: bool,
    pub host_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,
}

impl Cookie {
    /// Creates a host-only session cookie scoped to `/`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: normalize_domain(&domain.into()),
            path: "/".to_string(),
            expires: None,
            secure: false,
            http_only: false,
            host_only: true,
            same_site: None,
        }
    }

    /// Sets the path, returning the cookie.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the expiry as a Unix timestamp, returning the cookie.
    #[must_use]
    pub fn with_expires(mut self, expires: Option<u64>) -> Self {
        self.expires = expires;
        self
    }

    /// Marks the cookie as a domain cookie that also matches subdomains.
    #[must_use]
    pub fn for_domain(mut self) -> Self {
        self.host_only = false;
        self
    }

    /// Sets the secure flag, returning the cookie.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Returns the cookie value.
    ///
    /// Cookie values are sensitive; avoid logging the return value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Replaces the cookie value.
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    /// Returns true for cookies without an expiry.
    #[must_use]
    pub fn is_session(&self) -> bool {
        self.expires.is_none()
    }

    /// Returns true when the expiry lies at or before `now`.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    /// Parses a `Set-Cookie` header value received from `request_uri`.
    ///
    /// Returns `None` for headers without a `name=value` pair or with an empty
    /// name. `Max-Age` takes precedence over `Expires`; an `Expires` value that
    /// cannot be parsed leaves the cookie as a session cookie. Domain
    /// validation happens when the cookie is added to a jar.
    #[must_use]
    pub fn parse(header: &str, request_uri: &Url, now: u64) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let value = strip_quotes(value.trim());

        let mut cookie = Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: request_uri
                .host_str()
                .map(normalize_domain)
                .unwrap_or_default(),
            path: default_path(request_uri.path()),
            expires: None,
            secure: false,
            http_only: false,
            host_only: true,
            same_site: None,
        };

        let mut max_age: Option<i64> = None;
        let mut expires: Option<u64> = None;

        for attribute in parts {
            let (key, val) = match attribute.split_once('=') {
                Some((key, val)) => (key.trim(), val.trim()),
                None => (attribute.trim(), ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "domain" => {
                    let domain = normalize_domain(val);
                    if !domain.is_empty() {
                        cookie.domain = domain;
                        cookie.host_only = false;
                    }
                }
                "path" => {
                    if val.starts_with('/') {
                        cookie.path = val.to_string();
                    }
                }
                "expires" => {
                    expires = parse_cookie_date(strip_quotes(val));
                    if expires.is_none() {
                        debug!(name = %cookie.name, "unparseable cookie Expires, keeping session cookie");
                    }
                }
                "max-age" => max_age = val.parse::<i64>().ok(),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => {
                    cookie.same_site = match val.to_ascii_lowercase().as_str() {
                        "strict" => Some(SameSite::Strict),
                        "lax" => Some(SameSite::Lax),
                        "none" => Some(SameSite::None),
                        _ => None,
                    };
                }
                _ => {}
            }
        }

        cookie.expires = match max_age {
            Some(seconds) if seconds <= 0 => Some(0),
            Some(seconds) => Some(now.saturating_add(seconds.unsigned_abs())),
            None => expires,
        };

        Some(cookie)
    }
}

// Custom Debug impl that redacts the cookie value.
impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("expires", &self.expires)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("host_only", &self.host_only)
            .finish()
    }
}

/// Lowercases a cookie domain and strips the leading dot.
pub(crate) fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// RFC 6265 default-path: the request path up to, not including, the last `/`.
pub(crate) fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_string();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

/// Current time as Unix seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Parses an `Expires` value into Unix seconds.
fn parse_cookie_date(value: &str) -> Option<u64> {
    let to_secs = |time: SystemTime| {
        time.duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    };
    if let Ok(time) = httpdate::parse_http_date(value) {
        return Some(to_secs(time));
    }

    let caps = DASHED_DATE.captures(value.trim())?;
    let mut year: u32 = caps[4].parse().ok()?;
    if year < 70 {
        year += 2000;
    } else if year < 100 {
        year += 1900;
    }
    let day: u32 = caps[2].parse().ok()?;
    let rebuilt = format!(
        "{}, {:02} {} {} {} GMT",
        &caps[1], day, &caps[3], year, &caps[5]
    );
    httpdate::parse_http_date(&rebuilt).ok().map(to_secs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn uri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_parse_simple_cookie_is_host_only_session() {
        let cookie = Cookie::parse("sid=abc", &uri("http://Example.com/a/b"), NOW).unwrap();
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.domain, "example.com");
        assert_eq!(cookie.path, "/a");
        assert!(cookie.host_only);
        assert!(cookie.is_session());
    }

    #[test]
    fn test_parse_domain_attribute_strips_dot_and_lowercases() {
        let cookie = Cookie::parse(
            "a=b; Domain=.EXAMPLE.com; Path=/; Secure; HttpOnly",
            &uri("https://www.example.com/"),
            NOW,
        )
        .unwrap();
        assert_eq!(cookie.domain, "example.com");
        assert!(!cookie.host_only);
        assert!(cookie.secure);
        assert!(cookie.http_only);
    }

    #[test]
    fn test_parse_empty_value_is_kept() {
        let cookie = Cookie::parse("empty=", &uri("http://example.com/"), NOW).unwrap();
        assert_eq!(cookie.value(), "");
    }

    #[test]
    fn test_parse_without_equals_is_rejected() {
        assert!(Cookie::parse("novalue", &uri("http://example.com/"), NOW).is_none());
        assert!(Cookie::parse("=value", &uri("http://example.com/"), NOW).is_none());
    }

    #[test]
    fn test_max_age_wins_over_expires() {
        let cookie = Cookie::parse(
            "a=b; Expires=Wed, 21 Oct 2015 07:28:00 GMT; Max-Age=60",
            &uri("http://example.com/"),
            NOW,
        )
        .unwrap();
        assert_eq!(cookie.expires, Some(NOW + 60));
    }

    #[test]
    fn test_non_positive_max_age_expires_immediately() {
        let cookie = Cookie::parse("a=b; Max-Age=0", &uri("http://example.com/"), NOW).unwrap();
        assert!(cookie.is_expired(NOW));
    }

    #[test]
    fn test_expires_formats() {
        let imf = Cookie::parse(
            "a=b; Expires=Wed, 21 Oct 2015 07:28:00 GMT",
            &uri("http://example.com/"),
            NOW,
        )
        .unwrap();
        assert_eq!(imf.expires, Some(1_445_412_480));

        let dashed = Cookie::parse(
            "a=b; expires=Wed, 21-Oct-2015 07:28:00 GMT",
            &uri("http://example.com/"),
            NOW,
        )
        .unwrap();
        assert_eq!(dashed.expires, Some(1_445_412_480));
    }

    #[test]
    fn test_unparseable_expires_means_session() {
        let cookie = Cookie::parse(
            "a=b; Expires=sometime next week",
            &uri("http://example.com/"),
            NOW,
        )
        .unwrap();
        assert!(cookie.is_session());
    }

    #[test]
    fn test_relative_path_attribute_falls_back_to_default_path() {
        let cookie = Cookie::parse("a=b; Path=relative", &uri("http://example.com/x/y"), NOW)
            .unwrap();
        assert_eq!(cookie.path, "/x");
    }

    #[test]
    fn test_default_path() {
        assert_eq!(default_path(""), "/");
        assert_eq!(default_path("/"), "/");
        assert_eq!(default_path("/index.html"), "/");
        assert_eq!(default_path("/a/b/c"), "/a/b");
    }

    #[test]
    fn test_debug_redacts_value() {
        let cookie = Cookie::new("session", "super_secret_token", "example.com");
        let debug_str = format!("{cookie:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("super_secret_token"));
    }
}
