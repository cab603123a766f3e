//! Domain/path-scoped cookie storage.
//!
//! Cookies are bucketed as domain -> path -> name, so a `(domain, path, name)`
//! triple identifies exactly one storage slot. Matching follows RFC 6265
//! domain-match and path-match rules with a few browser-compatible
//! allowances: `localhost`, IP literals and bare intranet hosts may set
//! cookies for themselves, while single-label and well-known public
//! suffix domains are refused.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::IpAddr;
use std::path::Path;

use tracing::{debug, instrument};
use url::Url;

use super::cookie::{Cookie, normalize_domain, unix_now};
use super::error::CookieError;
use super::netscape::{parse_netscape_cookies, write_netscape_cookies};

/// Multi-label public suffixes that may never carry cookies.
const PUBLIC_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "ltd.uk", "plc.uk", "com.au", "net.au",
    "org.au", "edu.au", "gov.au", "co.nz", "org.nz", "co.jp", "ne.jp", "or.jp", "ac.jp",
    "com.br", "net.br", "org.br", "co.in", "com.cn", "com.mx", "co.za", "com.tr", "com.tw",
];

/// Persistence formats supported by [`CookieJar::save`] and [`CookieJar::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieFormat {
    /// JSON array of cookies preserving every attribute.
    Json,
    /// Classic tab-separated Netscape / curl cookie file.
    Netscape,
}

/// Options for saving a jar.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    /// Also write session cookies (omitted by default).
    pub session: bool,
}

type PathMap = BTreeMap<String, BTreeMap<String, Cookie>>;

/// In-memory cookie jar.
///
/// Not internally synchronized; each agent owns its own jar.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    domains: BTreeMap<String, PathMap>,
}

impl CookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `cookie` as received from `request_uri`.
    ///
    /// Cookies whose domain does not domain-match the request host are
    /// dropped silently, as are cookies for public suffixes. An already
    /// expired cookie deletes whatever occupies its slot. Returns whether the
    /// cookie is now stored.
    pub fn add(&mut self, request_uri: &Url, mut cookie: Cookie) -> bool {
        let Some(host) = request_uri.host_str().map(normalize_host) else {
            debug!(name = %cookie.name, "ignoring cookie for URI without host");
            return false;
        };

        cookie.domain = normalize_domain(&cookie.domain);
        if cookie.host_only || cookie.domain.is_empty() {
            cookie.domain = host.clone();
        }

        if !acceptable_domain(&cookie.domain, &host) {
            debug!(
                name = %cookie.name,
                domain = %cookie.domain,
                host = %host,
                "rejecting cookie with foreign or public-suffix domain"
            );
            return false;
        }

        if cookie.secure && !is_secure_scheme(request_uri.scheme()) {
            debug!(name = %cookie.name, "rejecting secure cookie set over insecure scheme");
            return false;
        }

        self.store(cookie, unix_now())
    }

    /// Parses a `Set-Cookie` header value and adds the result.
    pub fn add_set_cookie(&mut self, request_uri: &Url, header: &str) -> bool {
        match Cookie::parse(header, request_uri, unix_now()) {
            Some(cookie) => self.add(request_uri, cookie),
            None => {
                debug!("skipping malformed Set-Cookie header");
                false
            }
        }
    }

    /// Inserts without domain validation; expired cookies clear their slot.
    fn store(&mut self, cookie: Cookie, now: u64) -> bool {
        if cookie.is_expired(now) {
            self.delete(&cookie);
            return false;
        }
        debug!(name = %cookie.name, domain = %cookie.domain, path = %cookie.path, "storing cookie");
        self.domains
            .entry(cookie.domain.clone())
            .or_default()
            .entry(cookie.path.clone())
            .or_default()
            .insert(cookie.name.clone(), cookie);
        true
    }

    /// Removes the cookie occupying the same `(domain, path, name)` slot.
    pub fn delete(&mut self, cookie: &Cookie) -> Option<Cookie> {
        let paths = self.domains.get_mut(&cookie.domain)?;
        let names = paths.get_mut(&cookie.path)?;
        let removed = names.remove(&cookie.name);
        if names.is_empty() {
            paths.remove(&cookie.path);
        }
        if paths.is_empty() {
            self.domains.remove(&cookie.domain);
        }
        removed
    }

    /// Returns the non-expired cookies applicable to `uri`, longest path first.
    #[must_use]
    pub fn cookies(&self, uri: &Url) -> Vec<Cookie> {
        self.cookies_at(uri, unix_now())
    }

    fn cookies_at(&self, uri: &Url, now: u64) -> Vec<Cookie> {
        let Some(host) = uri.host_str().map(normalize_host) else {
            return Vec::new();
        };
        let request_path = if uri.path().is_empty() { "/" } else { uri.path() };
        let secure = is_secure_scheme(uri.scheme());
        let http = matches!(uri.scheme(), "http" | "https" | "ws" | "wss");

        let mut matched: Vec<Cookie> = self
            .iter()
            .filter(|c| !c.is_expired(now))
            .filter(|c| {
                if c.host_only {
                    c.domain == host
                } else {
                    domain_match(&host, &c.domain)
                }
            })
            .filter(|c| path_match(request_path, &c.path))
            .filter(|c| !c.secure || secure)
            .filter(|c| !c.http_only || http)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        matched
    }

    /// Renders the `Cookie` request header for `uri`.
    #[must_use]
    pub fn cookie_header(&self, uri: &Url) -> Option<String> {
        let cookies = self.cookies(uri);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value()))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Iterates over every stored cookie, expired ones included.
    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.domains
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn clear(&mut self) {
        self.domains.clear();
    }

    /// Saves the jar to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CookieError::Io`] on write failure or [`CookieError::Json`]
    /// when serialization fails.
    #[instrument(level = "debug", skip(self))]
    pub fn save(
        &self,
        path: &Path,
        format: CookieFormat,
        options: SaveOptions,
    ) -> Result<(), CookieError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.save_to(&mut writer, format, options)?;
        writer.flush()?;
        Ok(())
    }

    /// Writes the jar to any writer.
    ///
    /// # Errors
    ///
    /// See [`save`](Self::save).
    pub fn save_to(
        &self,
        writer: &mut impl Write,
        format: CookieFormat,
        options: SaveOptions,
    ) -> Result<(), CookieError> {
        let now = unix_now();
        let cookies: Vec<&Cookie> = self
            .iter()
            .filter(|c| !c.is_expired(now))
            .filter(|c| options.session || !c.is_session())
            .collect();
        debug!(count = cookies.len(), ?format, "saving cookies");
        match format {
            CookieFormat::Json => serde_json::to_writer_pretty(writer, &cookies)?,
            CookieFormat::Netscape => write_netscape_cookies(writer, cookies)?,
        }
        Ok(())
    }

    /// Loads cookies from `path`, merging them into the jar.
    ///
    /// # Errors
    ///
    /// Returns [`CookieError`] when the file cannot be read or parsed.
    #[instrument(level = "debug", skip(self))]
    pub fn load(&mut self, path: &Path, format: CookieFormat) -> Result<usize, CookieError> {
        let file = File::open(path)?;
        self.load_from(BufReader::new(file), format)
    }

    /// Loads cookies from a reader, merging them into the jar.
    ///
    /// Returns the number of cookies stored. Expired entries are skipped.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_from(
        &mut self,
        reader: impl BufRead,
        format: CookieFormat,
    ) -> Result<usize, CookieError> {
        let cookies: Vec<Cookie> = match format {
            CookieFormat::Json => serde_json::from_reader(reader)?,
            CookieFormat::Netscape => parse_netscape_cookies(reader)?.cookies,
        };

        let now = unix_now();
        let mut stored = 0;
        for mut cookie in cookies {
            cookie.domain = normalize_domain(&cookie.domain);
            if cookie.domain.is_empty() || cookie.is_expired(now) {
                continue;
            }
            if self.store(cookie, now) {
                stored += 1;
            }
        }
        debug!(stored, "loaded cookies");
        Ok(stored)
    }
}

fn normalize_host(host: &str) -> String {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

fn is_secure_scheme(scheme: &str) -> bool {
    matches!(scheme, "https" | "wss")
}

fn is_ip_literal(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok()
}

/// `host` equals `domain` or is a subdomain of it. IP hosts only match exactly.
fn domain_match(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    !is_ip_literal(host)
        && host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

/// Whether a cookie from `host` may claim `domain`.
fn acceptable_domain(domain: &str, host: &str) -> bool {
    if domain.is_empty() || (domain.contains(['/', ' ', '\t', ':', ',']) && !is_ip_literal(domain))
    {
        return false;
    }
    if !domain_match(host, domain) {
        return false;
    }
    if is_ip_literal(domain) {
        return domain == host;
    }
    // Single-label domains (`.org`, `.local`) only for the bare host itself.
    if !domain.contains('.') {
        return domain == host;
    }
    if PUBLIC_SUFFIXES.contains(&domain) {
        return domain == host;
    }
    true
}

/// RFC 6265 section 5.1.4 path-match.
fn path_match(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}
