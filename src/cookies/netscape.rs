//! Netscape cookie file reader and writer.
//!
//! The format has 7 TAB-separated fields per line:
//! `domain`, `include_subdomains`, `path`, `secure`, `expires`, `name`, `value`.
//! Lines prefixed with `#HttpOnly_` carry an http-only cookie (curl
//! convention); other `#` lines and blank lines are comments.

use std::io::{BufRead, Write};

use tracing::{debug, instrument, warn};

use super::cookie::{Cookie, normalize_domain};
use super::error::CookieError;

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// Header line written at the top of every saved file.
pub const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";

/// Cookies read from a Netscape file, plus the lines that were skipped.
#[derive(Debug)]
pub struct LoadedCookies {
    pub cookies: Vec<Cookie>,
    /// `(line number, reason)` for every line that could not be used.
    pub skipped: Vec<(usize, String)>,
}

/// Reads a Netscape cookie file. An expiry of `0` is a session cookie.
///
/// Unusable lines are logged and listed in [`LoadedCookies::skipped`]; the
/// rest of the file still loads.
///
/// # Errors
///
/// [`CookieError::Io`] if reading fails, [`CookieError::NoUsableLines`] if
/// the file has cookie lines but none of them could be used.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<LoadedCookies, CookieError> {
    let mut loaded = LoadedCookies {
        cookies: Vec::new(),
        skipped: Vec::new(),
    };

    for (idx, line) in reader.lines().enumerate() {
        let number = idx + 1;
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let (entry, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
            Some(rest) => (rest, true),
            None if line.starts_with('#') => continue,
            None => (line, false),
        };

        match cookie_from_entry(entry, http_only) {
            Ok(cookie) => {
                debug!(line = number, domain = %cookie.domain, name = %cookie.name, "read cookie");
                loaded.cookies.push(cookie);
            }
            Err(reason) => {
                warn!(line = number, %reason, "skipped cookie line");
                loaded.skipped.push((
                    number,
                    CookieError::BadLine {
                        line: number,
                        reason,
                    }
                    .to_string(),
                ));
            }
        }
    }

    if loaded.cookies.is_empty() && !loaded.skipped.is_empty() {
        return Err(CookieError::NoUsableLines {
            skipped: loaded.skipped.len(),
        });
    }
    Ok(loaded)
}

/// Writes cookies in Netscape format, header line first.
///
/// # Errors
///
/// Returns any I/O error from the writer.
pub fn write_netscape_cookies<'a>(
    writer: &mut impl Write,
    cookies: impl IntoIterator<Item = &'a Cookie>,
) -> std::io::Result<()> {
    writeln!(writer, "{NETSCAPE_HEADER}")?;
    writeln!(writer, "# This file was generated by webagent. Edit at your own risk.")?;
    writeln!(writer)?;
    for cookie in cookies {
        let prefix = if cookie.http_only { HTTP_ONLY_PREFIX } else { "" };
        let domain = if cookie.host_only {
            cookie.domain.clone()
        } else {
            format!(".{}", cookie.domain)
        };
        writeln!(
            writer,
            "{prefix}{domain}\t{}\t{}\t{}\t{}\t{}\t{}",
            bool_field(!cookie.host_only),
            cookie.path,
            bool_field(cookie.secure),
            cookie.expires.unwrap_or(0),
            cookie.name,
            cookie.value(),
        )?;
    }
    Ok(())
}

fn bool_field(value: bool) -> &'static str {
    if value { "TRUE" } else { "FALSE" }
}

/// Builds a cookie from the seven fields of one entry. The error is a
/// reason that never quotes the cookie value.
fn cookie_from_entry(entry: &str, http_only: bool) -> Result<Cookie, String> {
    let [raw_domain, subdomains, path, secure, expires, name, value] =
        <[&str; 7]>::try_from(entry.split('\t').collect::<Vec<_>>())
            .map_err(|fields| format!("{} fields instead of 7", fields.len()))?;

    let domain = normalize_domain(raw_domain);
    if domain.is_empty() {
        return Err("no domain".to_string());
    }
    if name.is_empty() {
        return Err("no cookie name".to_string());
    }
    let subdomains = flag(subdomains).ok_or_else(|| format!("subdomain flag {subdomains:?}"))?;
    let secure = flag(secure).ok_or_else(|| format!("secure flag {secure:?}"))?;
    let expires: u64 = expires
        .parse()
        .map_err(|_| format!("expiry {expires:?} is not a unix timestamp"))?;

    let mut cookie = Cookie::new(name, value, domain)
        .with_path(if path.is_empty() { "/" } else { path }.to_string())
        .with_secure(secure)
        .with_expires((expires > 0).then_some(expires));
    cookie.host_only = !subdomains && !raw_domain.starts_with('.');
    cookie.http_only = http_only;
    Ok(cookie)
}

fn flag(field: &str) -> Option<bool> {
    match field {
        "TRUE" => Some(true),
        "FALSE" => Some(false),
        _ => None,
    }
}
