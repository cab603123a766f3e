//! Cookie state: parsing, domain/path matching, and persistence.
//!
//! The [`CookieJar`] is the per-agent cookie store. It can be saved to and
//! restored from either a JSON document or a Netscape-format cookie file,
//! which can be exported from browsers or consumed by curl.

mod cookie;
mod error;
mod jar;
mod netscape;

pub use cookie::{Cookie, SameSite};
pub use error::CookieError;
pub use jar::{CookieFormat, CookieJar, SaveOptions};
pub use netscape::{LoadedCookies, NETSCAPE_HEADER, parse_netscape_cookies, write_netscape_cookies};

