//! webagent core library
//!
//! A stateful HTTP user agent in the Mechanize style: it keeps cookies,
//! answers authentication challenges, follows redirects and meta refreshes,
//! decodes compressed bodies, and records visited pages in a bounded history.
//!
//! # Architecture
//!
//! - [`cookies`] - Set-Cookie parsing, the cookie jar, Netscape/JSON persistence
//! - [`auth`] - challenge parsing, credential store, Basic/Digest/NTLM answers
//! - [`decode`] - spooled response bodies and gzip/deflate decoding
//! - [`navigation`] - redirect policy, refresh parsing, hop counting
//! - [`transport`] - per-scheme transports (`http`, `https`, `file`)
//! - [`page`] - pages, HTML document model, forms, parser registry
//! - [`agent`] - the [`Agent`] orchestrator, history, hooks, robots.txt

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod auth;
pub mod config;
pub mod cookies;
pub mod decode;
pub mod error;
pub mod navigation;
pub mod page;
pub mod transport;
pub mod user_agent;

// Re-export commonly used types
pub use agent::{Agent, FetchRequest, History, RobotsCache, Sleeper, TokioSleeper};
pub use auth::{AuthChallenge, AuthError, AuthRealm, AuthScheme, AuthStore, Credential};
pub use config::{AgentConfig, ConfigError, ProxyConfig, TlsConfig, VerifyMode};
pub use cookies::{Cookie, CookieError, CookieFormat, CookieJar, SaveOptions};
pub use decode::{DecodeError, DecodeStage, ResponseBody};
pub use error::AgentError;
pub use navigation::{MetaRefreshMode, RedirectPolicy};
pub use page::{
    Content, ElementNotFound, Form, FormQuery, HtmlDocument, Link, LinkQuery, Page, ParserKind,
    ParserRegistry,
};
pub use transport::{Transport, TransportError, TransportRequest, TransportResponse};
