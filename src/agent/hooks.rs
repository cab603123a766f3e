//! Caller-supplied hooks around each request.
//!
//! Hooks see immutable snapshots and return replacement values; returning
//! `None` keeps the original.

use std::fmt;
use std::sync::Arc;

use reqwest::Method;
use reqwest::header::HeaderMap;
use url::Url;

use crate::decode::ResponseBody;

/// The request about to be sent, after cookies and auth were added.
#[derive(Debug)]
pub struct RequestSnapshot<'a> {
    pub method: &'a Method,
    pub uri: &'a Url,
    pub headers: &'a HeaderMap,
    pub body: Option<&'a [u8]>,
}

/// A response after content decoding, before cookies and redirects are processed.
#[derive(Debug)]
pub struct ResponseSnapshot<'a> {
    pub uri: &'a Url,
    pub status: u16,
    pub headers: &'a HeaderMap,
    pub body: &'a ResponseBody,
}

/// Returns replacement request headers.
pub type PreRequestHook = Arc<dyn Fn(&RequestSnapshot<'_>) -> Option<HeaderMap> + Send + Sync>;

/// Returns replacement response headers.
pub type PostResponseHook = Arc<dyn Fn(&ResponseSnapshot<'_>) -> Option<HeaderMap> + Send + Sync>;

/// Relabels a `Content-Encoding` value (e.g. a server sending `x-gzip2`).
pub type ContentEncodingHook = Arc<dyn Fn(&Url, &str) -> Option<String> + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub pre_request: Option<PreRequestHook>,
    pub post_response: Option<PostResponseHook>,
    pub content_encoding: Option<ContentEncodingHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("pre_request", &self.pre_request.is_some())
            .field("post_response", &self.post_response.is_some())
            .field("content_encoding", &self.content_encoding.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn request_headers(&self, snapshot: &RequestSnapshot<'_>) -> Option<HeaderMap> {
        self.pre_request.as_ref().and_then(|hook| hook(snapshot))
    }

    pub fn response_headers(&self, snapshot: &ResponseSnapshot<'_>) -> Option<HeaderMap> {
        self.post_response.as_ref().and_then(|hook| hook(snapshot))
    }

    /// Effective encoding label for a response from `uri`.
    pub fn content_encoding(&self, uri: &Url, encoding: &str) -> String {
        self.content_encoding
            .as_ref()
            .and_then(|hook| hook(uri, encoding))
            .unwrap_or_else(|| encoding.to_string())
    }
}
