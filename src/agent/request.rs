//! Fetch requests and the URI/params/header plumbing around them.

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::config::ConfigError;
use crate::error::AgentError;
use crate::page::{FormSubmission, encode_pairs};

pub(crate) const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// One navigation request: method, URI (absolute or relative to the current
/// page), parameters, extra headers and an optional body.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub uri: String,
    /// Appended to the query for GET/HEAD/DELETE, form-encoded otherwise.
    pub params: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Referer override; defaults to the current page.
    pub referer: Option<Url>,
}

impl FetchRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            params: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            referer: None,
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn head(uri: impl Into<String>) -> Self {
        Self::new(Method::HEAD, uri)
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a raw body with its content type.
    #[must_use]
    pub fn body(mut self, body: Vec<u8>, content_type: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(content_type) {
            self.headers.insert(CONTENT_TYPE, value);
        }
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn referer(mut self, referer: Url) -> Self {
        self.referer = Some(referer);
        self
    }

    pub(crate) fn from_submission(submission: FormSubmission) -> Self {
        let mut request = Self::new(submission.method, submission.uri.to_string());
        if let Some(body) = submission.body {
            let content_type = submission.content_type.as_deref().unwrap_or(FORM_URLENCODED);
            request = request.body(body, content_type);
        }
        request
    }
}

/// Resolves `raw` against `base`; absolute URIs ignore the base.
pub(crate) fn resolve_uri(base: Option<&Url>, raw: &str) -> Result<Url, AgentError> {
    let raw = raw.trim();
    let parsed = match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    };
    parsed.map_err(|source| AgentError::invalid_uri(raw, source))
}

/// Methods whose params go to the query string.
fn params_in_query(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::DELETE)
}

/// Applies `params` to `uri` or to a urlencoded body.
///
/// An explicit body wins; params are then appended to the query instead.
pub(crate) fn apply_params(
    method: &Method,
    uri: &mut Url,
    params: &[(String, String)],
    headers: &mut HeaderMap,
    body: Option<Vec<u8>>,
) -> Option<Vec<u8>> {
    if params.is_empty() {
        return body;
    }
    if params_in_query(method) || body.is_some() {
        uri.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        return body;
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_URLENCODED));
    Some(encode_pairs(params).into_bytes())
}

/// Converts configured `request_headers` into a header map.
pub(crate) fn configured_headers(
    headers: &std::collections::BTreeMap<String, String>,
) -> Result<HeaderMap, ConfigError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConfigError::invalid("request_headers", format!("{name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ConfigError::invalid("request_headers", format!("{name}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
