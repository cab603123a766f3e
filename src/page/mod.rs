//! Fetched pages and their typed content.

mod form;
mod html;
mod parser;

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap};
use thiserror::Error;
use url::Url;

use crate::decode::ResponseBody;

pub use form::{Button, Field, FieldKind, FileUpload, Form, FormSubmission, encode_pairs};
pub use html::{FormQuery, HtmlDocument, Link, LinkQuery, Meta, RobotsDirectives};
pub use parser::{ContentParser, ParserKind, ParserRegistry};

static FILENAME_PARAM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)filename\s*=\s*(?:"([^"]*)"|([^;\s]+))"#).ok());

static CHARSET_PARAM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)charset\s*=\s*["']?([A-Za-z0-9._:-]+)"#).ok());

static XML_ROOT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z_][\w:.-]*)[\s/>]").ok());

/// A strict lookup found nothing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no {element} matching {criteria}")]
pub struct ElementNotFound {
    /// Kind of element searched for (`link`, `form`, `field`).
    pub element: &'static str,
    /// Rendered search criteria.
    pub criteria: String,
}

impl ElementNotFound {
    pub(crate) fn new(element: &'static str, criteria: impl fmt::Display) -> Self {
        Self {
            element,
            criteria: criteria.to_string(),
        }
    }
}

/// XML response kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub source: String,
}

impl XmlDocument {
    #[must_use]
    pub fn new(source: String) -> Self {
        Self { source }
    }

    /// Name of the first element, skipping the prolog and comments.
    #[must_use]
    pub fn root_element(&self) -> Option<&str> {
        let re = XML_ROOT.as_ref()?;
        re.captures_iter(&self.source)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .next()
    }
}

/// Typed page content chosen by the parser registry.
#[derive(Debug, Clone)]
pub enum Content {
    Html(HtmlDocument),
    Xml(XmlDocument),
    File { file_name: String },
    Download { file_name: String },
}

/// A terminal response: URI, status, headers, decoded body and content.
#[derive(Debug)]
pub struct Page {
    uri: Url,
    status: u16,
    headers: HeaderMap,
    body: ResponseBody,
    encoding: Option<String>,
    content: Content,
}

impl Page {
    /// Assembles a page; the character encoding comes from the
    /// `Content-Type` charset, falling back to a `<meta charset>` tag.
    #[must_use]
    pub fn new(uri: Url, status: u16, headers: HeaderMap, body: ResponseBody, content: Content) -> Self {
        let declared = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_of);
        let encoding = declared.or_else(|| match &content {
            Content::Html(doc) => doc.metas.iter().find_map(|m| {
                m.charset.clone().or_else(|| {
                    (m.http_equiv.as_deref() == Some("content-type"))
                        .then(|| m.content.as_deref().and_then(charset_of))
                        .flatten()
                })
            }),
            _ => None,
        });
        Self {
            uri,
            status,
            headers,
            body,
            encoding,
            content,
        }
    }

    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Decoded body.
    #[must_use]
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Declared character encoding, lowercased.
    #[must_use]
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn content(&self) -> &Content {
        &self.content
    }

    #[must_use]
    pub fn html(&self) -> Option<&HtmlDocument> {
        match &self.content {
            Content::Html(doc) => Some(doc),
            _ => None,
        }
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.html().and_then(|doc| doc.title.as_deref())
    }

    #[must_use]
    pub fn links(&self) -> &[Link] {
        self.html().map_or(&[], |doc| doc.links.as_slice())
    }

    #[must_use]
    pub fn forms(&self) -> &[Form] {
        self.html().map_or(&[], |doc| doc.forms.as_slice())
    }

    #[must_use]
    pub fn link_with(&self, query: &LinkQuery) -> Option<&Link> {
        self.html().and_then(|doc| doc.link_with(query))
    }

    /// # Errors
    ///
    /// Returns [`ElementNotFound`] when the page has no matching link.
    pub fn link_with_required(&self, query: &LinkQuery) -> Result<&Link, ElementNotFound> {
        self.link_with(query)
            .ok_or_else(|| ElementNotFound::new("link", query))
    }

    #[must_use]
    pub fn form_with(&self, query: &FormQuery) -> Option<&Form> {
        self.html().and_then(|doc| doc.form_with(query))
    }

    /// # Errors
    ///
    /// Returns [`ElementNotFound`] when the page has no matching form.
    pub fn form_with_required(&self, query: &FormQuery) -> Result<&Form, ElementNotFound> {
        self.form_with(query)
            .ok_or_else(|| ElementNotFound::new("form", query))
    }

    /// URI that relative references on this page resolve against.
    #[must_use]
    pub fn base_uri(&self) -> Url {
        self.html()
            .map_or_else(|| self.uri.clone(), |doc| doc.base_uri(&self.uri))
    }

    /// File name for file and download content.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        match &self.content {
            Content::File { file_name } | Content::Download { file_name } => Some(file_name),
            _ => None,
        }
    }

    /// Writes the body to `path`, returning the byte count.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from creating or writing the file.
    pub fn save(&self, path: &Path) -> io::Result<u64> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.body.copy_to(&mut writer)
    }
}

fn charset_of(value: &str) -> Option<String> {
    CHARSET_PARAM
        .as_ref()?
        .captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// `Content-Disposition` filename, else the last path segment, else `index.html`.
pub(crate) fn file_name_for(headers: &HeaderMap, uri: &Url) -> String {
    let from_header = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| FILENAME_PARAM.as_ref()?.captures(v))
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
        .filter(|name| !name.is_empty());
    from_header
        .or_else(|| {
            uri.path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .map(|s| {
                    urlencoding::decode(s).map_or_else(|_| s.to_string(), |d| d.into_owned())
                })
        })
        .unwrap_or_else(|| "index.html".to_string())
}
