//! Content-type to parser dispatch.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use url::Url;

use super::{Content, HtmlDocument, XmlDocument, file_name_for};
use crate::decode::ResponseBody;

/// A user-supplied parser for a content type.
pub trait ContentParser: Send + Sync {
    /// Builds the page content from the decoded body.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from reading the body.
    fn parse(&self, body: &ResponseBody, headers: &HeaderMap, uri: &Url) -> io::Result<Content>;
}

/// Parser variants the registry can dispatch to.
#[derive(Clone)]
pub enum ParserKind {
    Html,
    Xml,
    /// Raw file kept as bytes.
    File,
    /// Like `File`, flagged for saving rather than inspection.
    Download,
    Custom(Arc<dyn ContentParser>),
}

impl fmt::Debug for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Html => f.write_str("Html"),
            Self::Xml => f.write_str("Xml"),
            Self::File => f.write_str("File"),
            Self::Download => f.write_str("Download"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl ParserKind {
    /// Runs this parser over a decoded body.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from reading a file-backed body.
    pub fn parse(&self, body: &ResponseBody, headers: &HeaderMap, uri: &Url) -> io::Result<Content> {
        Ok(match self {
            Self::Html => Content::Html(HtmlDocument::parse(&body.text()?)),
            Self::Xml => Content::Xml(XmlDocument::new(body.text()?)),
            Self::File => Content::File {
                file_name: file_name_for(headers, uri),
            },
            Self::Download => Content::Download {
                file_name: file_name_for(headers, uri),
            },
            Self::Custom(parser) => parser.parse(body, headers, uri)?,
        })
    }
}

/// MIME type dispatch table.
///
/// Lookup tries the exact type, then `major/*`, then the default parser.
#[derive(Debug, Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, ParserKind>,
    default: ParserKind,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ParserRegistry {
    /// HTML and XML types mapped, everything else a file.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            parsers: HashMap::new(),
            default: ParserKind::File,
        };
        registry.register("text/html", ParserKind::Html);
        registry.register("application/xhtml+xml", ParserKind::Html);
        registry.register("application/vnd.wap.xhtml+xml", ParserKind::Html);
        registry.register("text/xml", ParserKind::Xml);
        registry.register("application/xml", ParserKind::Xml);
        registry
    }

    /// Maps a MIME type or `major/*` pattern, replacing any previous entry.
    pub fn register(&mut self, mime: &str, parser: ParserKind) {
        self.parsers.insert(mime.trim().to_ascii_lowercase(), parser);
    }

    pub fn set_default(&mut self, parser: ParserKind) {
        self.default = parser;
    }

    /// Parser for a `Content-Type` value (parameters ignored).
    #[must_use]
    pub fn parser_for(&self, content_type: Option<&str>) -> &ParserKind {
        let Some(essence) = content_type.map(mime_essence).filter(|e| !e.is_empty()) else {
            return &self.default;
        };
        if let Some(parser) = self.parsers.get(&essence) {
            return parser;
        }
        essence
            .split_once('/')
            .and_then(|(major, _)| self.parsers.get(&format!("{major}/*")))
            .unwrap_or(&self.default)
    }
}

/// Lowercased `type/subtype` without parameters.
fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Upper;

    impl ContentParser for Upper {
        fn parse(&self, body: &ResponseBody, _: &HeaderMap, _: &Url) -> io::Result<Content> {
            Ok(Content::Xml(XmlDocument::new(body.text()?.to_uppercase())))
        }
    }

    #[test]
    fn test_exact_then_wildcard_then_default() {
        let mut registry = ParserRegistry::with_defaults();
        registry.register("image/*", ParserKind::Download);

        assert!(matches!(registry.parser_for(Some("text/html; charset=utf-8")), ParserKind::Html));
        assert!(matches!(registry.parser_for(Some("TEXT/XML")), ParserKind::Xml));
        assert!(matches!(registry.parser_for(Some("image/png")), ParserKind::Download));
        assert!(matches!(registry.parser_for(Some("application/pdf")), ParserKind::File));
        assert!(matches!(registry.parser_for(None), ParserKind::File));
    }

    #[test]
    fn test_user_override_and_custom_parser() {
        let mut registry = ParserRegistry::with_defaults();
        registry.register("text/html", ParserKind::Custom(Arc::new(Upper)));

        let body = ResponseBody::from_bytes(b"<p>hi</p>");
        let uri = Url::parse("http://example.com/").unwrap();
        let content = registry
            .parser_for(Some("text/html"))
            .parse(&body, &HeaderMap::new(), &uri)
            .unwrap();
        match content {
            Content::Xml(doc) => assert_eq!(doc.source, "<P>HI</P>"),
            other => panic!("unexpected content: {other:?}"),
        }
    }
}
