//! Meta refresh and `Refresh` header parsing.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use url::Url;

use super::MetaRefreshMode;
use crate::page::HtmlDocument;

static REFRESH_CONTENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(\d+(?:\.\d*)?)\s*(?:[;,]\s*(?:url\s*=\s*)?(.*?))?\s*$").ok()
});

/// A parsed refresh instruction: `DELAY` or `DELAY; url=URL`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaRefresh {
    pub delay: Duration,
    /// Target as written (quotes stripped). `None` refreshes the page itself.
    pub url: Option<String>,
}

impl MetaRefresh {
    /// Parses a refresh `content` value.
    ///
    /// Keyword and attribute matching is case-insensitive and the URL may be
    /// single- or double-quoted. Returns `None` for values without a delay.
    #[must_use]
    pub fn parse(content: &str) -> Option<Self> {
        let caps = REFRESH_CONTENT.as_ref()?.captures(content)?;
        let seconds: f64 = caps.get(1)?.as_str().parse().ok()?;
        let url = caps
            .get(2)
            .map(|m| strip_quotes(m.as_str().trim()).trim().to_string())
            .filter(|u| !u.is_empty());
        Some(Self {
            delay: Duration::try_from_secs_f64(seconds).ok()?,
            url,
        })
    }
}

fn strip_quotes(value: &str) -> &str {
    let value = value
        .strip_prefix(['\'', '"'])
        .unwrap_or(value);
    value.strip_suffix(['\'', '"']).unwrap_or(value)
}

/// Finds the first meta refresh the mode allows.
///
/// [`MetaRefreshMode::Head`] only honours tags inside `<head>`.
#[must_use]
pub fn find_meta_refresh(document: &HtmlDocument, mode: MetaRefreshMode) -> Option<MetaRefresh> {
    if mode == MetaRefreshMode::Never {
        return None;
    }
    document
        .http_equiv("refresh")
        .filter(|meta| mode == MetaRefreshMode::Anywhere || meta.in_head)
        .filter_map(|meta| meta.content.as_deref())
        .find_map(MetaRefresh::parse)
}

/// Resolves a refresh target against `base`.
///
/// Spaces and other unsafe characters are percent-encoded; a missing target
/// means `base` itself.
///
/// # Errors
///
/// Returns the parse error for targets that cannot be resolved.
pub fn resolve_refresh_target(base: &Url, url: Option<&str>) -> Result<Url, url::ParseError> {
    match url.map(str::trim).filter(|u| !u.is_empty()) {
        None => Ok(base.clone()),
        Some(target) => base.join(target),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        let cases = [
            ("5;url=http://example.com/", 5.0, Some("http://example.com/")),
            ("0; URL='/next'", 0.0, Some("/next")),
            ("  3 ; Url = \"a b.html\" ", 3.0, Some("a b.html")),
            ("0,url=/comma", 0.0, Some("/comma")),
            ("0; /bare", 0.0, Some("/bare")),
            ("2", 2.0, None),
            ("1.5;url=", 1.5, None),
        ];
        for (content, delay, url) in cases {
            let refresh = MetaRefresh::parse(content).unwrap();
            assert_eq!(refresh.delay, Duration::from_secs_f64(delay), "content {content:?}");
            assert_eq!(refresh.url.as_deref(), url, "content {content:?}");
        }
        assert!(MetaRefresh::parse("soon").is_none());
        assert!(MetaRefresh::parse("").is_none());
        assert!(MetaRefresh::parse("99999999999999999999;url=/x").is_none());
    }

    #[test]
    fn test_find_respects_mode() {
        let doc = HtmlDocument::parse(
            "<html><head></head><body><meta http-equiv=\"REFRESH\" content=\"0;url=/body\"></body></html>",
        );
        assert!(find_meta_refresh(&doc, MetaRefreshMode::Never).is_none());
        assert!(find_meta_refresh(&doc, MetaRefreshMode::Head).is_none());
        let found = find_meta_refresh(&doc, MetaRefreshMode::Anywhere).unwrap();
        assert_eq!(found.url.as_deref(), Some("/body"));

        let head = HtmlDocument::parse(
            "<html><head><meta http-equiv=\"refresh\" content=\"1\"></head></html>",
        );
        assert_eq!(
            find_meta_refresh(&head, MetaRefreshMode::Head).unwrap().url,
            None
        );
    }

    #[test]
    fn test_resolve_target_encodes_and_defaults_to_self() {
        let base = Url::parse("http://example.com/dir/page.html").unwrap();
        assert_eq!(resolve_refresh_target(&base, None).unwrap(), base);
        assert_eq!(
            resolve_refresh_target(&base, Some("a b.html")).unwrap().as_str(),
            "http://example.com/dir/a%20b.html"
        );
        assert_eq!(
            resolve_refresh_target(&base, Some("/caf\u{e9}")).unwrap().as_str(),
            "http://example.com/caf%C3%A9"
        );
        assert_eq!(
            resolve_refresh_target(&base, Some("?q=1")).unwrap().as_str(),
            "http://example.com/dir/page.html?q=1"
        );
    }
}
