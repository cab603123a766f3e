//! Owned HTML document model extracted with `scraper`.
//!
//! `scraper::Html` is not `Send`, so documents are parsed once into plain
//! owned data that pages can carry across await points.

use std::fmt;

use scraper::{ElementRef, Html};
use url::Url;

use super::ElementNotFound;
use super::form::{Button, Field, FieldKind, Form};

/// A hyperlink-like element: `a`, `area`, `frame` or `iframe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Element name.
    pub tag: String,
    /// `href` (or `src` for frames), unresolved.
    pub href: Option<String>,
    /// Visible text with whitespace collapsed (`alt` for areas, `name` for frames).
    pub text: String,
    pub id: Option<String>,
    /// `rel` tokens, lowercased.
    pub rel: Vec<String>,
}

impl Link {
    /// Whether `rel` carries `nofollow`.
    #[must_use]
    pub fn is_nofollow(&self) -> bool {
        self.rel.iter().any(|r| r == "nofollow")
    }
}

/// A `<meta>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    /// `http-equiv`, lowercased.
    pub http_equiv: Option<String>,
    /// `name`, lowercased.
    pub name: Option<String>,
    pub content: Option<String>,
    /// `charset` attribute, lowercased.
    pub charset: Option<String>,
    /// Whether the element sits inside `<head>`.
    pub in_head: bool,
}

/// Page-level robots directives from `<meta name="robots">`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RobotsDirectives {
    pub noindex: bool,
    pub nofollow: bool,
}

/// Criteria for [`HtmlDocument::link_with`]. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkQuery {
    pub text: Option<String>,
    pub href: Option<String>,
    pub id: Option<String>,
}

impl LinkQuery {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn href(href: impl Into<String>) -> Self {
        Self {
            href: Some(href.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    fn matches(&self, link: &Link) -> bool {
        self.text.as_deref().is_none_or(|t| link.text == t.trim())
            && self.href.as_deref().is_none_or(|h| link.href.as_deref() == Some(h))
            && self.id.as_deref().is_none_or(|i| link.id.as_deref() == Some(i))
    }
}

impl fmt::Display for LinkQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_criteria(
            f,
            &[("text", &self.text), ("href", &self.href), ("id", &self.id)],
        )
    }
}

/// Criteria for [`HtmlDocument::form_with`]. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormQuery {
    pub name: Option<String>,
    pub id: Option<String>,
    pub action: Option<String>,
}

impl FormQuery {
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    fn matches(&self, form: &Form) -> bool {
        self.name.as_deref().is_none_or(|n| form.name.as_deref() == Some(n))
            && self.id.as_deref().is_none_or(|i| form.id.as_deref() == Some(i))
            && self.action.as_deref().is_none_or(|a| form.action.as_deref() == Some(a))
    }
}

impl fmt::Display for FormQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_criteria(
            f,
            &[("name", &self.name), ("id", &self.id), ("action", &self.action)],
        )
    }
}

fn write_criteria(f: &mut fmt::Formatter<'_>, pairs: &[(&str, &Option<String>)]) -> fmt::Result {
    let set: Vec<String> = pairs
        .iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}={v:?}")))
        .collect();
    if set.is_empty() {
        f.write_str("any")
    } else {
        f.write_str(&set.join(" "))
    }
}

/// Parsed HTML page content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlDocument {
    pub title: Option<String>,
    /// `<base href>`, unresolved.
    pub base: Option<String>,
    pub links: Vec<Link>,
    pub forms: Vec<Form>,
    pub metas: Vec<Meta>,
    pub robots: RobotsDirectives,
}

impl HtmlDocument {
    /// Extracts the document model from HTML source.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let html = Html::parse_document(source);
        let mut doc = Self::default();

        for node in html.root_element().descendants() {
            let Some(el) = ElementRef::wrap(node) else {
                continue;
            };
            match el.value().name() {
                "title" if doc.title.is_none() => {
                    doc.title = Some(collapse_whitespace(&el.text().collect::<String>()));
                }
                "base" if doc.base.is_none() => {
                    doc.base = attr(el, "href");
                }
                "a" => doc.links.push(link(el, "href", collapse_whitespace(&el.text().collect::<String>()))),
                "area" => doc.links.push(link(el, "href", attr(el, "alt").unwrap_or_default())),
                "frame" | "iframe" => {
                    doc.links.push(link(el, "src", attr(el, "name").unwrap_or_default()));
                }
                "meta" => doc.metas.push(meta(el)),
                "form" => doc.forms.push(form(el)),
                _ => {}
            }
        }

        doc.robots = robots_directives(&doc.metas);
        doc
    }

    /// The URI relative references resolve against: `<base href>` when
    /// present and valid, otherwise the page URI.
    #[must_use]
    pub fn base_uri(&self, page_uri: &Url) -> Url {
        self.base
            .as_deref()
            .and_then(|base| page_uri.join(base.trim()).ok())
            .unwrap_or_else(|| page_uri.clone())
    }

    #[must_use]
    pub fn link_with(&self, query: &LinkQuery) -> Option<&Link> {
        self.links.iter().find(|link| query.matches(link))
    }

    /// Like [`link_with`](Self::link_with), failing when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`ElementNotFound`] naming the criteria.
    pub fn link_with_required(&self, query: &LinkQuery) -> Result<&Link, ElementNotFound> {
        self.link_with(query)
            .ok_or_else(|| ElementNotFound::new("link", query))
    }

    #[must_use]
    pub fn links_with(&self, query: &LinkQuery) -> Vec<&Link> {
        self.links.iter().filter(|link| query.matches(link)).collect()
    }

    #[must_use]
    pub fn form_with(&self, query: &FormQuery) -> Option<&Form> {
        self.forms.iter().find(|form| query.matches(form))
    }

    /// Like [`form_with`](Self::form_with), failing when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`ElementNotFound`] naming the criteria.
    pub fn form_with_required(&self, query: &FormQuery) -> Result<&Form, ElementNotFound> {
        self.form_with(query)
            .ok_or_else(|| ElementNotFound::new("form", query))
    }

    /// `content` of every `<meta http-equiv>` with the given (lowercase) name.
    pub fn http_equiv<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Meta> + 'a {
        self.metas
            .iter()
            .filter(move |m| m.http_equiv.as_deref() == Some(name))
    }
}

fn attr(el: ElementRef<'_>, name: &str) -> Option<String> {
    el.value().attr(name).map(str::to_string)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn link(el: ElementRef<'_>, href_attr: &str, text: String) -> Link {
    Link {
        tag: el.value().name().to_string(),
        href: attr(el, href_attr),
        text,
        id: attr(el, "id"),
        rel: el
            .value()
            .attr("rel")
            .map(|rel| rel.split_whitespace().map(str::to_ascii_lowercase).collect())
            .unwrap_or_default(),
    }
}

fn meta(el: ElementRef<'_>) -> Meta {
    let in_head = el
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().name() == "head");
    Meta {
        http_equiv: attr(el, "http-equiv").map(|v| v.to_ascii_lowercase()),
        name: attr(el, "name").map(|v| v.to_ascii_lowercase()),
        content: attr(el, "content"),
        charset: attr(el, "charset").map(|v| v.trim().to_ascii_lowercase()),
        in_head,
    }
}

fn robots_directives(metas: &[Meta]) -> RobotsDirectives {
    let mut directives = RobotsDirectives::default();
    for content in metas
        .iter()
        .filter(|m| m.name.as_deref() == Some("robots"))
        .filter_map(|m| m.content.as_deref())
    {
        for token in content.split(',').map(|t| t.trim().to_ascii_lowercase()) {
            match token.as_str() {
                "noindex" => directives.noindex = true,
                "nofollow" => directives.nofollow = true,
                "none" => {
                    directives.noindex = true;
                    directives.nofollow = true;
                }
                _ => {}
            }
        }
    }
    directives
}

fn form(el: ElementRef<'_>) -> Form {
    let mut form = Form {
        name: attr(el, "name"),
        id: attr(el, "id"),
        action: attr(el, "action"),
        method: attr(el, "method")
            .map(|m| m.to_ascii_uppercase())
            .unwrap_or_else(|| "GET".to_string()),
        enctype: attr(el, "enctype")
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "application/x-www-form-urlencoded".to_string()),
        fields: Vec::new(),
        buttons: Vec::new(),
    };

    for node in el.descendants() {
        let Some(child) = ElementRef::wrap(node) else {
            continue;
        };
        match child.value().name() {
            "input" => input(child, &mut form),
            "button" => {
                let kind = attr(child, "type").map_or_else(|| "submit".to_string(), |t| t.to_ascii_lowercase());
                if kind == "submit" {
                    form.buttons.push(Button {
                        name: attr(child, "name"),
                        value: attr(child, "value").unwrap_or_default(),
                    });
                }
            }
            "textarea" => {
                if let Some(name) = attr(child, "name") {
                    form.fields.push(Field::new(name, child.text().collect::<String>(), FieldKind::Textarea));
                }
            }
            "select" => {
                if let Some(name) = attr(child, "name") {
                    form.fields.push(select(child, name));
                }
            }
            _ => {}
        }
    }
    form
}

fn input(el: ElementRef<'_>, form: &mut Form) {
    let kind = attr(el, "type").map_or_else(|| "text".to_string(), |t| t.to_ascii_lowercase());
    let value = attr(el, "value");
    let checked = el.value().attr("checked").is_some();

    if matches!(kind.as_str(), "submit" | "image") {
        form.buttons.push(Button {
            name: attr(el, "name"),
            value: value.unwrap_or_default(),
        });
        return;
    }
    let Some(name) = attr(el, "name") else {
        return;
    };
    let field = match kind.as_str() {
        "button" | "reset" => return,
        "checkbox" => Field::new(name, value.unwrap_or_else(|| "on".to_string()), FieldKind::Checkbox { checked }),
        "radio" => Field::new(name, value.unwrap_or_else(|| "on".to_string()), FieldKind::Radio { checked }),
        "file" => Field::new(name, String::new(), FieldKind::File(None)),
        "hidden" => Field::new(name, value.unwrap_or_default(), FieldKind::Hidden),
        "password" => Field::new(name, value.unwrap_or_default(), FieldKind::Password),
        _ => Field::new(name, value.unwrap_or_default(), FieldKind::Text),
    };
    form.fields.push(field);
}

fn select(el: ElementRef<'_>, name: String) -> Field {
    let options: Vec<(String, bool)> = el
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|o| o.value().name() == "option")
        .map(|o| {
            let value = attr(o, "value")
                .unwrap_or_else(|| collapse_whitespace(&o.text().collect::<String>()));
            (value, o.value().attr("selected").is_some())
        })
        .collect();
    let value = options
        .iter()
        .find(|(_, selected)| *selected)
        .or_else(|| options.first())
        .map(|(v, _)| v.clone())
        .unwrap_or_default();
    let mut field = Field::new(name, value, FieldKind::Select);
    field.options = options.into_iter().map(|(v, _)| v).collect();
    field
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html><head>
  <title>  Test   Page </title>
  <base href="http://example.com/sub/">
  <meta http-equiv="Refresh" content="5; url=/next">
  <meta name="ROBOTS" content="NoIndex, nofollow">
</head><body>
  <a href="/one" id="first">One</a>
  <a href="two.html" rel="NoFollow external">  Two
     links </a>
  <map><area href="/map" alt="Map area"></map>
  <iframe src="/frame" name="side"></iframe>
  <meta http-equiv="refresh" content="0">
  <form name="login" action="/session" method="post">
    <input type="text" name="user" value="bob">
    <input type="password" name="pass">
    <input type="checkbox" name="remember">
    <input type="submit" name="go" value="Log in">
    <select name="lang"><option value="en">English</option><option selected>French</option></select>
    <textarea name="note">hi</textarea>
  </form>
</body></html>"#;

    #[test]
    fn test_parse_title_base_and_links() {
        let doc = HtmlDocument::parse(PAGE);
        assert_eq!(doc.title.as_deref(), Some("Test Page"));
        assert_eq!(doc.base.as_deref(), Some("http://example.com/sub/"));
        let texts: Vec<_> = doc.links.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["One", "Two links", "Map area", "side"]);
        assert!(doc.links[1].is_nofollow());
        assert_eq!(doc.links[3].href.as_deref(), Some("/frame"));
    }

    #[test]
    fn test_meta_position_and_robots() {
        let doc = HtmlDocument::parse(PAGE);
        let refreshes: Vec<_> = doc.http_equiv("refresh").collect();
        assert_eq!(refreshes.len(), 2);
        assert!(refreshes[0].in_head);
        assert!(!refreshes[1].in_head);
        assert!(doc.robots.noindex);
        assert!(doc.robots.nofollow);
    }

    #[test]
    fn test_form_fields() {
        let doc = HtmlDocument::parse(PAGE);
        let form = doc.form_with(&FormQuery::name("login")).unwrap();
        assert_eq!(form.method, "POST");
        assert_eq!(form.action.as_deref(), Some("/session"));
        assert_eq!(form.field("user").unwrap().value, "bob");
        assert_eq!(form.field("lang").unwrap().value, "French");
        assert_eq!(form.field("note").unwrap().value, "hi");
        assert_eq!(form.buttons.len(), 1);
        assert!(matches!(
            form.field("remember").unwrap().kind,
            FieldKind::Checkbox { checked: false }
        ));
    }

    #[test]
    fn test_strict_and_lenient_lookups() {
        let doc = HtmlDocument::parse(PAGE);
        assert!(doc.link_with(&LinkQuery::text("Missing")).is_none());
        let err = doc.link_with_required(&LinkQuery::text("Missing")).unwrap_err();
        assert_eq!(err.to_string(), "no link matching text=\"Missing\"");
        assert_eq!(
            doc.link_with_required(&LinkQuery::id("first")).unwrap().href.as_deref(),
            Some("/one")
        );
        assert!(doc.form_with_required(&FormQuery::name("search")).is_err());
    }

    #[test]
    fn test_base_uri_resolution() {
        let doc = HtmlDocument::parse(PAGE);
        let page = Url::parse("http://other.com/a/b").unwrap();
        assert_eq!(doc.base_uri(&page).as_str(), "http://example.com/sub/");
        let plain = HtmlDocument::parse("<p>no base</p>");
        assert_eq!(plain.base_uri(&page), page);
    }
}
