//! robots.txt fetching and matching for robots mode.
//!
//! Rules are cached per origin for 24h. A robots.txt that cannot be fetched,
//! or answers with a non-2xx status, allows everything.

use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::transport::{Transport, TransportRequest};
use crate::user_agent::product_token;

const ROBOTS_TTL: Duration = Duration::from_secs(24 * 3600);

/// Larger robots.txt files are truncated.
const MAX_ROBOTS_BYTES: usize = 512 * 1024;

/// Result of checking a URL against robots.txt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsDecision {
    Allowed,
    Disallowed,
}

/// robots.txt checker with per-origin cache.
#[derive(Debug, Default)]
pub struct RobotsCache {
    cache: DashMap<String, CachedRobots>,
}

#[derive(Debug)]
struct CachedRobots {
    body: String,
    fetched_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    path: String,
}

impl RobotsCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Whether `uri` may be fetched by `user_agent`.
    ///
    /// Non-http(s) URIs are always allowed. robots.txt itself is fetched
    /// through `transport` and cached per origin.
    #[instrument(level = "debug", skip(self, transport), fields(uri = %uri))]
    pub async fn check_allowed(
        &self,
        uri: &Url,
        user_agent: &str,
        transport: &dyn Transport,
    ) -> RobotsDecision {
        let Some(origin) = origin_for_robots(uri) else {
            return RobotsDecision::Allowed;
        };
        if uri.path() == "/robots.txt" {
            return RobotsDecision::Allowed;
        }

        let now = SystemTime::now();
        let need_fetch = self.cache.get(&origin).is_none_or(|c| {
            now.duration_since(c.fetched_at).unwrap_or(Duration::MAX) > ROBOTS_TTL
        });
        if need_fetch {
            let body = fetch_robots_txt(&origin, user_agent, transport).await;
            self.cache.insert(
                origin.clone(),
                CachedRobots {
                    body,
                    fetched_at: now,
                },
            );
        }

        let rules = self
            .cache
            .get(&origin)
            .map(|entry| rules_for(&entry.body, product_token(user_agent)))
            .unwrap_or_default();
        let mut path = uri.path().to_string();
        if let Some(query) = uri.query() {
            path.push('?');
            path.push_str(query);
        }
        if is_allowed(&rules, &path) {
            RobotsDecision::Allowed
        } else {
            debug!(path = %path, origin = %origin, "robots.txt disallows path");
            RobotsDecision::Disallowed
        }
    }

    /// Drops every cached robots.txt.
    pub fn clear(&self) {
        self.cache.clear();
    }
}

/// `scheme://host[:port]` for http(s) URIs.
#[must_use]
pub fn origin_for_robots(uri: &Url) -> Option<String> {
    if !matches!(uri.scheme(), "http" | "https") {
        return None;
    }
    let host = uri.host_str()?;
    Some(match uri.port() {
        Some(port) => format!("{}://{host}:{port}", uri.scheme()),
        None => format!("{}://{host}", uri.scheme()),
    })
}

async fn fetch_robots_txt(origin: &str, user_agent: &str, transport: &dyn Transport) -> String {
    let Ok(robots_uri) = Url::parse(&format!("{origin}/robots.txt")) else {
        return String::new();
    };
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, value);
    }
    let request = TransportRequest {
        method: Method::GET,
        uri: robots_uri.clone(),
        headers,
        body: None,
    };

    let response = match transport.request(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(uri = %robots_uri, error = %e, "robots.txt fetch failed; allowing all");
            return String::new();
        }
    };
    if !(200..300).contains(&response.status) {
        debug!(uri = %robots_uri, status = response.status, "no robots.txt");
        return String::new();
    }

    let mut body = Vec::new();
    let mut stream = response.body;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                body.extend_from_slice(&chunk);
                if body.len() >= MAX_ROBOTS_BYTES {
                    body.truncate(MAX_ROBOTS_BYTES);
                    break;
                }
            }
            Err(e) => {
                warn!(uri = %robots_uri, error = %e, "robots.txt body interrupted; allowing all");
                return String::new();
            }
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Rules of the group naming `token`, or of the `*` group when none does.
fn rules_for(body: &str, token: &str) -> Vec<Rule> {
    let mut specific = Vec::new();
    let mut wildcard = Vec::new();
    let mut matched_specific = false;

    // Consecutive User-agent lines share one group.
    let mut agents: Vec<String> = Vec::new();
    let mut in_rules = false;
    for line in body.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        match key.as_str() {
            "user-agent" => {
                if in_rules {
                    agents.clear();
                    in_rules = false;
                }
                agents.push(value.to_ascii_lowercase());
            }
            "allow" | "disallow" => {
                in_rules = true;
                if value.is_empty() {
                    continue;
                }
                let rule = Rule {
                    allow: key == "allow",
                    path: normalize_rule_path(value),
                };
                if agents.iter().any(|a| a.eq_ignore_ascii_case(token)) {
                    matched_specific = true;
                    specific.push(rule);
                } else if agents.iter().any(|a| a == "*") {
                    wildcard.push(rule);
                }
            }
            _ => {}
        }
    }
    if matched_specific { specific } else { wildcard }
}

fn normalize_rule_path(path: &str) -> String {
    if path.starts_with('/') || path.starts_with('*') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Longest matching rule wins; ties go to `Allow`.
fn is_allowed(rules: &[Rule], path: &str) -> bool {
    rules
        .iter()
        .filter(|rule| rule_matches(&rule.path, path))
        .max_by_key(|rule| (rule.path.len(), rule.allow))
        .is_none_or(|rule| rule.allow)
}

/// Prefix match with `*` wildcards and a trailing `$` anchor.
fn rule_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let parts: Vec<&str> = pattern.split('*').collect();
    let Some((first, wildcard_parts)) = parts.split_first() else {
        return true;
    };
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };
    let Some((last, middle)) = wildcard_parts.split_last() else {
        return !anchored || rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    if anchored {
        rest.ends_with(last)
    } else {
        rest.contains(last)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn allowed(body: &str, token: &str, path: &str) -> bool {
        is_allowed(&rules_for(body, token), path)
    }

    #[test]
    fn test_empty_robots_allows_all() {
        assert!(allowed("", "webagent", "/anything"));
    }

    #[test]
    fn test_wildcard_group_disallow() {
        let body = "User-agent: *\nDisallow: /api/\nDisallow: /private/\n";
        assert!(!allowed(body, "webagent", "/api/users"));
        assert!(!allowed(body, "webagent", "/private/"));
        assert!(allowed(body, "webagent", "/public"));
    }

    #[test]
    fn test_specific_group_replaces_wildcard() {
        let body = "User-agent: *\nDisallow: /\n\nUser-agent: webagent\nDisallow: /nobot/\n";
        assert!(allowed(body, "webagent", "/page"));
        assert!(!allowed(body, "webagent", "/nobot/x"));
        assert!(!allowed(body, "otherbot", "/page"));
    }

    #[test]
    fn test_longest_match_wins_and_ties_allow() {
        let body = "User-agent: *\nDisallow: /shop\nAllow: /shop/public\n";
        assert!(!allowed(body, "webagent", "/shop/cart"));
        assert!(allowed(body, "webagent", "/shop/public/item"));

        let tie = "User-agent: *\nDisallow: /same\nAllow: /same\n";
        assert!(allowed(tie, "webagent", "/same"));
    }

    #[test]
    fn test_grouped_user_agents_and_comments() {
        let body = "# comment\nUser-agent: a\nUser-agent: webagent # us\nDisallow: /x\n";
        assert!(!allowed(body, "webagent", "/x"));
        assert!(allowed(body, "b", "/x"));
    }

    #[test]
    fn test_empty_disallow_is_ignored() {
        assert!(allowed("User-agent: *\nDisallow: \n", "webagent", "/"));
    }

    #[test]
    fn test_wildcard_and_anchor_patterns() {
        assert!(rule_matches("/*.pdf$", "/docs/a.pdf"));
        assert!(!rule_matches("/*.pdf$", "/docs/a.pdf?x"));
        assert!(rule_matches("/a*/c", "/abb/c/d"));
        assert!(rule_matches("/exact$", "/exact"));
        assert!(rule_matches("/*.pdf$", "/a.pdf.pdf"));
        assert!(!rule_matches("/exact$", "/exactly"));
    }

    #[test]
    fn test_normalize_rule_path_adds_leading_slash() {
        assert_eq!(normalize_rule_path("foo/bar"), "/foo/bar");
        assert_eq!(normalize_rule_path("/foo"), "/foo");
    }

    #[test]
    fn test_origin_for_robots() {
        let origin = |s: &str| origin_for_robots(&Url::parse(s).unwrap());
        assert_eq!(origin("https://example.com/path?q=1#f"), Some("https://example.com".into()));
        assert_eq!(origin("http://localhost:8080/file"), Some("http://localhost:8080".into()));
        assert_eq!(origin("file:///tmp/x"), None);
    }
}
