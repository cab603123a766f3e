//! User-Agent strings: the agent's own identifier and named browser aliases.

/// Project URL for User-Agent identification (RFC 9308 good citizenship).
const PROJECT_UA_URL: &str = "https://github.com/fierce/webagent";

/// Alias that selects [`default_user_agent`].
pub const DEFAULT_ALIAS: &str = "webagent";

/// Browser identities selectable through `user_agent_alias`.
pub const AGENT_ALIASES: &[(&str, &str)] = &[
    (
        "Linux Firefox",
        "Mozilla/5.0 (X11; Linux x86_64; rv:131.0) Gecko/20100101 Firefox/131.0",
    ),
    (
        "Mac Firefox",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:131.0) Gecko/20100101 Firefox/131.0",
    ),
    (
        "Mac Safari",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_7) AppleWebKit/605.1.15 (KHTML, like Gecko) \
         Version/18.0 Safari/605.1.15",
    ),
    (
        "Windows Chrome",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/131.0.0.0 Safari/537.36",
    ),
    (
        "Windows Edge",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
    ),
    (
        "Windows Firefox",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:131.0) Gecko/20100101 Firefox/131.0",
    ),
    (
        "iPhone",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 18_0 like Mac OS X) AppleWebKit/605.1.15 \
         (KHTML, like Gecko) Version/18.0 Mobile/15E148 Safari/604.1",
    ),
    (
        "Android",
        "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/131.0.0.0 Mobile Safari/537.36",
    ),
];

/// Default User-Agent: crate name and version, project URL, runtime.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("webagent/{version} (+{PROJECT_UA_URL}) Rust")
}

/// Resolves an alias (case-insensitive) to a User-Agent string.
#[must_use]
pub fn user_agent_for_alias(alias: &str) -> Option<String> {
    if alias.eq_ignore_ascii_case(DEFAULT_ALIAS) {
        return Some(default_user_agent());
    }
    AGENT_ALIASES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(alias.trim()))
        .map(|(_, ua)| (*ua).to_string())
}

/// Product token used for robots.txt group matching (`webagent/1.0 (...)` -> `webagent`).
#[must_use]
pub fn product_token(user_agent: &str) -> &str {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or(user_agent)
}
