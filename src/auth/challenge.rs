//! `WWW-Authenticate` challenge parsing.
//!
//! A single header value may carry several challenges
//! (`Basic realm="a", Digest realm="a", nonce="n"`), and a response may
//! carry several headers. Schemes such as NTLM use a bare token68 instead of
//! auth-params, so the raw text of every challenge is retained.

use std::collections::BTreeMap;
use std::fmt;

use url::Url;

/// Authentication schemes the agent can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuthScheme {
    Basic,
    Digest,
    Ntlm,
    Negotiate,
    /// Any scheme the agent does not implement.
    Other,
}

impl AuthScheme {
    /// Maps a case-insensitive scheme token.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "basic" => Self::Basic,
            "digest" => Self::Digest,
            "ntlm" => Self::Ntlm,
            "negotiate" => Self::Negotiate,
            _ => Self::Other,
        }
    }

    /// Selection rank; lower is preferred.
    ///
    /// Digest first, then the NTLM family, then Basic.
    #[must_use]
    pub fn preference(self) -> u8 {
        match self {
            Self::Digest => 0,
            Self::Ntlm | Self::Negotiate => 1,
            Self::Basic => 2,
            Self::Other => u8::MAX,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Digest => "Digest",
            Self::Ntlm => "NTLM",
            Self::Negotiate => "Negotiate",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Scheme token as sent by the server.
    pub scheme_name: String,
    pub scheme: AuthScheme,
    /// Auth-params with lowercased keys and unquoted values.
    pub params: BTreeMap<String, String>,
    /// token68 payload (NTLM / Negotiate messages), if present.
    pub token: Option<String>,
    /// Raw challenge text.
    pub raw: String,
}

impl AuthChallenge {
    /// The `realm` parameter, if any.
    #[must_use]
    pub fn realm_name(&self) -> Option<&str> {
        self.params.get("realm").map(String::as_str)
    }

    /// Parameter lookup by lowercase key.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The realm this challenge protects for a request to `uri`.
    #[must_use]
    pub fn realm(&self, uri: &Url) -> AuthRealm {
        AuthRealm::new(self.scheme, uri, self.realm_name().map(str::to_string))
    }
}

/// Authentication boundary: scheme, base URI, and realm name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthRealm {
    pub scheme: AuthScheme,
    /// Origin root (`scheme://host:port/`) the realm was established for.
    pub base_uri: String,
    pub name: Option<String>,
}

impl AuthRealm {
    #[must_use]
    pub fn new(scheme: AuthScheme, uri: &Url, name: Option<String>) -> Self {
        Self {
            scheme,
            base_uri: origin_root(uri),
            name,
        }
    }

    /// Whether requests to `uri` fall under this realm's base URI.
    #[must_use]
    pub fn covers(&self, uri: &Url) -> bool {
        origin_root(uri) == self.base_uri
    }
}

fn origin_root(uri: &Url) -> String {
    format!("{}/", uri.origin().ascii_serialization())
}

/// Parses every challenge in the given `WWW-Authenticate` header values.
#[must_use]
pub fn parse_challenges<'a>(headers: impl IntoIterator<Item = &'a str>) -> Vec<AuthChallenge> {
    headers
        .into_iter()
        .flat_map(|value| Parser::new(value).parse_all())
        .collect()
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_spaces(&mut self) {
        let trimmed = self.rest().trim_start_matches([' ', '\t']);
        self.pos = self.input.len() - trimmed.len();
    }

    fn skip_separators(&mut self) {
        let trimmed = self.rest().trim_start_matches([' ', '\t', ',']);
        self.pos = self.input.len() - trimmed.len();
    }

    fn read_token(&mut self) -> &'a str {
        let rest = self.rest();
        let end = rest
            .find(|c: char| !is_tchar(c))
            .unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    /// token68 followed by end of input or a comma.
    fn try_token68(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let body_end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || "-._~+/".contains(c)))
            .unwrap_or(rest.len());
        if body_end == 0 {
            return None;
        }
        let padded_end = body_end
            + rest[body_end..]
                .find(|c: char| c != '=')
                .unwrap_or(rest.len() - body_end);
        let after = rest[padded_end..].trim_start_matches([' ', '\t']);
        if after.is_empty() || after.starts_with(',') {
            self.pos += padded_end;
            Some(&rest[..padded_end])
        } else {
            None
        }
    }

    fn read_value(&mut self) -> String {
        if self.peek() == Some('"') {
            self.pos += 1;
            let mut value = String::new();
            let mut chars = self.rest().char_indices();
            while let Some((idx, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        self.pos += idx + 1;
                        return value;
                    }
                    _ => value.push(c),
                }
            }
            self.pos = self.input.len();
            value
        } else {
            let rest = self.rest();
            let end = rest.find([',', ' ', '\t']).unwrap_or(rest.len());
            self.pos += end;
            rest[..end].to_string()
        }
    }

    /// Whether the upcoming text is `token = value` (an auth-param).
    ///
    /// `token==` or `token=,` is base64 padding of a token68 instead.
    fn at_param(&self) -> bool {
        let rest = self.rest();
        let end = rest.find(|c: char| !is_tchar(c)).unwrap_or(rest.len());
        if end == 0 {
            return false;
        }
        let Some(value) = rest[end..].trim_start_matches([' ', '\t']).strip_prefix('=') else {
            return false;
        };
        let value = value.trim_start_matches([' ', '\t']);
        !(value.is_empty() || value.starts_with(['=', ',']))
    }

    fn parse_all(mut self) -> Vec<AuthChallenge> {
        let mut challenges = Vec::new();
        loop {
            self.skip_separators();
            let start = self.pos;
            let scheme_name = self.read_token();
            if scheme_name.is_empty() {
                break;
            }
            let mut challenge = AuthChallenge {
                scheme_name: scheme_name.to_string(),
                scheme: AuthScheme::from_token(scheme_name),
                params: BTreeMap::new(),
                token: None,
                raw: String::new(),
            };
            self.skip_spaces();

            if !self.at_param() {
                if let Some(token) = self.try_token68() {
                    challenge.token = Some(token.to_string());
                }
            }

            loop {
                self.skip_separators();
                if !self.at_param() {
                    break;
                }
                let key = self.read_token().to_ascii_lowercase();
                self.skip_spaces();
                self.pos += 1; // '='
                self.skip_spaces();
                let value = self.read_value();
                challenge.params.insert(key, value);
            }

            challenge.raw = self.input[start..self.pos]
                .trim_end_matches([' ', '\t', ','])
                .to_string();
            challenges.push(challenge);

            if self.pos >= self.input.len() {
                break;
            }
        }
        challenges
    }
}

/// RFC 7230 tchar.
fn is_tchar(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}
