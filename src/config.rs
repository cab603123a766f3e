//! Agent configuration.
//!
//! [`AgentConfig`] is passed explicitly to [`Agent::new`](crate::Agent::new);
//! each agent owns its settings. It can be loaded from a JSON document whose
//! keys mirror the field names, e.g.
//!
//! ```json
//! { "redirect_ok": "permanent", "follow_meta_refresh": "anywhere",
//!   "max_history": 50, "proxy": { "address": "proxy.local", "port": 3128 } }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::navigation::{MetaRefreshMode, RedirectPolicy};
use crate::user_agent;

/// Default bound on [`History`](crate::agent::History).
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Default size above which bodies are spooled to a temp file.
pub const DEFAULT_MAX_FILE_BUFFER: usize = 100_000;

/// Default number of redirect/refresh hops per fetch.
pub const DEFAULT_REDIRECTION_LIMIT: usize = 20;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("unknown user agent alias {alias:?}")]
    UnknownAlias { alias: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// HTTP proxy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
}

impl ProxyConfig {
    /// Proxy URL without credentials.
    #[must_use]
    pub fn url(&self) -> String {
        if self.address.contains("://") {
            format!("{}:{}", self.address, self.port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        }
    }
}

/// Peer certificate verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    #[default]
    Peer,
    /// Accept any certificate. For testing only.
    None,
}

/// TLS client settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM client certificate.
    pub cert: Option<PathBuf>,
    /// PEM private key for `cert`.
    pub key: Option<PathBuf>,
    /// Extra PEM CA bundle.
    pub ca_file: Option<PathBuf>,
    /// Directory of PEM CA certificates.
    pub cert_store: Option<PathBuf>,
    pub verify_mode: VerifyMode,
    /// Minimum protocol version: `TLSv1_2` or `TLSv1_3`.
    pub ssl_version: Option<String>,
}

/// Options for one [`Agent`](crate::Agent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub proxy: Option<ProxyConfig>,
    pub tls: TlsConfig,
    /// `true`, `false` or `"permanent"` (follow 301/308 only).
    #[serde(
        serialize_with = "serialize_redirect_ok",
        deserialize_with = "deserialize_redirect_ok"
    )]
    pub redirect_ok: RedirectPolicy,
    /// Hops (redirects plus refreshes) allowed per fetch.
    pub redirection_limit: usize,
    /// Keep method and body across 307/308.
    pub redirect_preserve_method: bool,
    /// `true` (head only), `false` or `"anywhere"`.
    #[serde(
        serialize_with = "serialize_meta_refresh",
        deserialize_with = "deserialize_meta_refresh"
    )]
    pub follow_meta_refresh: MetaRefreshMode,
    /// Follow refreshes that point at the current page.
    pub follow_meta_refresh_self: bool,
    /// History bound; `None` is unbounded.
    pub max_history: Option<usize>,
    pub max_file_buffer: usize,
    /// Connect timeout in seconds.
    pub open_timeout: Option<u64>,
    /// Per-read timeout in seconds.
    pub read_timeout: Option<u64>,
    /// Pooled connection idle timeout in seconds.
    pub idle_timeout: Option<u64>,
    /// Honour robots.txt and robots meta directives.
    pub robots: bool,
    pub user_agent_alias: Option<String>,
    /// Explicit User-Agent; wins over the alias.
    pub user_agent: Option<String>,
    /// Headers added to every request.
    pub request_headers: BTreeMap<String, String>,
    /// Status codes returned as pages instead of errors.
    pub allowed_error_codes: Vec<u16>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            tls: TlsConfig::default(),
            redirect_ok: RedirectPolicy::Always,
            redirection_limit: DEFAULT_REDIRECTION_LIMIT,
            redirect_preserve_method: false,
            follow_meta_refresh: MetaRefreshMode::Never,
            follow_meta_refresh_self: false,
            max_history: Some(DEFAULT_MAX_HISTORY),
            max_file_buffer: DEFAULT_MAX_FILE_BUFFER,
            open_timeout: None,
            read_timeout: None,
            idle_timeout: Some(5),
            robots: false,
            user_agent_alias: None,
            user_agent: None,
            request_headers: BTreeMap::new(),
            allowed_error_codes: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Loads and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed or validated.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates values against their accepted ranges.
    ///
    /// # Errors
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redirection_limit > 1000 {
            return Err(ConfigError::invalid(
                "redirection_limit",
                format!("{}. Expected range: 0..=1000", self.redirection_limit),
            ));
        }
        if self.max_history == Some(0) {
            return Err(ConfigError::invalid(
                "max_history",
                "0. Expected at least 1, or null for unbounded",
            ));
        }
        validate_timeout_secs("open_timeout", self.open_timeout)?;
        validate_timeout_secs("read_timeout", self.read_timeout)?;
        validate_timeout_secs("idle_timeout", self.idle_timeout)?;

        if let Some(code) = self
            .allowed_error_codes
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(ConfigError::invalid(
                "allowed_error_codes",
                format!("{code}. Expected HTTP status codes 100..=599"),
            ));
        }
        if let Some(proxy) = &self.proxy {
            if proxy.address.trim().is_empty() {
                return Err(ConfigError::invalid("proxy.address", "must not be empty"));
            }
            if proxy.port == 0 {
                return Err(ConfigError::invalid("proxy.port", "0. Expected range: 1..=65535"));
            }
        }
        if self.tls.cert.is_some() != self.tls.key.is_some() {
            return Err(ConfigError::invalid(
                "tls.cert",
                "client certificate and key must be configured together",
            ));
        }
        if let Some(version) = &self.tls.ssl_version
            && parse_tls_version(version).is_none()
        {
            return Err(ConfigError::invalid(
                "tls.ssl_version",
                format!("{version:?}. Expected TLSv1_2 or TLSv1_3"),
            ));
        }
        self.resolved_user_agent()?;
        Ok(())
    }

    /// User-Agent to send: explicit value, then alias, then the default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownAlias`] for unregistered aliases.
    pub fn resolved_user_agent(&self) -> Result<String, ConfigError> {
        if let Some(ua) = &self.user_agent {
            return Ok(ua.clone());
        }
        match &self.user_agent_alias {
            Some(alias) => user_agent::user_agent_for_alias(alias).ok_or_else(|| {
                ConfigError::UnknownAlias {
                    alias: alias.clone(),
                }
            }),
            None => Ok(user_agent::default_user_agent()),
        }
    }
}

/// Minimum TLS version named by `ssl_version`.
pub(crate) fn parse_tls_version(version: &str) -> Option<reqwest::tls::Version> {
    match version.to_ascii_uppercase().replace(['.', '_', ' '], "").as_str() {
        "TLSV12" => Some(reqwest::tls::Version::TLS_1_2),
        "TLSV13" => Some(reqwest::tls::Version::TLS_1_3),
        _ => None,
    }
}

fn validate_timeout_secs(field: &'static str, value: Option<u64>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::invalid(
            field,
            format!("{value}. Expected range: 1..=3600"),
        ));
    }
    Ok(())
}

/// A boolean switch or a named mode.
#[derive(Deserialize)]
#[serde(untagged)]
enum Toggle<T> {
    Flag(bool),
    Mode(T),
}

fn deserialize_redirect_ok<'de, D: Deserializer<'de>>(d: D) -> Result<RedirectPolicy, D::Error> {
    Ok(match Toggle::<RedirectPolicy>::deserialize(d)? {
        Toggle::Flag(true) => RedirectPolicy::Always,
        Toggle::Flag(false) => RedirectPolicy::Never,
        Toggle::Mode(mode) => mode,
    })
}

fn serialize_redirect_ok<S: Serializer>(value: &RedirectPolicy, s: S) -> Result<S::Ok, S::Error> {
    match value {
        RedirectPolicy::Always => s.serialize_bool(true),
        RedirectPolicy::Never => s.serialize_bool(false),
        RedirectPolicy::Permanent => s.serialize_str("permanent"),
    }
}

fn deserialize_meta_refresh<'de, D: Deserializer<'de>>(d: D) -> Result<MetaRefreshMode, D::Error> {
    Ok(match Toggle::<MetaRefreshMode>::deserialize(d)? {
        Toggle::Flag(true) => MetaRefreshMode::Head,
        Toggle::Flag(false) => MetaRefreshMode::Never,
        Toggle::Mode(mode) => mode,
    })
}

fn serialize_meta_refresh<S: Serializer>(value: &MetaRefreshMode, s: S) -> Result<S::Ok, S::Error> {
    match value {
        MetaRefreshMode::Head => s.serialize_bool(true),
        MetaRefreshMode::Never => s.serialize_bool(false),
        MetaRefreshMode::Anywhere => s.serialize_str("anywhere"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AgentConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_history, Some(DEFAULT_MAX_HISTORY));
        assert_eq!(config.max_file_buffer, 100_000);
        assert_eq!(config.redirect_ok, RedirectPolicy::Always);
    }

    #[test]
    fn test_toggle_fields_accept_bool_or_mode() {
        let config: AgentConfig = serde_json::from_str(
            r#"{"redirect_ok": "permanent", "follow_meta_refresh": "anywhere"}"#,
        )
        .unwrap();
        assert_eq!(config.redirect_ok, RedirectPolicy::Permanent);
        assert_eq!(config.follow_meta_refresh, MetaRefreshMode::Anywhere);

        let config: AgentConfig =
            serde_json::from_str(r#"{"redirect_ok": false, "follow_meta_refresh": true}"#).unwrap();
        assert_eq!(config.redirect_ok, RedirectPolicy::Never);
        assert_eq!(config.follow_meta_refresh, MetaRefreshMode::Head);
    }

    #[test]
    fn test_serialize_round_trips_toggles() {
        let config = AgentConfig {
            redirect_ok: RedirectPolicy::Permanent,
            follow_meta_refresh: MetaRefreshMode::Head,
            ..AgentConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["redirect_ok"], "permanent");
        assert_eq!(json["follow_meta_refresh"], true);
        let back: AgentConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<AgentConfig>(r#"{"redirect_okay": true}"#).is_err());
    }

    #[test]
    fn test_validate_reports_field() {
        let cases: Vec<(AgentConfig, &str)> = vec![
            (AgentConfig { max_history: Some(0), ..AgentConfig::default() }, "max_history"),
            (AgentConfig { open_timeout: Some(0), ..AgentConfig::default() }, "open_timeout"),
            (AgentConfig { allowed_error_codes: vec![999], ..AgentConfig::default() }, "allowed_error_codes"),
            (
                AgentConfig {
                    tls: TlsConfig { cert: Some("c.pem".into()), ..TlsConfig::default() },
                    ..AgentConfig::default()
                },
                "tls.cert",
            ),
            (
                AgentConfig {
                    tls: TlsConfig { ssl_version: Some("SSLv3".into()), ..TlsConfig::default() },
                    ..AgentConfig::default()
                },
                "tls.ssl_version",
            ),
        ];
        for (config, field) in cases {
            match config.validate() {
                Err(ConfigError::Invalid { field: got, .. }) => assert_eq!(got, field),
                other => panic!("expected invalid {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_user_agent_resolution() {
        let mut config = AgentConfig {
            user_agent_alias: Some("Windows Chrome".into()),
            ..AgentConfig::default()
        };
        assert!(config.resolved_user_agent().unwrap().contains("Chrome"));

        config.user_agent = Some("custom/1.0".into());
        assert_eq!(config.resolved_user_agent().unwrap(), "custom/1.0");

        let unknown = AgentConfig {
            user_agent_alias: Some("Lynx".into()),
            ..AgentConfig::default()
        };
        assert!(matches!(unknown.validate(), Err(ConfigError::UnknownAlias { .. })));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_history": 5, "robots": true}}"#).unwrap();
        let config = AgentConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.max_history, Some(5));
        assert!(config.robots);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, "not json").unwrap();
        assert!(matches!(
            AgentConfig::from_json_file(bad.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_proxy_url() {
        let proxy = ProxyConfig {
            address: "proxy.local".into(),
            port: 3128,
            user: None,
            pass: None,
        };
        assert_eq!(proxy.url(), "http://proxy.local:3128");
    }
}
