//! `http`/`https` transport backed by reqwest.

use std::fs;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::redirect::Policy;
use reqwest::{Certificate, Client, ClientBuilder, Identity, Proxy};
use tracing::{debug, instrument};

use super::{Transport, TransportError, TransportRequest, TransportResponse};
use crate::config::{AgentConfig, ConfigError, TlsConfig, VerifyMode, parse_tls_version};

/// reqwest client with redirects disabled and no cookie store or
/// decompression; the agent owns those.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Builds the client from timeouts, proxy and TLS settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the setting that could not be
    /// applied (unreadable certificate, bad proxy URL, ...).
    pub fn from_config(config: &AgentConfig) -> Result<Self, ConfigError> {
        let mut builder = Client::builder().redirect(Policy::none());
        if let Some(secs) = config.open_timeout {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = config.read_timeout {
            builder = builder.read_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = config.idle_timeout {
            builder = builder.pool_idle_timeout(Duration::from_secs(secs));
        }

        if let Some(proxy_config) = &config.proxy {
            let mut proxy = Proxy::all(proxy_config.url())
                .map_err(|e| ConfigError::invalid("proxy.address", e.to_string()))?;
            if let Some(user) = &proxy_config.user {
                proxy = proxy.basic_auth(user, proxy_config.pass.as_deref().unwrap_or_default());
            }
            builder = builder.proxy(proxy);
        }

        builder = apply_tls(builder, &config.tls)?;
        let client = builder
            .build()
            .map_err(|e| ConfigError::invalid("tls", e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing client. It must not follow redirects.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn apply_tls(mut builder: ClientBuilder, tls: &TlsConfig) -> Result<ClientBuilder, ConfigError> {
    if tls.verify_mode == VerifyMode::None {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(ca_file) = &tls.ca_file {
        for cert in read_pem_bundle("tls.ca_file", ca_file)? {
            builder = builder.add_root_certificate(cert);
        }
    }
    if let Some(dir) = &tls.cert_store {
        let entries = fs::read_dir(dir)
            .map_err(|e| ConfigError::invalid("tls.cert_store", format!("{}: {e}", dir.display())))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_pem = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext, "pem" | "crt"));
            if is_pem {
                for cert in read_pem_bundle("tls.cert_store", &path)? {
                    builder = builder.add_root_certificate(cert);
                }
            }
        }
    }
    if let (Some(cert), Some(key)) = (&tls.cert, &tls.key) {
        let mut pem = read_file("tls.key", key)?;
        pem.extend(read_file("tls.cert", cert)?);
        let identity = Identity::from_pem(&pem)
            .map_err(|e| ConfigError::invalid("tls.cert", e.to_string()))?;
        builder = builder.identity(identity);
    }
    if let Some(version) = tls.ssl_version.as_deref().and_then(parse_tls_version) {
        builder = builder.min_tls_version(version);
    }
    Ok(builder)
}

fn read_file(field: &'static str, path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|e| ConfigError::invalid(field, format!("{}: {e}", path.display())))
}

fn read_pem_bundle(field: &'static str, path: &Path) -> Result<Vec<Certificate>, ConfigError> {
    let pem = read_file(field, path)?;
    Certificate::from_pem_bundle(&pem)
        .map_err(|e| ConfigError::invalid(field, format!("{}: {e}", path.display())))
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(level = "debug", skip(self, request), fields(method = %request.method, uri = %request.uri))]
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let TransportRequest {
            method,
            uri,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(method, uri.clone()).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&uri, e))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        debug!(status, "response headers received");

        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| TransportError::from_reqwest(&uri, e))
            });
        Ok(TransportResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use futures_util::TryStreamExt;
    use reqwest::Method;
    use reqwest::header::HeaderMap;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_redirects_are_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/end"))
            .mount(&server)
            .await;

        let transport = HttpTransport::from_config(&AgentConfig::default()).unwrap();
        let response = transport
            .request(TransportRequest {
                method: Method::GET,
                uri: Url::parse(&format!("{}/start", server.uri())).unwrap(),
                headers: HeaderMap::new(),
                body: None,
            })
            .await
            .unwrap();
        assert_eq!(response.status, 302);
        assert_eq!(response.headers.get("location").unwrap(), "/end");
    }

    #[tokio::test]
    async fn test_body_is_streamed_undecoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Encoding", "gzip")
                    .set_body_bytes(b"not really gzip".to_vec()),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::from_config(&AgentConfig::default()).unwrap();
        let response = transport
            .request(TransportRequest {
                method: Method::GET,
                uri: Url::parse(&server.uri()).unwrap(),
                headers: HeaderMap::new(),
                body: None,
            })
            .await
            .unwrap();
        let chunks: Vec<Vec<u8>> = response.body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"not really gzip");
    }

    #[test]
    fn test_missing_ca_file_names_setting() {
        let config = AgentConfig {
            tls: TlsConfig {
                ca_file: Some("/nonexistent/ca.pem".into()),
                ..TlsConfig::default()
            },
            ..AgentConfig::default()
        };
        match HttpTransport::from_config(&config) {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "tls.ca_file"),
            other => panic!("expected invalid tls.ca_file, got {other:?}"),
        }
    }

    #[test]
    fn test_proxy_with_credentials_builds() {
        let config = AgentConfig {
            proxy: Some(ProxyConfig {
                address: "127.0.0.1".into(),
                port: 3128,
                user: Some("u".into()),
                pass: Some("p".into()),
            }),
            ..AgentConfig::default()
        };
        assert!(HttpTransport::from_config(&config).is_ok());
    }
}
