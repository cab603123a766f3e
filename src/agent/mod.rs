//! The stateful agent: one fetch at a time, with cookies, authentication,
//! redirects, refreshes and history carried across calls.
//!
//! # Example
//!
//! ```no_run
//! use webagent_core::{Agent, AgentConfig, LinkQuery};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut agent = Agent::new(AgentConfig::default())?;
//! let page = agent.get("https://example.com/").await?;
//! println!("{:?}", page.title());
//! if let Some(link) = page.link_with(&LinkQuery::text("More information...")) {
//!     agent.click(&link.clone()).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod history;
mod hooks;
mod request;
mod robots;
mod sleeper;

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::Method;
use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE,
    HeaderMap, HeaderValue, LOCATION, REFERER, SET_COOKIE, TRANSFER_ENCODING, USER_AGENT,
    WWW_AUTHENTICATE,
};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::auth::{
    AuthChallenge, AuthRealm, AuthScheme, AuthStore, DigestSession, basic_authorization, ntlm,
    parse_challenges, select_challenge,
};
use crate::config::AgentConfig;
use crate::cookies::CookieJar;
use crate::decode::{ResponseBody, decode_body};
use crate::error::AgentError;
use crate::navigation::{
    HopCounter, MetaRefresh, MetaRefreshMode, find_meta_refresh, is_same_document,
    redirect_method, referer_for, resolve_refresh_target,
};
use crate::page::{Button, ElementNotFound, Form, Link, Page, ParserRegistry};
use crate::transport::{
    BodyStream, Transport, TransportRegistry, TransportRequest, TransportResponse,
};

pub use history::{History, HistoryEntry, RequestDescriptor};
pub use hooks::{
    ContentEncodingHook, PostResponseHook, PreRequestHook, RequestSnapshot, ResponseSnapshot,
};
pub use request::FetchRequest;
pub use robots::{RobotsCache, RobotsDecision, origin_for_robots};
pub use sleeper::{Sleeper, TokioSleeper};

use hooks::Hooks;
use request::{apply_params, configured_headers, resolve_uri};

const DEFAULT_ACCEPT: &str = "*/*";
const DEFAULT_ACCEPT_ENCODING: &str = "gzip,deflate,identity";

/// A browser-like HTTP session.
///
/// Owns its cookie jar, credentials, history and parser registry; nothing is
/// shared between agents.
pub struct Agent {
    config: AgentConfig,
    user_agent: String,
    default_headers: HeaderMap,
    transports: TransportRegistry,
    cookie_jar: CookieJar,
    auth_store: AuthStore,
    known_realms: Vec<KnownRealm>,
    parsers: ParserRegistry,
    history: History,
    hooks: Hooks,
    robots: RobotsCache,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("user_agent", &self.user_agent)
            .field("transports", &self.transports)
            .field("cookies", &self.cookie_jar.len())
            .field("history", &self.history.len())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

/// A realm that has accepted credentials, answered without waiting for a 401.
#[derive(Debug)]
struct KnownRealm {
    realm: AuthRealm,
    state: RealmAuth,
}

#[derive(Debug)]
enum RealmAuth {
    Basic,
    Digest(DigestSession),
    /// Scheme token to open the handshake with (`NTLM` or `Negotiate`).
    Ntlm(AuthScheme),
}

/// Authentication progress within one fetch.
#[derive(Debug, Default)]
struct AuthAttempts {
    tried: HashSet<AuthRealm>,
    stale_retried: bool,
    ntlm_negotiated: bool,
    ntlm_authenticated: bool,
    /// Authorization value answering the last challenge.
    pending: Option<String>,
}

/// One request of a redirect/refresh chain.
#[derive(Debug, Clone)]
struct Hop {
    method: Method,
    uri: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    referer: Option<Url>,
}

/// A fully read and decoded response.
struct Exchange {
    status: u16,
    headers: HeaderMap,
    body: ResponseBody,
}

impl Agent {
    /// Creates an agent with the default `http`, `https` and `file` transports.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] when the configuration fails validation
    /// or cannot be applied to the HTTP client.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;
        let user_agent = config.resolved_user_agent()?;
        let default_headers = configured_headers(&config.request_headers)?;
        let transports = TransportRegistry::with_defaults(&config)?;
        Ok(Self {
            history: History::new(config.max_history),
            config,
            user_agent,
            default_headers,
            transports,
            cookie_jar: CookieJar::new(),
            auth_store: AuthStore::new(),
            known_realms: Vec::new(),
            parsers: ParserRegistry::with_defaults(),
            hooks: Hooks::default(),
            robots: RobotsCache::new(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Registers (or replaces) the transport for `scheme`.
    #[must_use]
    pub fn with_transport(mut self, scheme: &str, transport: Arc<dyn Transport>) -> Self {
        self.transports.register(scheme, transport);
        self
    }

    /// Replaces the sleeper used for refresh delays.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The User-Agent sent with every request.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn cookie_jar(&self) -> &CookieJar {
        &self.cookie_jar
    }

    pub fn cookie_jar_mut(&mut self) -> &mut CookieJar {
        &mut self.cookie_jar
    }

    #[must_use]
    pub fn auth_store(&self) -> &AuthStore {
        &self.auth_store
    }

    /// Mutable access forgets realms learned so far; they are re-learned
    /// from the next challenge.
    pub fn auth_store_mut(&mut self) -> &mut AuthStore {
        self.known_realms.clear();
        &mut self.auth_store
    }

    #[must_use]
    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    pub fn parsers_mut(&mut self) -> &mut ParserRegistry {
        &mut self.parsers
    }

    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// The newest page in history.
    #[must_use]
    pub fn current_page(&self) -> Option<&Arc<Page>> {
        self.history.last().map(|entry| &entry.page)
    }

    /// Pops the current page, returning it. The previous page becomes current.
    pub fn back(&mut self) -> Option<Arc<Page>> {
        self.history.pop().map(|entry| entry.page)
    }

    /// Page in history for `uri`, resolved against the current page.
    #[must_use]
    pub fn visited(&self, uri: &str) -> Option<&Arc<Page>> {
        let base = self.current_page().map(|page| page.base_uri());
        let uri = resolve_uri(base.as_ref(), uri).ok()?;
        self.history.visited(&uri)
    }

    pub fn set_pre_request_hook<F>(&mut self, hook: F)
    where
        F: Fn(&RequestSnapshot<'_>) -> Option<HeaderMap> + Send + Sync + 'static,
    {
        self.hooks.pre_request = Some(Arc::new(hook));
    }

    pub fn set_post_response_hook<F>(&mut self, hook: F)
    where
        F: Fn(&ResponseSnapshot<'_>) -> Option<HeaderMap> + Send + Sync + 'static,
    {
        self.hooks.post_response = Some(Arc::new(hook));
    }

    pub fn set_content_encoding_hook<F>(&mut self, hook: F)
    where
        F: Fn(&Url, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.hooks.content_encoding = Some(Arc::new(hook));
    }

    /// GETs `uri`.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn get(&mut self, uri: &str) -> Result<Arc<Page>, AgentError> {
        self.fetch(FetchRequest::get(uri)).await
    }

    /// HEADs `uri`.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn head(&mut self, uri: &str) -> Result<Arc<Page>, AgentError> {
        self.fetch(FetchRequest::head(uri)).await
    }

    /// POSTs `params` form-urlencoded to `uri`.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn post<K, V>(
        &mut self,
        uri: &str,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Arc<Page>, AgentError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.fetch(FetchRequest::post(uri).params(params)).await
    }

    /// Follows `link` from the current page.
    ///
    /// # Errors
    ///
    /// [`AgentError::RobotsDisallowed`] for `nofollow` links in robots mode,
    /// [`AgentError::ElementNotFound`] for links without a target, plus the
    /// errors of [`fetch`](Self::fetch).
    pub async fn click(&mut self, link: &Link) -> Result<Arc<Page>, AgentError> {
        let href = link
            .href
            .as_deref()
            .ok_or_else(|| ElementNotFound::new("link target", format!("text={:?}", link.text)))?;

        let page_nofollow = self
            .current_page()
            .and_then(|page| page.html())
            .is_some_and(|doc| doc.robots.nofollow);
        if self.config.robots && (link.is_nofollow() || page_nofollow) {
            return Err(AgentError::robots_disallowed(href));
        }

        let mut request = FetchRequest::get(href);
        if let Some(page) = self.current_page() {
            request = request.referer(page.uri().clone());
        }
        self.fetch(request).await
    }

    /// Submits `form` (from the current page) with an optional button.
    ///
    /// # Errors
    ///
    /// [`AgentError::InvalidUri`] when the action cannot be resolved, plus the
    /// errors of [`fetch`](Self::fetch).
    pub async fn submit(&mut self, form: &Form, button: Option<&Button>) -> Result<Arc<Page>, AgentError> {
        let action = form.action.clone().unwrap_or_default();
        let base = match self.current_page() {
            Some(page) => page.base_uri(),
            None => Url::parse(&action).map_err(|e| AgentError::invalid_uri(&action, e))?,
        };
        let submission = form
            .build_request(&base, button)
            .map_err(|e| AgentError::invalid_uri(&action, e))?;
        let mut request = FetchRequest::from_submission(submission);
        if let Some(page) = self.current_page() {
            request = request.referer(page.uri().clone());
        }
        self.fetch(request).await
    }

    /// Performs `request`, following redirects, refreshes and auth
    /// challenges, and pushes the terminal page to history.
    ///
    /// # Errors
    ///
    /// Any [`AgentError`]; history is left untouched on failure.
    #[instrument(skip(self, request), fields(method = %request.method, uri = %request.uri))]
    pub async fn fetch(&mut self, request: FetchRequest) -> Result<Arc<Page>, AgentError> {
        let FetchRequest {
            method,
            uri,
            params,
            mut headers,
            body,
            referer,
        } = request;

        let current = self.current_page().map(|page| (page.uri().clone(), page.base_uri()));
        let mut uri = resolve_uri(current.as_ref().map(|(_, base)| base), &uri)?;
        let body = apply_params(&method, &mut uri, &params, &mut headers, body);
        let referer = referer.or_else(|| current.map(|(page_uri, _)| page_uri));

        let descriptor = RequestDescriptor {
            method: method.clone(),
            uri: uri.clone(),
        };
        let page = Arc::new(
            self.run(Hop {
                method,
                uri,
                headers,
                body,
                referer,
            })
            .await?,
        );
        info!(uri = %page.uri(), status = page.status(), "fetched");
        self.history.push(descriptor, Arc::clone(&page));
        Ok(page)
    }

    /// Drives one logical fetch to its terminal page.
    async fn run(&mut self, mut hop: Hop) -> Result<Page, AgentError> {
        let mut hops = HopCounter::new(self.config.redirection_limit);
        let mut auth = AuthAttempts::default();

        loop {
            let exchange = self.exchange(&hop, &mut auth).await?;
            let Exchange {
                status,
                headers,
                body,
            } = exchange;

            if status == 401
                && let Some(authorization) = self.answer_challenge(&hop, &headers, &mut auth)?
            {
                auth.pending = Some(authorization);
                continue;
            }

            if let Some(location) = self.redirect_target(status, &headers) {
                let next = hop
                    .uri
                    .join(&location)
                    .map_err(|e| AgentError::invalid_uri(&location, e))?;
                ensure_web_target(&hop.uri, &next)?;
                if let Err(limit) = hops.advance() {
                    let page = self.build_page(hop.uri, status, headers, body)?;
                    return Err(AgentError::RedirectLimitReached {
                        page: Arc::new(page),
                        hops: limit.hops,
                    });
                }
                debug!(from = %hop.uri, to = %next, status, hop = hops.hops(), "following redirect");
                hop = self.redirected(hop, status, next);
                auth = AuthAttempts::default();
                continue;
            }

            let page = self.build_page(hop.uri.clone(), status, headers, body)?;
            let page = self.check_status(page)?;
            self.apply_meta_cookies(&page);

            let Some((refresh, target)) = self.refresh_target(&page)? else {
                return Ok(page);
            };
            ensure_web_target(&hop.uri, &target)?;
            if let Err(limit) = hops.advance() {
                return Err(AgentError::RedirectLimitReached {
                    page: Arc::new(page),
                    hops: limit.hops,
                });
            }
            debug!(from = %hop.uri, to = %target, delay = ?refresh.delay, "following refresh");
            self.sleeper.sleep(refresh.delay).await;
            hop = Hop {
                method: Method::GET,
                referer: Some(hop.uri.clone()),
                uri: target,
                headers: without_body_headers(hop.headers),
                body: None,
            };
            auth = AuthAttempts::default();
        }
    }

    /// Sends one request and reads, decodes and records its response.
    async fn exchange(&mut self, hop: &Hop, auth: &mut AuthAttempts) -> Result<Exchange, AgentError> {
        let transport = self
            .transports
            .get(hop.uri.scheme())
            .ok_or_else(|| AgentError::unsupported_scheme(&hop.uri))?;

        if self.config.robots
            && self
                .robots
                .check_allowed(&hop.uri, &self.user_agent, transport.as_ref())
                .await
                == RobotsDecision::Disallowed
        {
            return Err(AgentError::robots_disallowed(hop.uri.as_str()));
        }

        let mut headers = self.request_headers(hop, auth);
        if let Some(replaced) = self.hooks.request_headers(&RequestSnapshot {
            method: &hop.method,
            uri: &hop.uri,
            headers: &headers,
            body: hop.body.as_deref(),
        }) {
            headers = replaced;
        }

        debug!(method = %hop.method, uri = %hop.uri, "sending request");
        let response = transport
            .request(TransportRequest {
                method: hop.method.clone(),
                uri: hop.uri.clone(),
                headers,
                body: hop.body.clone(),
            })
            .await?;

        let TransportResponse {
            status,
            mut headers,
            body: stream,
        } = response;
        let raw = read_body(
            &hop.uri,
            &hop.method,
            status,
            &headers,
            stream,
            self.config.max_file_buffer,
        )
        .await?;

        let body = self.decode(&hop.uri, &headers, raw)?;
        if let Some(replaced) = self.hooks.response_headers(&ResponseSnapshot {
            uri: &hop.uri,
            status,
            headers: &headers,
            body: &body,
        }) {
            headers = replaced;
        }

        for value in headers.get_all(SET_COOKIE) {
            let value = String::from_utf8_lossy(value.as_bytes());
            if !self.cookie_jar.add_set_cookie(&hop.uri, &value) {
                debug!(uri = %hop.uri, "Set-Cookie rejected");
            }
        }

        Ok(Exchange {
            status,
            headers,
            body,
        })
    }

    fn decode(&self, uri: &Url, headers: &HeaderMap, raw: ResponseBody) -> Result<ResponseBody, AgentError> {
        let encoding = headers
            .get_all(CONTENT_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");
        if raw.is_empty() || encoding.trim().is_empty() {
            return Ok(raw);
        }
        let encoding = self.hooks.content_encoding(uri, &encoding);
        Ok(decode_body(&encoding, &raw, self.config.max_file_buffer)?)
    }

    /// Headers for `hop`: defaults, configured, per-request, then referer,
    /// cookies and authorization unless already present.
    fn request_headers(&mut self, hop: &Hop, auth: &mut AuthAttempts) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(DEFAULT_ACCEPT_ENCODING));
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers.extend(self.default_headers.clone());
        headers.extend(hop.headers.clone());

        if !headers.contains_key(REFERER)
            && let Some(referer) = referer_for(hop.referer.as_ref(), &hop.uri)
            && let Ok(value) = HeaderValue::from_str(&referer)
        {
            headers.insert(REFERER, value);
        }
        if !headers.contains_key(COOKIE)
            && let Some(cookies) = self.cookie_jar.cookie_header(&hop.uri)
            && let Ok(value) = HeaderValue::from_str(&cookies)
        {
            headers.insert(COOKIE, value);
        }
        if !headers.contains_key(AUTHORIZATION) {
            let authorization = match auth.pending.take() {
                Some(pending) => Some(pending),
                None => self.proactive_authorization(hop, auth),
            };
            if let Some(value) = authorization.and_then(|a| HeaderValue::from_str(&a).ok()) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    /// Authorization for a realm that already accepted credentials.
    fn proactive_authorization(&mut self, hop: &Hop, auth: &mut AuthAttempts) -> Option<String> {
        let known = self
            .known_realms
            .iter_mut()
            .rev()
            .find(|known| known.realm.covers(&hop.uri))?;
        let credential = self
            .auth_store
            .credentials_for(&hop.uri, known.realm.name.as_deref())?;
        debug!(realm = ?known.realm.name, scheme = %known.realm.scheme, "authenticating proactively");
        match &mut known.state {
            RealmAuth::Basic => {
                auth.tried.insert(known.realm.clone());
                Some(basic_authorization(credential))
            }
            RealmAuth::Digest(session) => Some(session.authorization(
                credential,
                hop.method.as_str(),
                &request_target(&hop.uri),
            )),
            RealmAuth::Ntlm(scheme) => {
                auth.ntlm_negotiated = true;
                Some(format!("{scheme} {}", ntlm::negotiate_message()))
            }
        }
    }

    /// Answers a 401 if a satisfiable challenge remains untried.
    fn answer_challenge(
        &mut self,
        hop: &Hop,
        headers: &HeaderMap,
        auth: &mut AuthAttempts,
    ) -> Result<Option<String>, AgentError> {
        let challenges = challenges_in(headers);
        let Some((challenge, credential)) = select_challenge(&self.auth_store, &hop.uri, &challenges)
        else {
            debug!(uri = %hop.uri, offered = challenges.len(), "no credentials for challenge");
            return Ok(None);
        };
        let credential = credential.clone();
        let challenge: AuthChallenge = challenge.clone();
        let realm = challenge.realm(&hop.uri);

        let authorization = match challenge.scheme {
            AuthScheme::Basic => {
                if !auth.tried.insert(realm.clone()) {
                    return Ok(None);
                }
                self.remember_realm(realm, RealmAuth::Basic);
                basic_authorization(&credential)
            }
            AuthScheme::Digest => {
                let stale = challenge
                    .param("stale")
                    .is_some_and(|s| s.eq_ignore_ascii_case("true"));
                if auth.tried.contains(&realm) {
                    if !stale || auth.stale_retried {
                        return Ok(None);
                    }
                    auth.stale_retried = true;
                }
                auth.tried.insert(realm.clone());
                let mut session = DigestSession::new(challenge)?;
                let header = session.authorization(
                    &credential,
                    hop.method.as_str(),
                    &request_target(&hop.uri),
                );
                self.remember_realm(realm, RealmAuth::Digest(session));
                header
            }
            AuthScheme::Ntlm | AuthScheme::Negotiate => {
                let scheme = challenge.scheme;
                match &challenge.token {
                    None => {
                        if auth.ntlm_negotiated {
                            return Ok(None);
                        }
                        auth.ntlm_negotiated = true;
                        format!("{scheme} {}", ntlm::negotiate_message())
                    }
                    Some(token) => {
                        if auth.ntlm_authenticated {
                            return Ok(None);
                        }
                        auth.ntlm_authenticated = true;
                        let message = ntlm::parse_challenge_message(token)?;
                        let answer = ntlm::authenticate_message(&credential, &message)?;
                        self.remember_realm(realm, RealmAuth::Ntlm(scheme));
                        format!("{scheme} {answer}")
                    }
                }
            }
            AuthScheme::Other => return Ok(None),
        };
        debug!(uri = %hop.uri, scheme = %challenge_scheme(&authorization), "answering challenge");
        Ok(Some(authorization))
    }

    fn remember_realm(&mut self, realm: AuthRealm, state: RealmAuth) {
        self.known_realms.retain(|known| known.realm != realm);
        self.known_realms.push(KnownRealm { realm, state });
    }

    /// `Location` of a followed redirect.
    fn redirect_target(&self, status: u16, headers: &HeaderMap) -> Option<String> {
        if !self.config.redirect_ok.follows(status) {
            return None;
        }
        let location = headers.get(LOCATION)?;
        let location = String::from_utf8_lossy(location.as_bytes()).trim().to_string();
        (!location.is_empty()).then_some(location)
    }

    fn redirected(&self, hop: Hop, status: u16, next: Url) -> Hop {
        let (method, keep_body) =
            redirect_method(status, &hop.method, self.config.redirect_preserve_method);
        let mut headers = if keep_body {
            hop.headers
        } else {
            without_body_headers(hop.headers)
        };
        if next.origin() != hop.uri.origin() {
            headers.remove(AUTHORIZATION);
            headers.remove(COOKIE);
        }
        Hop {
            method,
            referer: Some(hop.uri),
            uri: next,
            headers,
            body: if keep_body { hop.body } else { None },
        }
    }

    fn build_page(
        &self,
        uri: Url,
        status: u16,
        headers: HeaderMap,
        body: ResponseBody,
    ) -> Result<Page, AgentError> {
        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let content = self
            .parsers
            .parser_for(content_type)
            .parse(&body, &headers, &uri)
            .map_err(|e| AgentError::io(uri.as_str(), e))?;
        Ok(Page::new(uri, status, headers, body, content))
    }

    /// Terminal pages: 2xx, unfollowed 3xx and allowed error codes.
    fn check_status(&self, page: Page) -> Result<Page, AgentError> {
        let status = page.status();
        if (200..400).contains(&status) || self.config.allowed_error_codes.contains(&status) {
            return Ok(page);
        }
        if matches!(status, 401 | 403) {
            let realms = if status == 401 {
                realm_names(&challenges_in(page.headers()))
            } else {
                Vec::new()
            };
            warn!(uri = %page.uri(), status, ?realms, "unauthorized");
            return Err(AgentError::unauthorized(page.uri().as_str(), status, realms));
        }
        Err(AgentError::ResponseCode {
            status,
            page: Arc::new(page),
        })
    }

    /// Cookies set through `<meta http-equiv="Set-Cookie">`.
    fn apply_meta_cookies(&mut self, page: &Page) {
        let Some(doc) = page.html() else {
            return;
        };
        for meta in doc.http_equiv("set-cookie") {
            if let Some(content) = meta.content.as_deref()
                && !self.cookie_jar.add_set_cookie(page.uri(), content)
            {
                debug!(uri = %page.uri(), "meta Set-Cookie rejected");
            }
        }
    }

    /// Refresh to follow for `page`, from the `Refresh` header or a meta tag.
    fn refresh_target(&self, page: &Page) -> Result<Option<(MetaRefresh, Url)>, AgentError> {
        let mode = self.config.follow_meta_refresh;
        if mode == MetaRefreshMode::Never || !(200..300).contains(&page.status()) {
            return Ok(None);
        }
        let refresh = page
            .headers()
            .get("refresh")
            .and_then(|v| v.to_str().ok())
            .and_then(MetaRefresh::parse)
            .or_else(|| page.html().and_then(|doc| find_meta_refresh(doc, mode)));
        let Some(refresh) = refresh else {
            return Ok(None);
        };

        let target = resolve_refresh_target(&page.base_uri(), refresh.url.as_deref())
            .map_err(|e| AgentError::invalid_uri(refresh.url.clone().unwrap_or_default(), e))?;
        if is_same_document(page.uri(), &target) && !self.config.follow_meta_refresh_self {
            debug!(uri = %target, "ignoring refresh to the same page");
            return Ok(None);
        }
        Ok(Some((refresh, target)))
    }
}

/// Reads the whole body, enforcing `Content-Length` and keeping partial
/// bytes on failure.
async fn read_body(
    uri: &Url,
    method: &Method,
    status: u16,
    headers: &HeaderMap,
    mut stream: BodyStream,
    threshold: usize,
) -> Result<ResponseBody, AgentError> {
    let bodiless = *method == Method::HEAD || matches!(status, 204 | 304);
    let chunked = headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"));
    let expected = if bodiless || chunked {
        None
    } else {
        headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    let mut body = ResponseBody::new(threshold);
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => body
                .write_chunk(&chunk)
                .map_err(|e| AgentError::io(uri.as_str(), e))?,
            Err(source) => {
                let partial = body.to_vec().unwrap_or_default();
                warn!(uri = %uri, received = partial.len(), error = %source, "response body interrupted");
                return Err(match expected {
                    Some(expected) => AgentError::ResponseRead {
                        uri: uri.to_string(),
                        expected: Some(expected),
                        received: body.len(),
                        partial,
                        source: Some(source),
                    },
                    None => AgentError::ChunkedTermination {
                        uri: uri.to_string(),
                        partial,
                        source,
                    },
                });
            }
        }
    }

    if let Some(expected) = expected
        && body.len() != expected
    {
        return Err(AgentError::ResponseRead {
            uri: uri.to_string(),
            expected: Some(expected),
            received: body.len(),
            partial: body.to_vec().unwrap_or_default(),
            source: None,
        });
    }
    Ok(body)
}

fn challenges_in(headers: &HeaderMap) -> Vec<AuthChallenge> {
    parse_challenges(
        headers
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok()),
    )
}

fn realm_names(challenges: &[AuthChallenge]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in challenges.iter().filter_map(AuthChallenge::realm_name) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Path and query, as Digest's `uri` parameter expects.
fn request_target(uri: &Url) -> String {
    match uri.query() {
        Some(query) => format!("{}?{query}", uri.path()),
        None => uri.path().to_string(),
    }
}

fn challenge_scheme(authorization: &str) -> &str {
    authorization.split(' ').next().unwrap_or_default()
}

fn is_web(uri: &Url) -> bool {
    matches!(uri.scheme(), "http" | "https")
}

/// Pages fetched over http(s) may only send the agent on to other http(s) URIs.
fn ensure_web_target(from: &Url, to: &Url) -> Result<(), AgentError> {
    if is_web(from) && !is_web(to) {
        return Err(AgentError::unsupported_scheme(to));
    }
    Ok(())
}

fn without_body_headers(mut headers: HeaderMap) -> HeaderMap {
    headers.remove(CONTENT_TYPE);
    headers.remove(CONTENT_LENGTH);
    headers
}
