//! The connect client
//!
//! [`ConnectClient`] orchestrates the OAuth flows: it builds authorization
//! URLs, persists transaction state, deduplicates callback processing so
//! each authorization code is exchanged at most once, manages per-grant
//! sessions, and broadcasts lifecycle events.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, error, info};
use url::Url;

use crate::error::ConnectError;
use crate::events::{
    ConnectEvent, ConnectListener, EventSubscription, ListenerRegistry, PopupCloseReason,
    ProfileSource, SignOutReason,
};
use crate::id_token::decode_identity_claims;
use crate::pkce::{generate_state, ChallengePair};
use crate::popup::{PopupGeometry, PopupMessage};
use crate::redirect::{
    build_auth_url, is_callback_url, normalize_api_url, parse_callback, strip_callback_params,
    AuthUrlParams,
};
use crate::session::{auth_state_key, SessionLookup, SessionStore};
use crate::storage::{MemoryTokenStorage, TokenStorage};
use crate::traits::{CodeExchange, CodeExchangeRequest, IdentityProviderToken, UrlHistory};
use crate::types::{
    resolve_scopes, AuthUrl, CallbackOutcome, ConnectConfig, ConnectMethod, ConnectOptions,
    ConnectOutcome, ConnectionStatus, DefaultScopes, Environment, Provider, SessionData,
    TokenResponse, TransactionState,
};

/// Version header sent on every API request.
const CONNECT_VERSION_HEADER: &str = "x-nylas-connect";

/// API base used when the configuration does not name one.
const DEFAULT_API_URL: &str = "https://api.us.nylas.com";

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a popup flow may run before it is abandoned.
const POPUP_TIMEOUT: Duration = Duration::from_secs(300);

/// Minimum spacing between dedup-state cleanup sweeps.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Processed-code set size that triggers a wholesale clear. Codes are
/// single-use, so dropping old entries only re-opens a window the server
/// already closed.
const PROCESSED_CODES_MAX: usize = 100;

/// Lifetime assumed for custom-exchange results that do not state one.
const DEFAULT_SESSION_TTL_MS: i64 = 3_600_000;

type SharedExchange = Shared<BoxFuture<'static, Result<SessionData, ConnectError>>>;

/// A caller's relationship to an authorization code after the dedup check:
/// joining an exchange another caller registered, or owning the one it just
/// registered.
enum CodeClaim {
    Joined(String, SharedExchange),
    Owned(String, SharedExchange),
}

/// Authorization codes move `unseen -> processing -> processed`, one way.
/// A failed exchange removes the code from `processing` without marking it
/// processed, so the caller may retry.
struct DedupState {
    processing: HashMap<String, SharedExchange>,
    processed: HashSet<String>,
    last_cleanup: Instant,
}

struct ResolvedConfig {
    client_id: String,
    redirect_uri: String,
    api_url: String,
    environment: Environment,
    default_scopes: Option<DefaultScopes>,
    debug: bool,
    persist_tokens: bool,
    code_exchange: Option<Arc<dyn CodeExchange>>,
    identity_provider_token: Option<Arc<dyn IdentityProviderToken>>,
    popup_driver: Option<Arc<dyn crate::popup::PopupDriver>>,
    opener_relay: Option<Arc<dyn crate::popup::OpenerRelay>>,
    url_history: Option<Arc<dyn UrlHistory>>,
}

struct ClientInner {
    config: ResolvedConfig,
    http: reqwest::Client,
    sessions: SessionStore,
    // Transaction state always lives in the durable backend, even when
    // session persistence is off: a redirect flow has to survive whatever
    // the host does between navigation and callback.
    transactions: Arc<dyn TokenStorage>,
    listeners: ListenerRegistry,
    dedup: Mutex<DedupState>,
}

/// OAuth 2.0 + PKCE connect client.
///
/// Cheap to clone; clones share sessions, listeners, and callback
/// deduplication state.
#[derive(Clone)]
pub struct ConnectClient {
    inner: Arc<ClientInner>,
}

impl ConnectClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    /// Returns a config error when `client_id` is empty or `redirect_uri`
    /// is missing or not an absolute URL.
    pub fn new(config: ConnectConfig) -> Result<Self, ConnectError> {
        if config.client_id.is_empty() {
            return Err(ConnectError::config("clientId is required"));
        }
        if config.redirect_uri.is_empty() {
            return Err(ConnectError::config("redirectUri is required"));
        }
        if Url::parse(&config.redirect_uri).is_err() {
            return Err(ConnectError::config("redirectUri must be a valid URL"));
        }

        let environment = detect_environment(config.environment, &config.redirect_uri);
        let api_url =
            normalize_api_url(config.api_url.as_deref().unwrap_or(DEFAULT_API_URL));
        let persist_tokens = config.persist_tokens.unwrap_or(true);

        let durable: Arc<dyn TokenStorage> = match &config.storage {
            Some(storage) => Arc::clone(storage),
            None => MemoryTokenStorage::shared(),
        };
        let session_backend: Arc<dyn TokenStorage> = if persist_tokens {
            Arc::clone(&durable)
        } else {
            MemoryTokenStorage::shared()
        };

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| ConnectError::config(format!("failed to build HTTP client: {err}")))?;

        let resolved = ResolvedConfig {
            client_id: config.client_id,
            redirect_uri: config.redirect_uri,
            api_url,
            environment,
            default_scopes: config.default_scopes,
            debug: config.debug.unwrap_or(environment == Environment::Development),
            persist_tokens,
            code_exchange: config.code_exchange,
            identity_provider_token: config.identity_provider_token,
            popup_driver: config.popup_driver,
            opener_relay: config.opener_relay,
            url_history: config.url_history,
        };

        info!(
            client_id = %redact(&resolved.client_id),
            api_url = %resolved.api_url,
            environment = ?resolved.environment,
            persist_tokens = resolved.persist_tokens,
            debug = resolved.debug,
            "connect client initialized"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                sessions: SessionStore::new(session_backend),
                transactions: durable,
                listeners: ListenerRegistry::new(),
                dedup: Mutex::new(DedupState {
                    processing: HashMap::new(),
                    processed: HashSet::new(),
                    last_cleanup: Instant::now(),
                }),
                config: resolved,
            }),
        })
    }

    /// Subscribe to lifecycle events. The returned subscription removes
    /// the listener when unsubscribed.
    pub fn on_connect_state_change<F>(&self, listener: F) -> EventSubscription
    where
        F: Fn(&ConnectEvent, Option<&SessionData>) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(Arc::new(listener) as ConnectListener)
    }

    /// Start an authorization flow.
    ///
    /// A valid existing default session short-circuits the flow. Otherwise
    /// transaction state is persisted and either the authorization URL is
    /// returned (inline) or the configured popup driver runs the flow to
    /// completion (popup).
    ///
    /// # Errors
    /// Fails on storage errors, popup failures, or (popup flow) any of the
    /// exchange errors. Inline flows defer exchange errors to the callback.
    pub async fn connect(&self, options: ConnectOptions) -> Result<ConnectOutcome, ConnectError> {
        let config = &self.inner.config;
        let scopes = resolve_scopes(
            options.scopes.as_deref(),
            options.provider,
            config.default_scopes.as_ref(),
        );

        self.emit(
            ConnectEvent::ConnectStarted {
                method: options.method,
                provider: options.provider.map(|p| p.to_string()),
                scopes: scopes.clone(),
            },
            None,
        );

        if let Some(existing) = self.get_session(None).await {
            self.emit(
                ConnectEvent::SessionRestored { session: existing.clone(), from_storage: true },
                Some(&existing),
            );
            return Ok(ConnectOutcome::Session(existing));
        }

        // A custom exchange owns the server side of the handshake, so the
        // flow carries no PKCE parameters.
        let (code_verifier, code_challenge) = if config.code_exchange.is_some() {
            (String::new(), None)
        } else {
            let pair = ChallengePair::generate();
            (pair.code_verifier, Some(pair.code_challenge))
        };
        let state = options.state.clone().unwrap_or_else(generate_state);

        info!(method = options.method.as_str(), provider = ?options.provider, "starting authentication");

        let transaction = TransactionState {
            code_verifier: code_verifier.clone(),
            state: state.clone(),
            scopes: scopes.clone(),
            timestamp: Utc::now().timestamp_millis(),
        };
        self.store_transaction(&transaction).await?;

        let auth_url = build_auth_url(&AuthUrlParams {
            api_url: config.api_url.clone(),
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scopes: scopes.clone(),
            state: state.clone(),
            provider: options.provider.map(|p| p.to_string()),
            login_hint: options.login_hint.clone(),
            code_challenge,
        })?;

        match options.method {
            ConnectMethod::Inline => {
                self.emit(
                    ConnectEvent::ConnectRedirect {
                        url: auth_url.clone(),
                        provider: options.provider.map(|p| p.to_string()),
                    },
                    None,
                );
                Ok(ConnectOutcome::Redirect(auth_url))
            }
            ConnectMethod::Popup => {
                let session = self
                    .popup_authenticate(&auth_url, &state, &code_verifier, &options, &scopes)
                    .await?;
                Ok(ConnectOutcome::Session(session))
            }
        }
    }

    /// Build an authorization URL for a backend (confidential) exchange.
    ///
    /// No PKCE parameters are included and nothing is persisted; the
    /// caller's backend redeems the code with its API key and is
    /// responsible for checking the returned state.
    ///
    /// # Errors
    /// Fails when the URL cannot be built.
    pub async fn get_auth_url(&self, options: ConnectOptions) -> Result<AuthUrl, ConnectError> {
        let config = &self.inner.config;
        let scopes = resolve_scopes(
            options.scopes.as_deref(),
            options.provider,
            config.default_scopes.as_ref(),
        );
        let state = options.state.unwrap_or_else(generate_state);

        let url = build_auth_url(&AuthUrlParams {
            api_url: config.api_url.clone(),
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scopes: scopes.clone(),
            state: state.clone(),
            provider: options.provider.map(|p| p.to_string()),
            login_hint: options.login_hint,
            code_challenge: None,
        })?;

        Ok(AuthUrl { url, state, scopes })
    }

    /// Process an OAuth redirect callback URL.
    ///
    /// Validates the echoed state against the stored transaction (15-minute
    /// TTL), exchanges the code, persists the session, strips the OAuth
    /// parameters from the URL through the configured history hook, and
    /// deletes the transaction state.
    ///
    /// Prefer [`callback`](Self::callback), which adds authorization-code
    /// deduplication on top of this.
    ///
    /// # Errors
    /// Fails on OAuth errors in the URL, missing code or state, missing,
    /// stale, or mismatched transaction state, and exchange failures.
    pub async fn handle_redirect_callback(&self, url: &str) -> Result<SessionData, ConnectError> {
        info!("handling redirect callback");
        let params = parse_callback(url)?;

        self.emit(
            ConnectEvent::ConnectCallbackReceived {
                code: params.code.clone(),
                state: params.state.clone(),
                error: params.error.clone(),
            },
            None,
        );

        if let Some(oauth_error) = &params.error {
            let err = ConnectError::oauth(oauth_error, params.error_description.clone());
            self.emit(
                ConnectEvent::ConnectError {
                    error: err.clone(),
                    step: "callback_processing".to_string(),
                },
                None,
            );
            return Err(err);
        }

        let code = params.code.ok_or_else(|| {
            ConnectError::oauth_with_message(
                "invalid_request",
                "No authorization code found in callback",
            )
        })?;
        let state = params.state.ok_or_else(|| {
            ConnectError::oauth_with_message(
                "invalid_request",
                "No state parameter found in callback",
            )
        })?;

        let transaction = self.load_transaction().await?;
        let key = auth_state_key(&self.inner.config.client_id);

        if transaction.is_expired(Utc::now().timestamp_millis()) {
            let _ = self.inner.transactions.remove(&key).await;
            return Err(ConnectError::oauth_with_message("invalid_request", "Auth state expired"));
        }

        if state != transaction.state {
            return Err(ConnectError::oauth_with_message(
                "invalid_request",
                "State parameter mismatch",
            ));
        }

        // Exchange before touching the URL so a failure leaves the callback
        // replayable.
        let session = self
            .exchange_code(&code, &transaction.code_verifier, &state, None, &transaction.scopes)
            .await?;

        self.emit_success_events(&session);

        if let Some(cleaned) = strip_callback_params(url) {
            if let Some(history) = &self.inner.config.url_history {
                debug!("stripping OAuth parameters from callback URL");
                history.replace(&cleaned);
            }
        }
        let _ = self.inner.transactions.remove(&key).await;

        Ok(session)
    }

    /// Deduplication-safe callback entry point.
    ///
    /// Non-callback URLs are ignored silently. A code already processed is
    /// rejected; a code currently in flight joins the existing exchange and
    /// observes its result. When an opener relay is configured the
    /// parameters are handed to the opener instead of processed here.
    ///
    /// # Errors
    /// Fails with the OAuth error carried in the URL, a reuse rejection,
    /// or whatever [`handle_redirect_callback`](Self::handle_redirect_callback)
    /// fails with.
    pub async fn callback(&self, url: &str) -> Result<CallbackOutcome, ConnectError> {
        self.cleanup_callback_state();

        if !is_callback_url(url) {
            return Ok(CallbackOutcome::Ignored);
        }
        let params = parse_callback(url)?;

        if let Some(oauth_error) = &params.error {
            if self.inner.config.opener_relay.is_none() {
                return Err(ConnectError::oauth(oauth_error, params.error_description.clone()));
            }
        }

        // Membership check and registration happen under one lock
        // acquisition: two parallel callers for the same code must never
        // both register an exchange.
        let claim = if let Some(code) = &params.code {
            let mut dedup = self.inner.dedup.lock();
            if dedup.processed.contains(code) {
                return Err(ConnectError::OAuth {
                    oauth_code: crate::error::OAuthErrorCode::InvalidRequest,
                    message: "Authorization code has already been processed".to_string(),
                    description: None,
                    fix: "Each authorization code can only be used once".to_string(),
                });
            }
            match dedup.processing.entry(code.clone()) {
                Entry::Occupied(entry) => Some(CodeClaim::Joined(code.clone(), entry.get().clone())),
                Entry::Vacant(slot) => {
                    if self.inner.config.opener_relay.is_some() {
                        // The opener processes relayed parameters; nothing
                        // to register here.
                        None
                    } else {
                        let client = self.clone();
                        let target = url.to_string();
                        let future = async move { client.handle_redirect_callback(&target).await }
                            .boxed()
                            .shared();
                        slot.insert(future.clone());
                        Some(CodeClaim::Owned(code.clone(), future))
                    }
                }
            }
        } else {
            None
        };

        match claim {
            Some(CodeClaim::Joined(code, in_flight)) => {
                debug!(code = %redact(&code), "joining in-flight callback processing");
                return in_flight.await.map(CallbackOutcome::Session);
            }
            Some(CodeClaim::Owned(code, exchange)) => {
                let result = exchange.await;
                {
                    let mut dedup = self.inner.dedup.lock();
                    dedup.processing.remove(&code);
                    if result.is_ok() {
                        dedup.processed.insert(code.clone());
                    }
                }
                match &result {
                    Ok(session) => {
                        debug!(code = %redact(&code), grant_id = %session.grant_id, "authorization code processed")
                    }
                    Err(err) => {
                        debug!(code = %redact(&code), error = %err, "authorization code processing failed")
                    }
                }
                return result.map(CallbackOutcome::Session);
            }
            None => {}
        }

        if let Some(relay) = &self.inner.config.opener_relay {
            let origin = redirect_origin(&self.inner.config.redirect_uri);
            let message = match (&params.code, &params.state) {
                (Some(code), Some(state)) => {
                    PopupMessage::Success { code: code.clone(), state: state.clone() }
                }
                _ => PopupMessage::Error {
                    error: params.error.unwrap_or_else(|| "invalid_request".to_string()),
                    error_description: Some(
                        params
                            .error_description
                            .unwrap_or_else(|| "Missing code or state parameter".to_string()),
                    ),
                },
            };
            debug!("relaying callback parameters to opener");
            relay.post(&message, &origin);
            relay.close_window();
            return Ok(CallbackOutcome::Relayed);
        }

        // Only a code-less, error-less URL reaches here; the underlying
        // handler surfaces the precise missing-parameter error.
        self.handle_redirect_callback(url).await.map(CallbackOutcome::Session)
    }

    /// Read a grant's session (`None` for the default grant).
    ///
    /// Expired or unreadable records are deleted and reported through
    /// events; both read as `None`.
    pub async fn get_session(&self, grant_id: Option<&str>) -> Option<SessionData> {
        match self.inner.sessions.load(grant_id).await {
            SessionLookup::Active(session) => Some(session),
            SessionLookup::Missing => None,
            SessionLookup::Expired(session) => {
                self.emit(
                    ConnectEvent::SessionExpired {
                        grant_id: session.grant_id.clone(),
                        expires_at: session.expires_at,
                    },
                    None,
                );
                None
            }
            SessionLookup::Corrupt { key, message } => {
                self.emit(
                    ConnectEvent::SessionInvalid {
                        grant_id: grant_id.unwrap_or("unknown").to_string(),
                        reason: "Invalid stored session data".to_string(),
                    },
                    None,
                );
                self.emit(
                    ConnectEvent::StorageError {
                        operation: "get_session".to_string(),
                        key,
                        message,
                    },
                    None,
                );
                None
            }
        }
    }

    /// Connection status of a grant: `NotConnected` without a usable
    /// session, otherwise `Connected`/`Invalid` per token introspection.
    pub async fn get_connection_status(&self, grant_id: Option<&str>) -> ConnectionStatus {
        let Some(session) = self.get_session(grant_id).await else {
            return ConnectionStatus::NotConnected;
        };
        if self.validate_token(Some(&session.access_token)).await {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Invalid
        }
    }

    /// Introspect a token (or the default session's token) against the
    /// server. Advisory: every failure path returns `false` after emitting
    /// the matching event, never an error.
    pub async fn validate_token(&self, token: Option<&str>) -> bool {
        let (access_token, mut grant_id) = match token {
            Some(token) => (token.to_string(), "unknown".to_string()),
            None => match self.get_session(None).await {
                Some(session) => (session.access_token, session.grant_id),
                None => return false,
            },
        };

        let url = format!("{}/connect/tokeninfo", self.inner.config.api_url);
        let body = format!("access_token={}", urlencoding::encode(&access_token));
        let response = self
            .inner
            .http
            .post(&url)
            .header("content-type", "application/x-www-form-urlencoded")
            .header(CONNECT_VERSION_HEADER, env!("CARGO_PKG_VERSION"))
            .body(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "token validation request failed");
                self.emit(
                    ConnectEvent::NetworkError {
                        operation: "token_validation".to_string(),
                        error: ConnectError::network(format!("Token validation failed: {err}")),
                    },
                    None,
                );
                return false;
            }
        };

        let status = response.status();
        let payload: Option<serde_json::Value> = response.json().await.ok();
        if let Some(reported) = payload
            .as_ref()
            .and_then(|v| v.get("grant_id"))
            .and_then(|v| v.as_str())
        {
            grant_id = reported.to_string();
        }
        let is_valid = status.is_success()
            && payload
                .as_ref()
                .and_then(|v| v.get("data"))
                .is_some_and(|data| !data.is_null());

        if !is_valid {
            self.emit(
                ConnectEvent::TokenValidationError {
                    grant_id,
                    error: ConnectError::token("Token validation failed"),
                },
                None,
            );
        }
        is_valid
    }

    /// Sign out one grant, or every grant when `grant_id` is `None`.
    ///
    /// # Errors
    /// Fails when the storage backend rejects the removal.
    pub async fn logout(&self, grant_id: Option<&str>) -> Result<(), ConnectError> {
        if let Some(id) = grant_id {
            self.inner
                .sessions
                .remove(Some(id))
                .await
                .map_err(|err| ConnectError::storage(err.to_string()))?;
        } else {
            self.inner
                .sessions
                .clear()
                .await
                .map_err(|err| ConnectError::storage(err.to_string()))?;
            self.emit(
                ConnectEvent::StorageCleared { reason: "Grant logout".to_string() },
                None,
            );
        }

        self.emit(
            ConnectEvent::SignedOut {
                grant_id: grant_id.map(str::to_string),
                reason: SignOutReason::UserInitiated,
            },
            None,
        );
        info!(grant_id = ?grant_id, "grant logged out");
        Ok(())
    }

    /// The normalized, versioned API base URL.
    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.inner.config.api_url
    }

    /// The resolved environment.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.inner.config.environment
    }

    /// Whether debug logging was requested.
    #[must_use]
    pub fn debug(&self) -> bool {
        self.inner.config.debug
    }

    // ---- internals ----

    fn emit(&self, event: ConnectEvent, session: Option<&SessionData>) {
        self.inner.listeners.emit(&event, session);
    }

    fn emit_success_events(&self, session: &SessionData) {
        let provider = session
            .grant_info
            .as_ref()
            .map_or_else(|| "unknown".to_string(), |info| info.provider.clone());
        self.emit(
            ConnectEvent::ConnectSuccess {
                grant_id: session.grant_id.clone(),
                provider,
                scopes: session.scope.split(' ').filter(|s| !s.is_empty()).map(String::from).collect(),
            },
            Some(session),
        );
        self.emit(
            ConnectEvent::SignedIn { session: session.clone(), is_new_login: true },
            Some(session),
        );
    }

    async fn store_transaction(&self, transaction: &TransactionState) -> Result<(), ConnectError> {
        let key = auth_state_key(&self.inner.config.client_id);
        let serialized = serde_json::to_string(transaction)
            .map_err(|err| ConnectError::storage(err.to_string()))?;
        if let Err(err) = self.inner.transactions.set(&key, &serialized).await {
            self.emit(
                ConnectEvent::StorageError {
                    operation: "set".to_string(),
                    key,
                    message: err.to_string(),
                },
                None,
            );
            return Err(ConnectError::storage(err.to_string()));
        }
        debug!("transaction state stored");
        Ok(())
    }

    async fn load_transaction(&self) -> Result<TransactionState, ConnectError> {
        let key = auth_state_key(&self.inner.config.client_id);
        let raw = self
            .inner
            .transactions
            .get(&key)
            .await
            .map_err(|err| ConnectError::storage(err.to_string()))?
            .ok_or_else(|| {
                ConnectError::oauth_with_message("invalid_request", "No stored auth state found")
            })?;
        serde_json::from_str(&raw).map_err(|_| {
            ConnectError::oauth_with_message("invalid_request", "Invalid stored auth state")
        })
    }

    async fn popup_authenticate(
        &self,
        auth_url: &str,
        expected_state: &str,
        code_verifier: &str,
        options: &ConnectOptions,
        scopes: &[String],
    ) -> Result<SessionData, ConnectError> {
        self.emit(
            ConnectEvent::ConnectPopupOpened {
                url: auth_url.to_string(),
                provider: options.provider.map(|p| p.to_string()),
            },
            None,
        );

        match self
            .drive_popup(auth_url, expected_state, code_verifier, options, scopes)
            .await
        {
            Ok(session) => {
                self.emit_success_events(&session);
                Ok(session)
            }
            Err(err) => {
                let cancelled = err.is_cancellation();
                self.emit(
                    ConnectEvent::ConnectPopupClosed {
                        reason: if cancelled {
                            PopupCloseReason::Cancelled
                        } else {
                            PopupCloseReason::Error
                        },
                    },
                    None,
                );
                if cancelled {
                    self.emit(ConnectEvent::ConnectCancelled { reason: err.to_string() }, None);
                } else {
                    self.emit(
                        ConnectEvent::ConnectError {
                            error: err.clone(),
                            step: "popup_authentication".to_string(),
                        },
                        None,
                    );
                }
                Err(err)
            }
        }
    }

    async fn drive_popup(
        &self,
        auth_url: &str,
        expected_state: &str,
        code_verifier: &str,
        options: &ConnectOptions,
        scopes: &[String],
    ) -> Result<SessionData, ConnectError> {
        let driver = self
            .inner
            .config
            .popup_driver
            .as_ref()
            .ok_or_else(|| ConnectError::popup("No popup driver configured"))?;

        let mut geometry = PopupGeometry::default();
        if let Some(width) = options.popup_width {
            geometry.width = width;
        }
        if let Some(height) = options.popup_height {
            geometry.height = height;
        }
        driver.open(auth_url, geometry).await?;

        let message = match tokio::time::timeout(POPUP_TIMEOUT, driver.recv()).await {
            Ok(Ok(message)) => message,
            Ok(Err(err)) => {
                driver.close();
                return Err(err);
            }
            Err(_) => {
                driver.close();
                return Err(ConnectError::popup("Authentication timeout"));
            }
        };
        driver.close();

        match message {
            PopupMessage::Success { code, state } => {
                if state != expected_state {
                    return Err(ConnectError::popup("Invalid state parameter in callback"));
                }
                self.emit(
                    ConnectEvent::ConnectPopupClosed { reason: PopupCloseReason::Completed },
                    None,
                );
                self.exchange_code(&code, code_verifier, &state, options.provider, scopes).await
            }
            PopupMessage::Error { error, error_description } => {
                Err(ConnectError::oauth(&error, error_description))
            }
        }
    }

    /// Redeem an authorization code through the custom exchange when one is
    /// configured, otherwise the built-in token endpoint, then persist the
    /// resulting session.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        state: &str,
        provider: Option<Provider>,
        scopes: &[String],
    ) -> Result<SessionData, ConnectError> {
        let session = if let Some(exchange) = &self.inner.config.code_exchange {
            self.run_custom_exchange(exchange, code, code_verifier, state, provider, scopes)
                .await?
        } else {
            self.run_builtin_exchange(code, code_verifier).await?
        };

        if let Err(err) = self.inner.sessions.store(&session).await {
            self.emit(
                ConnectEvent::StorageError {
                    operation: "set".to_string(),
                    key: err.key.clone(),
                    message: err.message.clone(),
                },
                None,
            );
            return Err(ConnectError::storage(err.to_string()));
        }

        info!(grant_id = %session.grant_id, scope = %session.scope, "authentication successful");
        Ok(session)
    }

    async fn run_custom_exchange(
        &self,
        exchange: &Arc<dyn CodeExchange>,
        code: &str,
        code_verifier: &str,
        state: &str,
        provider: Option<Provider>,
        scopes: &[String],
    ) -> Result<SessionData, ConnectError> {
        let request = CodeExchangeRequest {
            code: code.to_string(),
            state: state.to_string(),
            code_verifier: code_verifier.to_string(),
            scopes: scopes.to_vec(),
            provider,
            client_id: self.inner.config.client_id.clone(),
            redirect_uri: self.inner.config.redirect_uri.clone(),
        };

        let failed = |this: &Self| {
            let err = ConnectError::token("Custom code exchange failed");
            this.emit(
                ConnectEvent::ConnectError {
                    error: err.clone(),
                    step: "code_exchange".to_string(),
                },
                None,
            );
            err
        };

        let result = match exchange.exchange(request).await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "custom code exchange failed");
                return Err(failed(self));
            }
        };
        if result.access_token.is_empty() || result.grant_id.is_empty() {
            return Err(failed(self));
        }

        Ok(SessionData {
            access_token: result.access_token,
            id_token: result.id_token.unwrap_or_default(),
            grant_id: result.grant_id,
            expires_at: result
                .expires_at
                .unwrap_or_else(|| Utc::now().timestamp_millis() + DEFAULT_SESSION_TTL_MS),
            scope: result.scope.unwrap_or_else(|| scopes.join(" ")),
            grant_info: result.grant_info,
            refresh_token: result.refresh_token,
        })
    }

    async fn run_builtin_exchange(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<SessionData, ConnectError> {
        let config = &self.inner.config;
        debug!(code = %redact(code), "exchanging authorization code for tokens");

        let mut payload = serde_json::json!({
            "client_id": config.client_id,
            "redirect_uri": config.redirect_uri,
            "code": code,
            "grant_type": "authorization_code",
            "code_verifier": code_verifier,
        });
        if let Some(supplier) = &config.identity_provider_token {
            match supplier.token().await {
                Ok(Some(claims)) if !claims.is_empty() => {
                    payload["idp_claims"] = serde_json::Value::String(claims);
                }
                Ok(_) => {}
                Err(err) => {
                    error!(error = %err, "identity provider token callback failed");
                    let wrapped =
                        ConnectError::network("Identity provider token callback failed");
                    self.emit(
                        ConnectEvent::NetworkError {
                            operation: "identity_provider_token_callback".to_string(),
                            error: wrapped.clone(),
                        },
                        None,
                    );
                    return Err(wrapped);
                }
            }
        }

        let url = format!("{}/connect/token", config.api_url);
        let response = self
            .inner
            .http
            .post(&url)
            .header(CONNECT_VERSION_HEADER, env!("CARGO_PKG_VERSION"))
            .json(&payload)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                return Err(self.token_exchange_failed(ConnectError::network(format!(
                    "Token exchange failed: {err}"
                ))));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.ok();
            error!(status = status.as_u16(), "token exchange failed");
            return Err(self.token_exchange_failed(ConnectError::network_response(
                format!("Token exchange failed: {}", status.as_u16()),
                status.as_u16(),
                body,
            )));
        }

        let token_response: TokenResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                return Err(self.token_exchange_failed(ConnectError::network(format!(
                    "Token exchange failed: {err}"
                ))));
            }
        };

        let grant_info = match decode_identity_claims(&token_response.id_token) {
            Ok(info) => {
                self.emit(
                    ConnectEvent::GrantProfileLoaded {
                        grant_info: info.clone(),
                        source: ProfileSource::Token,
                    },
                    None,
                );
                Some(info)
            }
            Err(err) => {
                return Err(self.token_exchange_failed(err));
            }
        };

        Ok(SessionData {
            access_token: token_response.access_token,
            id_token: token_response.id_token,
            grant_id: token_response.grant_id,
            expires_at: Utc::now().timestamp_millis() + token_response.expires_in * 1000,
            scope: token_response.scope.unwrap_or_default(),
            grant_info,
            refresh_token: token_response.refresh_token,
        })
    }

    fn token_exchange_failed(&self, err: ConnectError) -> ConnectError {
        self.emit(
            ConnectEvent::NetworkError {
                operation: "token_exchange".to_string(),
                error: err.clone(),
            },
            None,
        );
        err
    }

    /// Bound the processed-code set. Gated to once per [`CLEANUP_INTERVAL`];
    /// the set is cleared wholesale past [`PROCESSED_CODES_MAX`] entries.
    fn cleanup_callback_state(&self) {
        let mut dedup = self.inner.dedup.lock();
        if dedup.last_cleanup.elapsed() < CLEANUP_INTERVAL {
            return;
        }
        if dedup.processed.len() > PROCESSED_CODES_MAX {
            debug!("clearing processed callback codes");
            dedup.processed.clear();
        }
        dedup.last_cleanup = Instant::now();
    }
}

impl std::fmt::Debug for ConnectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectClient")
            .field("client_id", &redact(&self.inner.config.client_id))
            .field("api_url", &self.inner.config.api_url)
            .field("environment", &self.inner.config.environment)
            .finish_non_exhaustive()
    }
}

fn detect_environment(specified: Option<Environment>, redirect_uri: &str) -> Environment {
    if let Some(environment) = specified {
        return environment;
    }
    match std::env::var("NYLAS_ENV").ok().as_deref() {
        Some("production") => return Environment::Production,
        Some("staging") | Some("test") => return Environment::Staging,
        Some("development") => return Environment::Development,
        _ => {}
    }
    if let Ok(url) = Url::parse(redirect_uri) {
        if let Some(host) = url.host_str() {
            if host == "localhost" || host == "127.0.0.1" || host.ends_with(".local") {
                return Environment::Development;
            }
        }
    }
    Environment::Production
}

fn redirect_origin(redirect_uri: &str) -> String {
    Url::parse(redirect_uri)
        .map(|url| url.origin().ascii_serialization())
        .unwrap_or_default()
}

fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(8).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    //! Unit tests for construction and environment detection.
    use super::*;

    fn minimal_config() -> ConnectConfig {
        ConnectConfig {
            client_id: "client-1".to_string(),
            redirect_uri: "https://app.example.com/auth/callback".to_string(),
            ..ConnectConfig::default()
        }
    }

    /// Validates `ConnectClient::new` behavior for the required-field
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms an empty client ID fails with `config_error`.
    /// - Confirms a missing or relative redirect URI fails.
    /// - Confirms a complete configuration constructs.
    #[test]
    fn test_config_validation() {
        let mut config = minimal_config();
        config.client_id = String::new();
        assert_eq!(ConnectClient::new(config).unwrap_err().code(), "config_error");

        let mut config = minimal_config();
        config.redirect_uri = String::new();
        assert_eq!(ConnectClient::new(config).unwrap_err().code(), "config_error");

        let mut config = minimal_config();
        config.redirect_uri = "/auth/callback".to_string();
        assert_eq!(ConnectClient::new(config).unwrap_err().code(), "config_error");

        assert!(ConnectClient::new(minimal_config()).is_ok());
    }

    /// Validates `ConnectClient::new` behavior for the API URL
    /// normalization scenario.
    ///
    /// Assertions:
    /// - Confirms the default base gains `/v3`.
    /// - Confirms an already-versioned base is untouched.
    #[test]
    fn test_api_url_normalized_at_construction() {
        let client = ConnectClient::new(minimal_config()).unwrap();
        assert_eq!(client.api_url(), "https://api.us.nylas.com/v3");

        let mut config = minimal_config();
        config.api_url = Some("https://api.eu.nylas.com/v2/".to_string());
        let client = ConnectClient::new(config).unwrap();
        assert_eq!(client.api_url(), "https://api.eu.nylas.com/v2");
    }

    /// Validates `detect_environment` behavior for the auto-detection
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms an explicit environment wins.
    /// - Confirms localhost-style redirect hosts detect as development.
    /// - Confirms everything else defaults to production.
    #[test]
    fn test_environment_detection() {
        assert_eq!(
            detect_environment(Some(Environment::Staging), "https://app.example.com/cb"),
            Environment::Staging
        );
        assert_eq!(
            detect_environment(None, "http://localhost:3000/cb"),
            Environment::Development
        );
        assert_eq!(
            detect_environment(None, "http://127.0.0.1/cb"),
            Environment::Development
        );
        assert_eq!(
            detect_environment(None, "https://dev.machine.local/cb"),
            Environment::Development
        );
        assert_eq!(
            detect_environment(None, "https://app.example.com/cb"),
            Environment::Production
        );
    }

    /// Validates `ConnectClient::new` behavior for the debug-default
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms debug defaults on in development and off in production.
    /// - Confirms an explicit flag overrides the environment default.
    #[test]
    fn test_debug_defaults() {
        let mut config = minimal_config();
        config.redirect_uri = "http://localhost:3000/cb".to_string();
        let client = ConnectClient::new(config).unwrap();
        assert_eq!(client.environment(), Environment::Development);
        assert!(client.debug());

        let client = ConnectClient::new(minimal_config()).unwrap();
        assert!(!client.debug());

        let mut config = minimal_config();
        config.debug = Some(true);
        let client = ConnectClient::new(config).unwrap();
        assert!(client.debug());
    }

    /// Validates `cleanup_callback_state` behavior for the processed-code
    /// bound scenario.
    ///
    /// Assertions:
    /// - Confirms an over-bound processed set is cleared once the sweep
    ///   interval has elapsed.
    /// - Confirms a set at the bound survives the sweep and its codes still
    ///   reject replay.
    /// - Confirms no sweep runs before the interval elapses.
    #[tokio::test]
    async fn test_processed_code_bound() {
        let client = ConnectClient::new(minimal_config()).unwrap();

        // Over the bound with the sweep due: cleared wholesale.
        {
            let mut dedup = client.inner.dedup.lock();
            for i in 0..=PROCESSED_CODES_MAX {
                dedup.processed.insert(format!("code-{i}"));
            }
            dedup.last_cleanup = Instant::now() - CLEANUP_INTERVAL;
        }
        client.cleanup_callback_state();
        assert!(client.inner.dedup.lock().processed.is_empty());

        // At the bound with the sweep due: retained.
        {
            let mut dedup = client.inner.dedup.lock();
            for i in 0..PROCESSED_CODES_MAX {
                dedup.processed.insert(format!("code-{i}"));
            }
            dedup.last_cleanup = Instant::now() - CLEANUP_INTERVAL;
        }
        client.cleanup_callback_state();
        assert_eq!(client.inner.dedup.lock().processed.len(), PROCESSED_CODES_MAX);

        // Retained codes still reject replay.
        let err = client
            .callback("https://app.example.com/auth/callback?code=code-1&state=s")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Authorization code has already been processed");

        // Over the bound again, but the interval has not elapsed: untouched.
        {
            let mut dedup = client.inner.dedup.lock();
            dedup.processed.insert("one-more".to_string());
            dedup.last_cleanup = Instant::now();
        }
        client.cleanup_callback_state();
        assert_eq!(client.inner.dedup.lock().processed.len(), PROCESSED_CODES_MAX + 1);
    }

    /// Validates `redirect_origin` behavior for the relay-origin scenario.
    ///
    /// Assertions:
    /// - Confirms the origin excludes path and query.
    #[test]
    fn test_redirect_origin() {
        assert_eq!(
            redirect_origin("https://app.example.com/auth/callback?tab=1"),
            "https://app.example.com"
        );
    }
}
