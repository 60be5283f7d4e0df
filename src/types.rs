//! Core types for the connect client
//!
//! Configuration, flow options, stored records, and the wire-level token
//! response. Stored records serialize with camelCase field names so existing
//! persisted sessions remain readable.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::popup::{OpenerRelay, PopupDriver};
use crate::storage::TokenStorage;
use crate::traits::{CodeExchange, IdentityProviderToken, UrlHistory};

/// Lifetime of a pending OAuth transaction before its stored state is
/// considered stale (15 minutes).
pub const AUTH_STATE_TTL_MS: i64 = 15 * 60 * 1000;

/// Supported OAuth providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Workspace / Gmail.
    Google,
    /// Microsoft 365 / Outlook.
    Microsoft,
    /// Generic IMAP (no scope support).
    Imap,
    /// iCloud (custom scopes).
    Icloud,
    /// Yahoo Mail.
    Yahoo,
}

impl Provider {
    /// The wire-format provider name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Imap => "imap",
            Self::Icloud => "icloud",
            Self::Yahoo => "yahoo",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment environment, auto-detected when not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development (localhost redirect URIs).
    Development,
    /// Staging / test deployments.
    Staging,
    /// Production (the safe default).
    Production,
}

/// How the authorization flow is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMethod {
    /// Full-page redirect: `connect` returns the authorization URL and the
    /// host navigates to it.
    #[default]
    Inline,
    /// Popup window driven by the configured [`PopupDriver`].
    Popup,
}

impl ConnectMethod {
    /// The wire-format method name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inline => "inline",
            Self::Popup => "popup",
        }
    }
}

/// Connection state of a stored grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// A session exists and its token passed validation.
    Connected,
    /// A session exists but its token failed validation.
    Invalid,
    /// No usable session exists.
    NotConnected,
}

/// Default scopes: either one flat list for every provider, or a
/// per-provider map consulted when a flow names a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultScopes {
    /// One list applied regardless of provider.
    Flat(Vec<String>),
    /// Provider-specific lists. A flow with no provider, or a provider
    /// missing from the map, resolves to no scopes.
    ByProvider(HashMap<Provider, Vec<String>>),
}

impl DefaultScopes {
    /// Resolve the default scopes for an optional provider.
    #[must_use]
    pub fn resolve(&self, provider: Option<Provider>) -> Vec<String> {
        match self {
            Self::Flat(scopes) => scopes.clone(),
            Self::ByProvider(map) => provider
                .and_then(|p| map.get(&p))
                .cloned()
                .unwrap_or_default(),
        }
    }
}

/// Configuration for [`ConnectClient`](crate::client::ConnectClient).
///
/// Only `client_id` and `redirect_uri` are required; everything else has a
/// working default. Collaborators (storage, popup driver, custom exchange)
/// are trait objects so hosts can plug in their own implementations.
#[derive(Clone, Default)]
pub struct ConnectConfig {
    /// OAuth client ID.
    pub client_id: String,
    /// Absolute redirect URI registered for this client.
    pub redirect_uri: String,
    /// Authorization API base URL. Defaults to `https://api.us.nylas.com`;
    /// normalized and versioned (`/v3`) at construction.
    pub api_url: Option<String>,
    /// Deployment environment. Auto-detected when unset.
    pub environment: Option<Environment>,
    /// Default scopes applied when a flow does not pass its own.
    pub default_scopes: Option<DefaultScopes>,
    /// Verbose logging. Defaults to true in development.
    pub debug: Option<bool>,
    /// Persist sessions in the configured storage backend. When false,
    /// sessions live in process memory only. Defaults to true.
    pub persist_tokens: Option<bool>,
    /// Durable storage backend. Falls back to in-memory storage when unset.
    pub storage: Option<Arc<dyn TokenStorage>>,
    /// Custom authorization-code exchange, replacing the built-in token
    /// endpoint call. Flows skip PKCE when this is set.
    pub code_exchange: Option<Arc<dyn CodeExchange>>,
    /// Supplier of identity-provider claims forwarded to the built-in
    /// exchange as `idp_claims`.
    pub identity_provider_token: Option<Arc<dyn IdentityProviderToken>>,
    /// Popup window driver for [`ConnectMethod::Popup`] flows.
    pub popup_driver: Option<Arc<dyn PopupDriver>>,
    /// Relay used when a callback lands in a popup that must hand its
    /// parameters back to the opener.
    pub opener_relay: Option<Arc<dyn OpenerRelay>>,
    /// History hook for stripping OAuth parameters from the callback URL.
    pub url_history: Option<Arc<dyn UrlHistory>>,
}

impl fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("api_url", &self.api_url)
            .field("environment", &self.environment)
            .field("default_scopes", &self.default_scopes)
            .field("debug", &self.debug)
            .field("persist_tokens", &self.persist_tokens)
            .field("storage", &self.storage.as_ref().map(|_| "<TokenStorage>"))
            .field("code_exchange", &self.code_exchange.as_ref().map(|_| "<CodeExchange>"))
            .field(
                "identity_provider_token",
                &self.identity_provider_token.as_ref().map(|_| "<IdentityProviderToken>"),
            )
            .field("popup_driver", &self.popup_driver.as_ref().map(|_| "<PopupDriver>"))
            .field("opener_relay", &self.opener_relay.as_ref().map(|_| "<OpenerRelay>"))
            .field("url_history", &self.url_history.as_ref().map(|_| "<UrlHistory>"))
            .finish()
    }
}

/// Per-flow options for [`ConnectClient::connect`](crate::client::ConnectClient::connect)
/// and [`ConnectClient::get_auth_url`](crate::client::ConnectClient::get_auth_url).
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Flow method. Defaults to inline.
    pub method: ConnectMethod,
    /// Explicit scopes, overriding the configured defaults.
    pub scopes: Option<Vec<String>>,
    /// Target provider.
    pub provider: Option<Provider>,
    /// Email hint pre-filling the provider's login form.
    pub login_hint: Option<String>,
    /// Caller-supplied CSRF state, replacing the generated one.
    pub state: Option<String>,
    /// Popup width in pixels (driver default when unset).
    pub popup_width: Option<u32>,
    /// Popup height in pixels (driver default when unset).
    pub popup_height: Option<u32>,
}

/// A prepared authorization URL from `get_auth_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUrl {
    /// The full authorization URL.
    pub url: String,
    /// The CSRF state embedded in the URL.
    pub state: String,
    /// The scopes embedded in the URL.
    pub scopes: Vec<String>,
}

/// Outcome of [`ConnectClient::connect`](crate::client::ConnectClient::connect).
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// Inline flow: navigate to this authorization URL to continue.
    Redirect(String),
    /// The flow completed (restored or popup) and produced a session.
    Session(SessionData),
}

/// Outcome of [`ConnectClient::callback`](crate::client::ConnectClient::callback).
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// The URL carried no OAuth callback parameters; nothing was done.
    Ignored,
    /// The parameters were relayed to the opener window; the opener's own
    /// callback handling completes the flow.
    Relayed,
    /// The callback was processed (or joined in-flight) and produced a
    /// session.
    Session(SessionData),
}

/// Grant profile derived from identity-token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantInfo {
    /// Subject identifier (`sub` claim).
    pub id: String,
    /// Email address.
    pub email: String,
    /// Display name, when the provider supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Profile picture URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Provider name; `"unknown"` when the token did not say.
    pub provider: String,
    /// Whether the provider verified the email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    /// Given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// Family name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
}

/// Pending OAuth transaction, stored from flow start until the callback.
///
/// Keyed by client ID, so concurrent flows for one client overwrite each
/// other and only the newest remains completable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionState {
    /// PKCE verifier for the token exchange (empty when a custom exchange
    /// without PKCE is configured).
    pub code_verifier: String,
    /// Expected CSRF state.
    pub state: String,
    /// Scopes the flow requested.
    pub scopes: Vec<String>,
    /// Creation time, ms since the Unix epoch.
    pub timestamp: i64,
}

impl TransactionState {
    /// Whether this transaction is older than [`AUTH_STATE_TTL_MS`].
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms - self.timestamp > AUTH_STATE_TTL_MS
    }
}

/// An authenticated session, persisted per grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    /// Bearer token for API calls.
    pub access_token: String,
    /// Raw identity token the session was minted from.
    pub id_token: String,
    /// Grant identifier.
    pub grant_id: String,
    /// Expiry, ms since the Unix epoch. The session is valid strictly
    /// before this instant.
    pub expires_at: i64,
    /// Space-separated granted scopes.
    pub scope: String,
    /// Profile decoded from the identity token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_info: Option<GrantInfo>,
    /// Refresh token, when the server issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl SessionData {
    /// Whether the session is still valid at `now_ms`.
    #[must_use]
    pub fn is_valid(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }
}

/// Token endpoint response body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer access token.
    pub access_token: String,
    /// Identity token (unsigned-claims JWT).
    pub id_token: String,
    /// Token type, normally `bearer`.
    #[serde(default)]
    pub token_type: Option<String>,
    /// Seconds until the access token expires.
    pub expires_in: i64,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
    /// Grant identifier.
    pub grant_id: String,
    /// Refresh token, when issued.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Resolve the effective scopes for a flow.
///
/// Precedence: explicit per-call scopes, then the configured defaults
/// (flat or provider-keyed), then empty.
#[must_use]
pub fn resolve_scopes(
    explicit: Option<&[String]>,
    provider: Option<Provider>,
    defaults: Option<&DefaultScopes>,
) -> Vec<String> {
    if let Some(scopes) = explicit {
        return scopes.to_vec();
    }
    defaults.map(|d| d.resolve(provider)).unwrap_or_default()
}
