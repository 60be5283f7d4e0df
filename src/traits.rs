//! Collaborator traits for host-provided behavior
//!
//! These seams let hosts swap in their own code exchange (confidential
//! backends), supply identity-provider claims, or hook URL rewriting.
//! All are object-safe and injected through
//! [`ConnectConfig`](crate::types::ConnectConfig).

use async_trait::async_trait;

use crate::error::ConnectError;
use crate::types::{GrantInfo, Provider};

/// Everything a custom exchange needs to redeem an authorization code.
#[derive(Debug, Clone)]
pub struct CodeExchangeRequest {
    /// The authorization code from the callback.
    pub code: String,
    /// The CSRF state that validated.
    pub state: String,
    /// PKCE verifier, empty for custom exchanges (PKCE is skipped when one
    /// is configured).
    pub code_verifier: String,
    /// Scopes the flow requested.
    pub scopes: Vec<String>,
    /// Target provider, when the flow named one.
    pub provider: Option<Provider>,
    /// OAuth client ID.
    pub client_id: String,
    /// Registered redirect URI.
    pub redirect_uri: String,
}

/// Result of a custom code exchange.
///
/// `access_token` and `grant_id` must be non-empty; the client rejects the
/// result otherwise.
#[derive(Debug, Clone, Default)]
pub struct CodeExchangeResult {
    /// Bearer access token.
    pub access_token: String,
    /// Identity token, when the backend returns one.
    pub id_token: Option<String>,
    /// Grant identifier.
    pub grant_id: String,
    /// Expiry, ms since the Unix epoch. Defaults to one hour out when the
    /// backend does not say.
    pub expires_at: Option<i64>,
    /// Space-separated granted scopes.
    pub scope: Option<String>,
    /// Grant profile, when the backend resolved one.
    pub grant_info: Option<GrantInfo>,
    /// Refresh token, when issued.
    pub refresh_token: Option<String>,
}

/// Host-provided authorization-code exchange.
///
/// When configured, the built-in token endpoint call is bypassed entirely
/// and flows skip PKCE (the backend holds the client secret instead).
#[async_trait]
pub trait CodeExchange: Send + Sync {
    /// Redeem an authorization code for tokens.
    ///
    /// # Errors
    /// Any error is surfaced to the caller as a token error; the code
    /// becomes retryable again.
    async fn exchange(&self, request: CodeExchangeRequest)
        -> Result<CodeExchangeResult, ConnectError>;
}

/// Supplier of identity-provider claims for the built-in exchange.
///
/// Consulted immediately before the token request; a non-empty value is
/// forwarded as `idp_claims`, an empty or absent one is omitted.
#[async_trait]
pub trait IdentityProviderToken: Send + Sync {
    /// Produce the identity-provider token, when one is available.
    ///
    /// # Errors
    /// An error aborts the exchange before the token endpoint is called.
    async fn token(&self) -> Result<Option<String>, ConnectError>;
}

/// Hook for rewriting the host's current URL after a callback is consumed.
///
/// Hosts with an addressable location (a webview, a TUI deep link) replace
/// it with the cleaned URL; hosts without one leave this unset and the
/// client skips the rewrite.
pub trait UrlHistory: Send + Sync {
    /// Replace the current URL with `cleaned`, without navigation.
    fn replace(&self, cleaned: &str);
}
