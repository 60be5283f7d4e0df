//! Error taxonomy for the connect client
//!
//! Every failure surfaces as a [`ConnectError`] with a stable machine-readable
//! code, a human-readable message, and (where available) an actionable fix.
//! Errors are `Clone` so a single failed code exchange can be handed to every
//! caller that is awaiting the same deduplicated callback.

use thiserror::Error;

/// Default documentation URL attached to errors.
pub const DOCS_URL: &str = "https://developer.nylas.com/docs/v3/auth/";

/// Documentation URL for hosted OAuth errors.
pub const OAUTH_DOCS_URL: &str = "https://developer.nylas.com/docs/v3/auth/hosted-oauth-apikey/";

/// Standard OAuth 2.0 error codes returned on the authorization callback or
/// by the token endpoint, plus a catch-all for non-standard codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthErrorCode {
    /// The resource owner denied the authorization request.
    AccessDenied,
    /// The request is missing a parameter or is otherwise malformed.
    InvalidRequest,
    /// Client authentication failed.
    InvalidClient,
    /// The authorization grant is invalid, expired, or revoked.
    InvalidGrant,
    /// The client is not authorized to use this grant type.
    UnauthorizedClient,
    /// The grant type is not supported by the server.
    UnsupportedGrantType,
    /// The requested scope is invalid or unknown.
    InvalidScope,
    /// The server encountered an unexpected condition.
    ServerError,
    /// The server is temporarily unable to handle the request.
    TemporarilyUnavailable,
    /// Any other code the server returned.
    Other(String),
}

impl OAuthErrorCode {
    /// Parse a raw `error` parameter into a known code.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "access_denied" => Self::AccessDenied,
            "invalid_request" => Self::InvalidRequest,
            "invalid_client" => Self::InvalidClient,
            "invalid_grant" => Self::InvalidGrant,
            "unauthorized_client" => Self::UnauthorizedClient,
            "unsupported_grant_type" => Self::UnsupportedGrantType,
            "invalid_scope" => Self::InvalidScope,
            "server_error" => Self::ServerError,
            "temporarily_unavailable" => Self::TemporarilyUnavailable,
            other => Self::Other(other.to_string()),
        }
    }

    /// The raw OAuth error code string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AccessDenied => "access_denied",
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::Other(code) => code.as_str(),
        }
    }

    /// Default human-readable message for this code.
    #[must_use]
    pub fn default_message(&self) -> String {
        match self {
            Self::AccessDenied => "Grant access was denied".to_string(),
            Self::InvalidRequest => {
                "The request is missing a required parameter or is otherwise invalid".to_string()
            }
            Self::InvalidClient => "Client authentication failed".to_string(),
            Self::InvalidGrant => "The provided authorization grant is invalid".to_string(),
            Self::UnauthorizedClient => {
                "The client is not authorized to request an access token".to_string()
            }
            Self::UnsupportedGrantType => {
                "The authorization grant type is not supported".to_string()
            }
            Self::InvalidScope => "The requested scope is invalid or unknown".to_string(),
            Self::ServerError => {
                "The authorization server encountered an unexpected condition".to_string()
            }
            Self::TemporarilyUnavailable => {
                "The authorization server is temporarily unavailable".to_string()
            }
            Self::Other(code) => format!("OAuth error: {code}"),
        }
    }

    /// Suggested remediation for this code.
    #[must_use]
    pub fn default_fix(&self) -> &str {
        match self {
            Self::AccessDenied => {
                "The authentication was cancelled. Try authenticating again when ready to proceed."
            }
            Self::InvalidRequest => {
                "Check that your clientId and redirectUri are correct in your configuration."
            }
            Self::InvalidClient => {
                "Verify your Client ID is correct and the application is properly configured."
            }
            Self::InvalidGrant => "The authorization code may have expired. Try authenticating again.",
            Self::UnauthorizedClient => "Check your application configuration in the Dashboard.",
            Self::UnsupportedGrantType => {
                "Ensure you're using the correct OAuth flow. Use PKCE for web applications."
            }
            Self::InvalidScope => {
                "Check that the requested scopes are valid and enabled for your application."
            }
            Self::ServerError => "This is a temporary server issue. Try again in a few moments.",
            Self::TemporarilyUnavailable => {
                "The service is temporarily unavailable. Try again later."
            }
            Self::Other(_) => "Check the documentation for more information about this error.",
        }
    }
}

/// Unified error type for all connect client operations.
///
/// `Clone` is required: failed in-flight exchanges are shared between every
/// concurrent caller awaiting the same authorization code, so payloads hold
/// owned strings rather than source errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// Invalid or incomplete client configuration. Raised synchronously at
    /// construction time.
    #[error("{message}")]
    Config {
        /// What is wrong with the configuration.
        message: String,
    },

    /// OAuth protocol error from the authorization server.
    #[error("{message}")]
    OAuth {
        /// The OAuth error code from the server.
        oauth_code: OAuthErrorCode,
        /// Human-readable message.
        message: String,
        /// Server-provided `error_description`, when present.
        description: Option<String>,
        /// Suggested remediation.
        fix: String,
    },

    /// HTTP transport or non-success response failure.
    #[error("{message}")]
    Network {
        /// Human-readable message.
        message: String,
        /// HTTP status code when a response was received.
        status: Option<u16>,
        /// Best-effort response body for diagnostics.
        body: Option<String>,
    },

    /// Token exchange, parsing, or validation failure.
    #[error("{message}")]
    Token {
        /// Human-readable message.
        message: String,
    },

    /// Popup window failure (blocked, closed early, or timed out).
    #[error("{message}")]
    Popup {
        /// Human-readable message.
        message: String,
    },

    /// Storage backend failure.
    #[error("{message}")]
    Storage {
        /// Human-readable message.
        message: String,
    },
}

impl ConnectError {
    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Build an OAuth error from a raw `error` / `error_description` pair,
    /// filling in the default message and fix for known codes.
    pub fn oauth(raw_code: &str, description: Option<String>) -> Self {
        let oauth_code = OAuthErrorCode::parse(raw_code);
        Self::OAuth {
            message: oauth_code.default_message(),
            fix: oauth_code.default_fix().to_string(),
            description,
            oauth_code,
        }
    }

    /// Build an OAuth error with a custom message, keeping the code's
    /// default fix.
    pub fn oauth_with_message(raw_code: &str, message: impl Into<String>) -> Self {
        let oauth_code = OAuthErrorCode::parse(raw_code);
        Self::OAuth {
            message: message.into(),
            fix: oauth_code.default_fix().to_string(),
            description: None,
            oauth_code,
        }
    }

    /// Build a network error without response context.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into(), status: None, body: None }
    }

    /// Build a network error carrying the HTTP status and response body.
    pub fn network_response(message: impl Into<String>, status: u16, body: Option<String>) -> Self {
        Self::Network { message: message.into(), status: Some(status), body }
    }

    /// Build a token error.
    pub fn token(message: impl Into<String>) -> Self {
        Self::Token { message: message.into() }
    }

    /// Build a popup error.
    pub fn popup(message: impl Into<String>) -> Self {
        Self::Popup { message: message.into() }
    }

    /// Build a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Stable machine-readable error code.
    ///
    /// OAuth errors carry the server code prefixed with `oauth_`
    /// (e.g. `oauth_access_denied`); every other class has a fixed code.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::Config { .. } => "config_error".to_string(),
            Self::OAuth { oauth_code, .. } => format!("oauth_{}", oauth_code.as_str()),
            Self::Network { .. } => "network_error".to_string(),
            Self::Token { .. } => "token_error".to_string(),
            Self::Popup { .. } => "popup_error".to_string(),
            Self::Storage { .. } => "storage_error".to_string(),
        }
    }

    /// Suggested remediation, when one exists for this error class.
    #[must_use]
    pub fn fix(&self) -> Option<&str> {
        match self {
            Self::Config { .. } => None,
            Self::OAuth { fix, .. } => Some(fix.as_str()),
            Self::Network { .. } => {
                Some("Check your network connection and the service status")
            }
            Self::Token { .. } => Some("Ensure tokens are valid and not expired"),
            Self::Popup { .. } => {
                Some("Ensure popups are not blocked and try authenticating again")
            }
            Self::Storage { .. } => None,
        }
    }

    /// Documentation URL for this error class.
    #[must_use]
    pub fn docs_url(&self) -> &str {
        match self {
            Self::OAuth { .. } => OAUTH_DOCS_URL,
            _ => DOCS_URL,
        }
    }

    /// Whether this error represents user cancellation rather than a hard
    /// failure. Matched on the message text because cancellation surfaces
    /// through several paths (denied grant, closed popup, timed-out wait).
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        if let Self::OAuth { oauth_code: OAuthErrorCode::AccessDenied, .. } = self {
            return true;
        }
        let message = self.to_string().to_lowercase();
        message.contains("closed") || message.contains("cancelled")
    }
}
