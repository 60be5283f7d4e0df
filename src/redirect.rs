//! Authorization URL construction and callback URL handling
//!
//! Two query encodings are deliberately kept: the PKCE (public client) path
//! goes through form serialization where spaces become `+`, while the
//! backend path percent-encodes spaces as `%20`. Both are accepted by the
//! authorization server; existing integrations depend on each shape.

use url::Url;

use crate::error::ConnectError;

/// Path version segment appended when the API base URL does not already
/// carry one.
const DEFAULT_API_VERSION: &str = "v3";

/// Normalize an API base URL: collapse trailing slashes and append the
/// default version segment unless the path already ends in `v<digits>`.
#[must_use]
pub fn normalize_api_url(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    let last_segment = trimmed.rsplit('/').next().unwrap_or_default();
    let versioned = last_segment.len() > 1
        && last_segment.starts_with('v')
        && last_segment[1..].chars().all(|c| c.is_ascii_digit());
    if versioned {
        trimmed.to_string()
    } else {
        format!("{trimmed}/{DEFAULT_API_VERSION}")
    }
}

/// Inputs for [`build_auth_url`].
#[derive(Debug, Clone, Default)]
pub struct AuthUrlParams {
    /// Normalized API base URL.
    pub api_url: String,
    /// OAuth client ID.
    pub client_id: String,
    /// Registered redirect URI.
    pub redirect_uri: String,
    /// Scopes to request; omitted from the URL when empty.
    pub scopes: Vec<String>,
    /// CSRF state.
    pub state: String,
    /// Target provider name.
    pub provider: Option<String>,
    /// Login hint for the provider's form.
    pub login_hint: Option<String>,
    /// PKCE challenge. Absent for backend (confidential) flows.
    pub code_challenge: Option<String>,
}

/// Build the authorization URL for a flow.
///
/// With a PKCE challenge the query is form-serialized (`+` for spaces) and
/// carries `code_challenge` / `code_challenge_method=S256`; without one the
/// query is assembled manually with `%20` for spaces and no challenge
/// parameters.
///
/// # Errors
/// Returns a config error when the API base URL cannot be parsed.
pub fn build_auth_url(params: &AuthUrlParams) -> Result<String, ConnectError> {
    if let Some(challenge) = &params.code_challenge {
        let mut url = Url::parse(&format!("{}/connect/auth", params.api_url))
            .map_err(|err| ConnectError::config(format!("invalid API URL: {err}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &params.client_id);
            query.append_pair("redirect_uri", &params.redirect_uri);
            query.append_pair("response_type", "code");
            query.append_pair("state", &params.state);
            query.append_pair("access_type", "online");
            query.append_pair("code_challenge", challenge);
            query.append_pair("code_challenge_method", "S256");
            if !params.scopes.is_empty() {
                query.append_pair("scope", &params.scopes.join(" "));
            }
            if let Some(provider) = &params.provider {
                query.append_pair("provider", provider);
            }
            if let Some(hint) = &params.login_hint {
                query.append_pair("login_hint", hint);
            }
        }
        return Ok(url.into());
    }

    let base = format!("{}/connect/auth", params.api_url.trim_end_matches('/'));
    let mut pairs: Vec<(&str, String)> = vec![
        ("client_id", params.client_id.clone()),
        ("redirect_uri", params.redirect_uri.clone()),
        ("response_type", "code".to_string()),
        ("state", params.state.clone()),
        ("access_type", "online".to_string()),
    ];
    if !params.scopes.is_empty() {
        pairs.push(("scope", params.scopes.join(" ")));
    }
    if let Some(provider) = &params.provider {
        pairs.push(("provider", provider.clone()));
    }
    if let Some(hint) = &params.login_hint {
        pairs.push(("login_hint", hint.clone()));
    }
    let query: Vec<String> = pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect();
    Ok(format!("{base}?{}", query.join("&")))
}

/// OAuth parameters extracted from a callback URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code.
    pub code: Option<String>,
    /// Echoed CSRF state.
    pub state: Option<String>,
    /// OAuth error code.
    pub error: Option<String>,
    /// Server-provided error detail.
    pub error_description: Option<String>,
}

/// Extract the OAuth callback parameters from a URL.
///
/// # Errors
/// Returns a config error when the URL cannot be parsed.
pub fn parse_callback(url: &str) -> Result<CallbackParams, ConnectError> {
    let parsed = Url::parse(url)
        .map_err(|err| ConnectError::config(format!("invalid callback URL: {err}")))?;
    let mut params = CallbackParams::default();
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "code" => params.code = non_empty(value.into_owned()),
            "state" => params.state = non_empty(value.into_owned()),
            "error" => params.error = non_empty(value.into_owned()),
            "error_description" => params.error_description = non_empty(value.into_owned()),
            _ => {}
        }
    }
    Ok(params)
}

/// Whether a URL is an OAuth callback (carries a code or an error).
#[must_use]
pub fn is_callback_url(url: &str) -> bool {
    parse_callback(url)
        .map(|params| params.code.is_some() || params.error.is_some())
        .unwrap_or(false)
}

/// Remove the OAuth parameters from a callback URL.
///
/// Returns the cleaned URL, or `None` when no OAuth parameter was present
/// (or the URL does not parse) and nothing needs rewriting.
#[must_use]
pub fn strip_callback_params(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let oauth_params = ["code", "state", "error", "error_description"];
    let retained: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !oauth_params.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let removed = parsed.query_pairs().count() != retained.len();
    if !removed {
        return None;
    }
    let mut cleaned = parsed;
    if retained.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.query_pairs_mut().clear().extend_pairs(retained);
    }
    Some(cleaned.into())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for URL building and callback parsing.
    use super::*;

    fn base_params() -> AuthUrlParams {
        AuthUrlParams {
            api_url: "https://api.us.nylas.com/v3".to_string(),
            client_id: "client-1".to_string(),
            redirect_uri: "https://app.example.com/auth/callback".to_string(),
            scopes: vec!["email.read".to_string(), "calendar.read".to_string()],
            state: "state-abc".to_string(),
            provider: None,
            login_hint: None,
            code_challenge: Some("challenge-xyz".to_string()),
        }
    }

    /// Validates `normalize_api_url` behavior for the versioning scenario.
    ///
    /// Assertions:
    /// - Confirms an unversioned base gets `/v3` appended.
    /// - Confirms trailing slashes are collapsed before appending.
    /// - Confirms existing version segments (`/v2`, `/v10`) are kept as-is.
    /// - Confirms non-version segments starting with `v` still get `/v3`.
    #[test]
    fn test_normalize_api_url() {
        assert_eq!(normalize_api_url("https://api.us.nylas.com"), "https://api.us.nylas.com/v3");
        assert_eq!(normalize_api_url("https://api.us.nylas.com//"), "https://api.us.nylas.com/v3");
        assert_eq!(normalize_api_url("https://api.eu.nylas.com/v2"), "https://api.eu.nylas.com/v2");
        assert_eq!(normalize_api_url("https://api.example.com/v10/"), "https://api.example.com/v10");
        assert_eq!(
            normalize_api_url("https://api.example.com/vault"),
            "https://api.example.com/vault/v3"
        );
    }

    /// Validates `build_auth_url` behavior for the PKCE flow scenario.
    ///
    /// Assertions:
    /// - Confirms the URL targets `{api}/connect/auth`.
    /// - Confirms required parameters including the S256 challenge pair.
    /// - Confirms scopes are space-joined and form-encoded (`+`).
    #[test]
    fn test_build_auth_url_pkce() {
        let url = build_auth_url(&base_params()).unwrap();
        assert!(url.starts_with("https://api.us.nylas.com/v3/connect/auth?"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Fauth%2Fcallback"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state=state-abc"));
        assert!(url.contains("access_type=online"));
        assert!(url.contains("code_challenge=challenge-xyz"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("scope=email.read+calendar.read"));
    }

    /// Validates `build_auth_url` behavior for the backend flow scenario.
    ///
    /// Assertions:
    /// - Confirms no challenge parameters appear without a challenge.
    /// - Confirms scopes are percent-encoded (`%20`) on this path.
    /// - Confirms provider and login hint are appended when present.
    #[test]
    fn test_build_auth_url_backend() {
        let mut params = base_params();
        params.code_challenge = None;
        params.provider = Some("google".to_string());
        params.login_hint = Some("user@example.com".to_string());

        let url = build_auth_url(&params).unwrap();
        assert!(!url.contains("code_challenge"));
        assert!(url.contains("scope=email.read%20calendar.read"));
        assert!(url.contains("provider=google"));
        assert!(url.contains("login_hint=user%40example.com"));
    }

    /// Validates `build_auth_url` behavior for the empty-scope scenario.
    ///
    /// Assertions:
    /// - Confirms the `scope` parameter is omitted entirely on both paths.
    #[test]
    fn test_build_auth_url_omits_empty_scope() {
        let mut params = base_params();
        params.scopes.clear();
        assert!(!build_auth_url(&params).unwrap().contains("scope="));

        params.code_challenge = None;
        assert!(!build_auth_url(&params).unwrap().contains("scope="));
    }

    /// Validates `parse_callback` behavior for the parameter extraction
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms code/state/error/error_description extraction.
    /// - Confirms unrelated parameters are ignored.
    /// - Confirms empty values read as absent.
    #[test]
    fn test_parse_callback() {
        let params = parse_callback(
            "https://app.example.com/auth/callback?code=abc&state=xyz&theme=dark",
        )
        .unwrap();
        assert_eq!(params.code.as_deref(), Some("abc"));
        assert_eq!(params.state.as_deref(), Some("xyz"));
        assert_eq!(params.error, None);

        let err_params = parse_callback(
            "https://app.example.com/cb?error=access_denied&error_description=User%20denied",
        )
        .unwrap();
        assert_eq!(err_params.error.as_deref(), Some("access_denied"));
        assert_eq!(err_params.error_description.as_deref(), Some("User denied"));

        let empty = parse_callback("https://app.example.com/cb?code=&state=").unwrap();
        assert_eq!(empty.code, None);
        assert_eq!(empty.state, None);
    }

    /// Validates `is_callback_url` behavior for the detection scenario.
    ///
    /// Assertions:
    /// - Confirms detection on code, detection on error, and rejection of
    ///   plain URLs and unparseable strings.
    #[test]
    fn test_is_callback_url() {
        assert!(is_callback_url("https://app.example.com/cb?code=abc"));
        assert!(is_callback_url("https://app.example.com/cb?error=access_denied"));
        assert!(!is_callback_url("https://app.example.com/dashboard"));
        assert!(!is_callback_url("not a url"));
    }

    /// Validates `strip_callback_params` behavior for the URL cleaning
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms OAuth parameters are removed while others are kept.
    /// - Confirms the query disappears entirely when nothing else remains.
    /// - Confirms `None` when there was nothing to remove.
    #[test]
    fn test_strip_callback_params() {
        let cleaned = strip_callback_params(
            "https://app.example.com/cb?code=abc&state=xyz&tab=settings",
        )
        .unwrap();
        assert!(!cleaned.contains("code="));
        assert!(!cleaned.contains("state="));
        assert!(cleaned.contains("tab=settings"));

        let bare = strip_callback_params("https://app.example.com/cb?code=abc").unwrap();
        assert_eq!(bare, "https://app.example.com/cb");

        assert_eq!(strip_callback_params("https://app.example.com/dashboard"), None);
    }
}
