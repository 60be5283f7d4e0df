//! Identity-token claim decoding
//!
//! Decodes the middle segment of a JWT-shaped identity token into a
//! [`GrantInfo`] profile. The signature is NOT verified: the token arrives
//! over TLS from the authorization server the client itself contacted, and
//! the claims feed display only. Never use this to establish trust in a
//! token from any other source.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::error::ConnectError;
use crate::types::GrantInfo;

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: String,
    email: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
}

/// Decode the claims of an identity token into a grant profile.
///
/// The display name falls back through `name`, `given_name`, then `email`;
/// the provider defaults to `"unknown"` when the token does not carry one.
///
/// # Errors
/// Returns a token error when the token is not three dot-separated
/// segments, the payload is not valid base64url, or the claims are not the
/// expected JSON shape.
pub fn decode_identity_claims(id_token: &str) -> Result<GrantInfo, ConnectError> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return Err(ConnectError::token("Invalid ID token"));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| ConnectError::token("Invalid ID token"))?;
    let claims: IdentityClaims =
        serde_json::from_slice(&payload).map_err(|_| ConnectError::token("Invalid ID token"))?;

    let name = claims
        .name
        .or(claims.given_name.clone())
        .or_else(|| Some(claims.email.clone()));

    Ok(GrantInfo {
        id: claims.sub,
        email: claims.email,
        name,
        picture: claims.picture,
        provider: claims.provider.unwrap_or_else(|| "unknown".to_string()),
        email_verified: claims.email_verified,
        given_name: claims.given_name,
        family_name: claims.family_name,
    })
}
