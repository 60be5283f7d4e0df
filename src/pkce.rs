//! PKCE (Proof Key for Code Exchange) generation for OAuth 2.0
//!
//! Implements RFC 7636 for public clients that cannot hold a client secret.
//! The verifier is drawn from the RFC's unreserved alphabet and the challenge
//! is the S256 transform: base64url(SHA-256(verifier)), unpadded.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// RFC 7636 unreserved characters: ALPHA / DIGIT / "-" / "." / "_" / "~".
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Length of generated code verifiers (RFC 7636 allows 43-128).
const VERIFIER_LEN: usize = 64;

/// Length of generated CSRF state tokens.
const STATE_LEN: usize = 32;

/// A PKCE verifier/challenge pair for one authorization flow.
///
/// The verifier stays client-side until token exchange; the challenge is
/// embedded in the authorization URL for the server to check against.
#[derive(Debug, Clone)]
pub struct ChallengePair {
    /// Random secret, 64 chars from the unreserved alphabet.
    pub code_verifier: String,
    /// base64url(SHA-256(code_verifier)), no padding.
    pub code_challenge: String,
}

impl ChallengePair {
    /// Generate a fresh verifier and its derived challenge.
    #[must_use]
    pub fn generate() -> Self {
        let code_verifier = random_string(VERIFIER_LEN);
        let code_challenge = derive_challenge(&code_verifier);
        Self { code_verifier, code_challenge }
    }

    /// The challenge transform method, always `S256`.
    #[must_use]
    pub fn challenge_method(&self) -> &str {
        "S256"
    }
}

/// Derive the S256 code challenge for a verifier.
#[must_use]
pub fn derive_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a random state token for CSRF protection (32 chars).
#[must_use]
pub fn generate_state() -> String {
    random_string(STATE_LEN)
}

fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..VERIFIER_CHARSET.len());
            char::from(VERIFIER_CHARSET[idx])
        })
        .collect()
}
