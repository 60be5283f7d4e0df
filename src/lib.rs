//! OAuth 2.0 + PKCE connect client
//!
//! This crate drives the hosted authorization flow against a connect API:
//! it generates PKCE material, builds authorization URLs, validates and
//! deduplicates redirect callbacks, exchanges authorization codes exactly
//! once, and manages per-grant session records with TTL expiry. State
//! changes are broadcast to subscribers as lifecycle events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  ConnectClient   │  Flow orchestration + callback dedup
//! └────────┬─────────┘
//!          │
//!          ├──► SessionStore       (per-grant records over TokenStorage)
//!          ├──► TokenStorage       (host-pluggable; memory/file built in)
//!          ├──► PopupDriver        (host-provided popup transport)
//!          ├──► CodeExchange       (optional custom backend exchange)
//!          └──► PKCE / redirect utilities
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use nylas_connect::{
//!     CallbackOutcome, ConnectClient, ConnectConfig, ConnectOptions, ConnectOutcome,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ConnectClient::new(ConnectConfig {
//!         client_id: "your_client_id".to_string(),
//!         redirect_uri: "https://app.example.com/auth/callback".to_string(),
//!         ..ConnectConfig::default()
//!     })?;
//!
//!     // Start an inline flow and send the user to the authorization URL.
//!     match client.connect(ConnectOptions::default()).await? {
//!         ConnectOutcome::Redirect(url) => println!("Open this URL: {url}"),
//!         ConnectOutcome::Session(session) => println!("Already signed in: {}", session.grant_id),
//!     }
//!
//!     // ... the user authorizes and lands back on the redirect URI ...
//!
//!     let callback_url = "https://app.example.com/auth/callback?code=...&state=...";
//!     if let CallbackOutcome::Session(session) = client.callback(callback_url).await? {
//!         println!("Signed in as grant {}", session.grant_id);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - **[`client`]**: the [`ConnectClient`] orchestrator
//! - **[`types`]**: configuration, options, and stored records
//! - **[`events`]**: lifecycle events and subscriptions
//! - **[`error`]**: the [`ConnectError`] taxonomy
//! - **[`pkce`]**: verifier/challenge/state generation
//! - **[`redirect`]**: authorization URLs and callback parsing
//! - **[`session`]**: per-grant session records
//! - **[`storage`]**: the [`TokenStorage`] contract and built-in backends
//! - **[`popup`]**: popup driver and opener relay contracts
//! - **[`traits`]**: custom exchange and related host seams
//! - **[`id_token`]**: identity-token claim decoding
//!
//! # Security Notes
//!
//! - **PKCE**: S256 challenges guard against authorization-code interception
//! - **State validation**: random per-flow state with a 15-minute TTL
//! - **Single-use codes**: callback deduplication exchanges each code at
//!   most once per client instance
//! - **No client secrets**: safe for public clients; confidential exchanges
//!   plug in through [`CodeExchange`]

pub mod client;
pub mod error;
pub mod events;
pub mod id_token;
pub mod pkce;
pub mod popup;
pub mod redirect;
pub mod session;
pub mod storage;
pub mod traits;
pub mod types;

pub use client::ConnectClient;
pub use error::{ConnectError, OAuthErrorCode};
pub use events::{
    ConnectEvent, EventSubscription, PopupCloseReason, ProfileSource, SignOutReason,
};
pub use id_token::decode_identity_claims;
pub use pkce::{derive_challenge, generate_state, ChallengePair};
pub use popup::{OpenerRelay, PopupDriver, PopupGeometry, PopupMessage};
pub use redirect::{
    build_auth_url, is_callback_url, normalize_api_url, parse_callback, strip_callback_params,
    AuthUrlParams, CallbackParams,
};
pub use session::{auth_state_key, token_key, SessionLookup, SessionStore};
pub use storage::{FileTokenStorage, MemoryTokenStorage, StorageError, TokenStorage};
pub use traits::{
    CodeExchange, CodeExchangeRequest, CodeExchangeResult, IdentityProviderToken, UrlHistory,
};
pub use types::{
    resolve_scopes, AuthUrl, CallbackOutcome, ConnectConfig, ConnectMethod, ConnectOptions,
    ConnectOutcome, ConnectionStatus, DefaultScopes, Environment, GrantInfo, Provider,
    SessionData, TokenResponse, TransactionState, AUTH_STATE_TTL_MS,
};
