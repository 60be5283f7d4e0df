//! Authentication lifecycle events and the subscriber registry
//!
//! Every observable state change is broadcast as a [`ConnectEvent`] to all
//! registered listeners, alongside the session the event concerns (when one
//! exists). Errors travel both channels: emitted here AND returned from the
//! failing operation.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::ConnectError;
use crate::types::{ConnectMethod, ConnectionStatus, GrantInfo, SessionData};

/// Why a popup window closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupCloseReason {
    /// The flow finished and produced a session.
    Completed,
    /// The user closed the window or the wait timed out.
    Cancelled,
    /// The flow failed.
    Error,
}

/// Why a grant was signed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// `logout` was called.
    UserInitiated,
    /// The session reached its expiry.
    Expired,
    /// The stored session was unreadable.
    Invalid,
}

/// Where a grant profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSource {
    /// Decoded from identity-token claims.
    Token,
    /// Fetched from the API.
    Api,
}

/// A lifecycle event with its payload.
///
/// Variants marked *reserved* are part of the public contract but are not
/// emitted by any current code path.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ConnectEvent {
    /// A connect flow began.
    ConnectStarted {
        /// Flow method.
        method: ConnectMethod,
        /// Target provider, when named.
        provider: Option<String>,
        /// Resolved scopes for the flow.
        scopes: Vec<String>,
    },
    /// An inline flow produced its authorization URL.
    ConnectRedirect {
        /// The authorization URL.
        url: String,
        /// Target provider, when named.
        provider: Option<String>,
    },
    /// A popup window opened for the flow.
    ConnectPopupOpened {
        /// The authorization URL loaded in the popup.
        url: String,
        /// Target provider, when named.
        provider: Option<String>,
    },
    /// The popup window closed.
    ConnectPopupClosed {
        /// Why it closed.
        reason: PopupCloseReason,
    },
    /// A callback URL was received and parsed.
    ConnectCallbackReceived {
        /// Authorization code, when present.
        code: Option<String>,
        /// Echoed state, when present.
        state: Option<String>,
        /// OAuth error code, when present.
        error: Option<String>,
    },
    /// Authentication completed.
    ConnectSuccess {
        /// The new grant.
        grant_id: String,
        /// Provider of the grant.
        provider: String,
        /// Scopes granted.
        scopes: Vec<String>,
    },
    /// A flow failed.
    ConnectError {
        /// The failure.
        error: ConnectError,
        /// Which step failed.
        step: String,
    },
    /// A flow was cancelled by the user.
    ConnectCancelled {
        /// Cancellation detail.
        reason: String,
    },
    /// A grant became signed in.
    SignedIn {
        /// The session.
        session: SessionData,
        /// False when the session was restored rather than newly minted.
        is_new_login: bool,
    },
    /// A grant signed out.
    SignedOut {
        /// The grant, `None` when all grants were cleared.
        grant_id: Option<String>,
        /// Why it signed out.
        reason: SignOutReason,
    },
    /// An existing valid session short-circuited a flow.
    SessionRestored {
        /// The restored session.
        session: SessionData,
        /// Whether it came from persistent storage.
        from_storage: bool,
    },
    /// A stored session was found expired on read.
    SessionExpired {
        /// The expired grant.
        grant_id: String,
        /// Its expiry, ms since the Unix epoch.
        expires_at: i64,
    },
    /// A stored session was unreadable.
    SessionInvalid {
        /// The grant key that failed.
        grant_id: String,
        /// What was wrong.
        reason: String,
    },
    /// Reserved: an access token was refreshed.
    TokenRefreshed {
        /// The grant.
        grant_id: String,
        /// New expiry, ms since the Unix epoch.
        new_expires_at: i64,
    },
    /// Reserved: a token refresh failed.
    TokenRefreshError {
        /// The grant.
        grant_id: String,
        /// The failure.
        error: ConnectError,
    },
    /// Token introspection rejected a token.
    TokenValidationError {
        /// The grant whose token failed, empty when unknown.
        grant_id: String,
        /// The failure.
        error: ConnectError,
    },
    /// Reserved: grant profile information changed.
    GrantUpdated {
        /// The updated profile.
        grant_info: GrantInfo,
    },
    /// A grant profile was loaded.
    GrantProfileLoaded {
        /// The profile.
        grant_info: GrantInfo,
        /// Where it came from.
        source: ProfileSource,
    },
    /// Reserved: a grant's connection status changed.
    ConnectionStatusChanged {
        /// New status.
        status: ConnectionStatus,
        /// Previous status.
        previous_status: ConnectionStatus,
        /// The grant, when known.
        grant_id: Option<String>,
    },
    /// An HTTP operation failed.
    NetworkError {
        /// The operation (`token_exchange`, `token_validation`, ...).
        operation: String,
        /// The failure.
        error: ConnectError,
    },
    /// A storage operation failed.
    StorageError {
        /// The operation that failed.
        operation: String,
        /// The key involved.
        key: String,
        /// Backend detail.
        message: String,
    },
    /// All stored auth data was cleared.
    StorageCleared {
        /// Why.
        reason: String,
    },
}

impl ConnectEvent {
    /// The event's stable SCREAMING_SNAKE_CASE name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectStarted { .. } => "CONNECT_STARTED",
            Self::ConnectRedirect { .. } => "CONNECT_REDIRECT",
            Self::ConnectPopupOpened { .. } => "CONNECT_POPUP_OPENED",
            Self::ConnectPopupClosed { .. } => "CONNECT_POPUP_CLOSED",
            Self::ConnectCallbackReceived { .. } => "CONNECT_CALLBACK_RECEIVED",
            Self::ConnectSuccess { .. } => "CONNECT_SUCCESS",
            Self::ConnectError { .. } => "CONNECT_ERROR",
            Self::ConnectCancelled { .. } => "CONNECT_CANCELLED",
            Self::SignedIn { .. } => "SIGNED_IN",
            Self::SignedOut { .. } => "SIGNED_OUT",
            Self::SessionRestored { .. } => "SESSION_RESTORED",
            Self::SessionExpired { .. } => "SESSION_EXPIRED",
            Self::SessionInvalid { .. } => "SESSION_INVALID",
            Self::TokenRefreshed { .. } => "TOKEN_REFRESHED",
            Self::TokenRefreshError { .. } => "TOKEN_REFRESH_ERROR",
            Self::TokenValidationError { .. } => "TOKEN_VALIDATION_ERROR",
            Self::GrantUpdated { .. } => "GRANT_UPDATED",
            Self::GrantProfileLoaded { .. } => "GRANT_PROFILE_LOADED",
            Self::ConnectionStatusChanged { .. } => "CONNECTION_STATUS_CHANGED",
            Self::NetworkError { .. } => "NETWORK_ERROR",
            Self::StorageError { .. } => "STORAGE_ERROR",
            Self::StorageCleared { .. } => "STORAGE_CLEARED",
        }
    }
}

/// Listener callback: receives the event and the session it concerns.
pub type ConnectListener = Arc<dyn Fn(&ConnectEvent, Option<&SessionData>) + Send + Sync>;

/// Multi-subscriber listener registry.
///
/// Listeners run synchronously in registration order. A panicking listener
/// is contained and logged; remaining listeners still run.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Arc<Mutex<HashMap<u64, ConnectListener>>>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a listener; the returned subscription removes it.
    pub(crate) fn subscribe(&self, listener: ConnectListener) -> EventSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, listener);
        EventSubscription { id, listeners: Arc::downgrade(&self.listeners) }
    }

    /// Broadcast an event to every listener.
    pub(crate) fn emit(&self, event: &ConnectEvent, session: Option<&SessionData>) {
        // Snapshot under the lock so listeners can subscribe/unsubscribe
        // from inside a callback without deadlocking.
        let snapshot: Vec<ConnectListener> = {
            let listeners = self.listeners.lock();
            let mut ordered: Vec<(u64, ConnectListener)> =
                listeners.iter().map(|(id, l)| (*id, Arc::clone(l))).collect();
            ordered.sort_by_key(|(id, _)| *id);
            ordered.into_iter().map(|(_, l)| l).collect()
        };

        for listener in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(event, session)));
            if outcome.is_err() {
                tracing::error!(event = event.kind(), "listener panicked during event dispatch");
            }
        }
    }
}

/// Handle for removing a registered listener.
#[derive(Debug)]
pub struct EventSubscription {
    id: u64,
    listeners: Weak<Mutex<HashMap<u64, ConnectListener>>>,
}

impl EventSubscription {
    /// Remove the listener. Safe to call after the client is dropped.
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().remove(&self.id);
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}
