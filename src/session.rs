//! Per-grant session records on top of [`TokenStorage`]
//!
//! Sessions are stored as one JSON document per grant under `token_<grantId>`,
//! with `token_default` aliasing the first grant that signed in. Reads are
//! self-healing: expired or unreadable records are deleted on the spot and
//! reported through the lookup result so the client can emit the right
//! events.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::storage::{StorageError, TokenStorage};
use crate::types::SessionData;

/// Storage key for a grant's session, or the default alias.
#[must_use]
pub fn token_key(grant_id: Option<&str>) -> String {
    match grant_id {
        Some(id) => format!("token_{id}"),
        None => "token_default".to_string(),
    }
}

/// Storage key for a client's pending transaction state.
#[must_use]
pub fn auth_state_key(client_id: &str) -> String {
    format!("nylas_auth_state_{client_id}")
}

/// Outcome of a session read.
#[derive(Debug, Clone)]
pub enum SessionLookup {
    /// No record under the key.
    Missing,
    /// The record existed but could not be read; it has been deleted.
    Corrupt {
        /// The storage key that failed.
        key: String,
        /// What went wrong.
        message: String,
    },
    /// The record existed but its expiry has passed; it has been deleted.
    Expired(SessionData),
    /// A valid session.
    Active(SessionData),
}

/// Session record store.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn TokenStorage>,
}

impl SessionStore {
    /// Create a store over a storage backend.
    #[must_use]
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        Self { storage }
    }

    /// Read a grant's session, deleting it when expired or unreadable.
    pub async fn load(&self, grant_id: Option<&str>) -> SessionLookup {
        let key = token_key(grant_id);
        let raw = match self.storage.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return SessionLookup::Missing,
            Err(err) => {
                let _ = self.storage.remove(&key).await;
                return SessionLookup::Corrupt { key, message: err.to_string() };
            }
        };

        let session: SessionData = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(err) => {
                let _ = self.storage.remove(&key).await;
                return SessionLookup::Corrupt { key, message: err.to_string() };
            }
        };

        if !session.is_valid(Utc::now().timestamp_millis()) {
            info!(grant_id = %session.grant_id, "session expired, removing from storage");
            let _ = self.storage.remove(&key).await;
            return SessionLookup::Expired(session);
        }

        SessionLookup::Active(session)
    }

    /// Persist a session under its grant key, aliasing it as the default
    /// only when no default exists yet.
    ///
    /// # Errors
    /// Returns the backend error when a write fails.
    pub async fn store(&self, session: &SessionData) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(session)
            .map_err(|err| StorageError::new("set", token_key(None), err.to_string()))?;

        let grant_key = token_key(Some(&session.grant_id));
        self.storage.set(&grant_key, &serialized).await?;

        let default_key = token_key(None);
        if self.storage.get(&default_key).await?.is_none() {
            debug!(grant_id = %session.grant_id, "storing session as default grant");
            self.storage.set(&default_key, &serialized).await?;
        }
        Ok(())
    }

    /// Remove one grant's session record.
    ///
    /// # Errors
    /// Returns the backend error when the removal fails.
    pub async fn remove(&self, grant_id: Option<&str>) -> Result<(), StorageError> {
        self.storage.remove(&token_key(grant_id)).await
    }

    /// Remove every record the backend holds.
    ///
    /// # Errors
    /// Returns the backend error when the clear fails.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.storage.clear().await
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}
