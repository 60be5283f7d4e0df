//! Pluggable key-value storage for sessions and transaction state
//!
//! Hosts provide any backend implementing [`TokenStorage`]; two are built in.
//! [`MemoryTokenStorage`] holds values for the process lifetime and backs
//! non-persistent sessions. [`FileTokenStorage`] persists a JSON document on
//! disk and is the durable default for transaction state and sessions when
//! persistence is enabled.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

/// Namespace prefix applied by the durable backend so a shared store can
/// hold other applications' keys alongside ours.
pub const STORAGE_PREFIX: &str = "@nylas/connect:";

/// Storage backend failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("storage {operation} failed for key {key}: {message}")]
pub struct StorageError {
    /// The operation that failed (`get`, `set`, `remove`, `clear`).
    pub operation: String,
    /// The key involved, empty for `clear`.
    pub key: String,
    /// Backend-specific detail.
    pub message: String,
}

impl StorageError {
    /// Build a storage error for one operation/key pair.
    pub fn new(
        operation: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self { operation: operation.into(), key: key.into(), message: message.into() }
    }
}

/// Async key-value storage contract.
///
/// Implementations must be safe for concurrent use; the client issues
/// overlapping reads and writes from independent flows.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Store a value under a key, replacing any existing value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Retrieve a value, `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Remove every key this backend holds for the client.
    async fn clear(&self) -> Result<(), StorageError>;
}

/// Process-lifetime in-memory storage.
///
/// The fallback when no durable backend is configured, and the forced
/// session backend when token persistence is disabled.
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store behind an `Arc`, ready to share.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.entries.lock().clear();
        Ok(())
    }
}

/// Durable storage backed by one JSON document on disk.
///
/// Keys are namespaced with [`STORAGE_PREFIX`] inside the document, and
/// `clear` removes only namespaced keys, so the file can be shared with
/// other writers. Writes go through a temp file and rename.
#[derive(Debug)]
pub struct FileTokenStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles on the backing file.
    io_lock: AsyncMutex<()>,
}

impl FileTokenStorage {
    /// Create a store persisting to `path`. The file is created on first
    /// write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), io_lock: AsyncMutex::new(()) }
    }

    fn namespaced(key: &str) -> String {
        format!("{STORAGE_PREFIX}{key}")
    }

    async fn load(&self) -> Result<HashMap<String, String>, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents).map_err(|err| {
                StorageError::new("get", "", format!("corrupt storage file: {err}"))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(StorageError::new("get", "", err.to_string())),
        }
    }

    async fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let contents = serde_json::to_string(entries)
            .map_err(|err| StorageError::new("set", "", err.to_string()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::new("set", "", err.to_string()))?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|err| StorageError::new("set", "", err.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| StorageError::new("set", "", err.to_string()))
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.io_lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(Self::namespaced(key), value.to_string());
        self.persist(&entries).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.io_lock.lock().await;
        let entries = self.load().await?;
        Ok(entries.get(&Self::namespaced(key)).cloned())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.io_lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(&Self::namespaced(key)).is_some() {
            self.persist(&entries).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.io_lock.lock().await;
        let mut entries = self.load().await?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(STORAGE_PREFIX));
        if entries.len() != before {
            self.persist(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the built-in storage backends.
    use super::*;

    /// Validates `MemoryTokenStorage` behavior for the basic round-trip
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms set/get round-trips a value.
    /// - Confirms remove deletes and clear empties the store.
    /// - Confirms removing an absent key succeeds.
    #[tokio::test]
    async fn test_memory_round_trip() {
        let store = MemoryTokenStorage::new();
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.remove("a").await.unwrap();

        store.clear().await.unwrap();
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    /// Validates `FileTokenStorage` behavior for the persistence scenario.
    ///
    /// Assertions:
    /// - Confirms values survive across store instances on the same path.
    /// - Confirms a missing file reads as empty.
    #[tokio::test]
    async fn test_file_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileTokenStorage::new(&path);
        assert_eq!(store.get("token_default").await.unwrap(), None);
        store.set("token_default", "{\"grantId\":\"g1\"}").await.unwrap();
        drop(store);

        let reopened = FileTokenStorage::new(&path);
        assert_eq!(
            reopened.get("token_default").await.unwrap().as_deref(),
            Some("{\"grantId\":\"g1\"}")
        );
    }

    /// Validates `FileTokenStorage::clear` behavior for the shared-namespace
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms clear removes only prefixed keys, leaving foreign keys in
    ///   the document untouched.
    #[tokio::test]
    async fn test_file_clear_respects_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        // Seed a document with a foreign key alongside ours.
        let mut doc = HashMap::new();
        doc.insert("other-app:setting".to_string(), "keep".to_string());
        tokio::fs::write(&path, serde_json::to_string(&doc).unwrap()).await.unwrap();

        let store = FileTokenStorage::new(&path);
        store.set("token_g1", "session").await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.get("token_g1").await.unwrap(), None);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: HashMap<String, String> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.get("other-app:setting").map(String::as_str), Some("keep"));
    }

    /// Validates `FileTokenStorage` behavior for the corrupt-file scenario.
    ///
    /// Assertions:
    /// - Confirms a non-JSON backing file surfaces a `StorageError` rather
    ///   than silently wiping data.
    #[tokio::test]
    async fn test_file_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let store = FileTokenStorage::new(&path);
        let err = store.get("token_default").await.unwrap_err();
        assert!(err.message.contains("corrupt"));
    }
}
