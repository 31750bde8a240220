//! Persisted vault session.
//!
//! One JSON record under [`SESSION_STORAGE_KEY`] remembers which collection a user address was
//! provisioned with, so a reload within [`SESSION_TTL_SECONDS`] can rebuild the vault handle
//! without touching the network. The session never leaves the device.

use std::{
    collections::HashMap,
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::unix_now;

/// Key the session record is stored under.
pub const SESSION_STORAGE_KEY: &str = "vaultkit.session";

/// How long a session stays valid after initialization.
pub const SESSION_TTL_SECONDS: u64 = 86_400;

/// Errors raised by a [`KeyValueStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be used at all (quota exhausted, disabled, poisoned).
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    /// A read or write failed.
    #[error("session store I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Host-provided string key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local store, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

impl KeyValueStore for MemoryKeyValueStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().map_err(poisoned)?.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.write().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

/// Stores each key as a file in a directory. Writes go through a temporary file and a rename so
/// a crash never leaves a half-written value.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    /// Uses `root` as the storage directory, creating it if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The storage directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{file_name}.json"))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// The persisted session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Wallet address the vault was opened for.
    pub user_address: String,
    /// Collection holding the user's records.
    pub collection_id: String,
    /// DID of the builder that provisioned the session.
    pub builder_identity: String,
    /// Whether initialization completed.
    pub initialized: bool,
    /// When the session was created, unix seconds.
    pub created_at: u64,
}

impl Session {
    /// A session for a just-completed initialization.
    #[must_use]
    pub fn new(
        user_address: impl Into<String>,
        collection_id: impl Into<String>,
        builder_identity: impl Into<String>,
    ) -> Self {
        Self {
            user_address: user_address.into(),
            collection_id: collection_id.into(),
            builder_identity: builder_identity.into(),
            initialized: true,
            created_at: unix_now(),
        }
    }
}

/// Reads and writes the single session record.
///
/// Storage failures never escape: a session that cannot be persisted only costs a
/// re-provisioning on the next reload.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    ttl_seconds: u64,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Wraps `store` with the default TTL.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(store, SESSION_TTL_SECONDS)
    }

    /// Wraps `store` with a custom TTL.
    #[must_use]
    pub fn with_ttl(store: Arc<dyn KeyValueStore>, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    /// Session lifetime.
    #[must_use]
    pub const fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Persists `session`, replacing any previous one.
    pub fn save(&self, session: &Session) {
        let encoded = match serde_json::to_string(session) {
            Ok(encoded) => encoded,
            Err(err) => {
                log::warn!("failed to encode vault session: {err}");
                return;
            }
        };
        if let Err(err) = self.store.write(SESSION_STORAGE_KEY, &encoded) {
            log::warn!("failed to persist vault session: {err}");
        }
    }

    /// Loads the persisted session. Missing, unreadable and malformed records all read as `None`.
    #[must_use]
    pub fn load(&self) -> Option<Session> {
        let raw = match self.store.read(SESSION_STORAGE_KEY) {
            Ok(raw) => raw?,
            Err(err) => {
                log::warn!("failed to read vault session: {err}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(err) => {
                log::debug!("ignoring malformed vault session: {err}");
                None
            }
        }
    }

    /// Removes the persisted session.
    pub fn clear(&self) {
        if let Err(err) = self.store.remove(SESSION_STORAGE_KEY) {
            log::warn!("failed to clear vault session: {err}");
        }
    }

    /// Removes the persisted session only if it belongs to `user_address`.
    pub fn clear_for(&self, user_address: &str) {
        if self
            .load()
            .is_some_and(|session| session.user_address == user_address)
        {
            self.clear();
        }
    }

    /// Whether `session` is initialized and younger than the TTL.
    #[must_use]
    pub fn is_valid(&self, session: &Session) -> bool {
        self.is_valid_at(session, unix_now())
    }

    /// Clock-injected form of [`SessionStore::is_valid`].
    #[must_use]
    pub const fn is_valid_at(&self, session: &Session, now: u64) -> bool {
        session.initialized && now.saturating_sub(session.created_at) < self.ttl_seconds
    }

    /// Returns the persisted session if it is valid and belongs to `user_address`.
    ///
    /// An expired session, or one for another address, is cleared.
    #[must_use]
    pub fn load_valid_for(&self, user_address: &str, now: u64) -> Option<Session> {
        let session = self.load()?;
        if session.user_address != user_address {
            log::info!("clearing vault session that belongs to another address");
            self.clear();
            return None;
        }
        if !self.is_valid_at(&session, now) {
            log::info!("clearing expired vault session");
            self.clear();
            return None;
        }
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn read(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("disabled".to_string()))
        }

        fn write(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("quota exceeded".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disabled".to_string()))
        }
    }

    fn session(created_at: u64) -> Session {
        Session {
            user_address: "addr1".to_string(),
            collection_id: "c1".to_string(),
            builder_identity: "did:vault:00".to_string(),
            initialized: true,
            created_at,
        }
    }

    fn memory_store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryKeyValueStore::new()))
    }

    #[test_case(0, true ; "fresh")]
    #[test_case(86_399, true ; "just inside")]
    #[test_case(86_400, false ; "at ttl")]
    #[test_case(86_401, false ; "past ttl")]
    fn test_validity_window(age: u64, expected: bool) {
        let now = 1_000_000;
        assert_eq!(memory_store().is_valid_at(&session(now - age), now), expected);
    }

    #[test]
    fn test_clock_behind_creation_counts_as_fresh() {
        assert!(memory_store().is_valid_at(&session(1_000_000), 0));
    }

    #[test]
    fn test_uninitialized_is_invalid() {
        let store = memory_store();
        let mut session = session(unix_now());
        session.initialized = false;
        assert!(!store.is_valid(&session));
    }

    #[test]
    fn test_json_layout_is_camel_case() {
        let value = serde_json::to_value(session(42)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "userAddress": "addr1",
                "collectionId": "c1",
                "builderIdentity": "did:vault:00",
                "initialized": true,
                "createdAt": 42,
            })
        );
    }

    #[test]
    fn test_malformed_record_reads_as_absent() {
        let backing = Arc::new(MemoryKeyValueStore::new());
        backing.write(SESSION_STORAGE_KEY, "{not json").unwrap();
        assert_eq!(SessionStore::new(backing).load(), None);
    }

    #[test]
    fn test_failures_are_swallowed() {
        let store = SessionStore::new(Arc::new(BrokenStore));
        store.save(&session(1));
        assert_eq!(store.load(), None);
        store.clear();
    }

    #[test]
    fn test_load_valid_for_clears_foreign_and_expired() {
        let store = memory_store();
        let now = 1_000_000;

        store.save(&session(now));
        assert_eq!(store.load_valid_for("addr2", now), None);
        assert_eq!(store.load(), None);

        store.save(&session(now - 86_401));
        assert_eq!(store.load_valid_for("addr1", now), None);
        assert_eq!(store.load(), None);

        store.save(&session(now - 10));
        assert_eq!(store.load_valid_for("addr1", now), Some(session(now - 10)));
    }

    #[test]
    fn test_clear_for_keeps_other_address() {
        let store = memory_store();
        store.save(&session(1));
        store.clear_for("addr2");
        assert!(store.load().is_some());
        store.clear_for("addr1");
        assert!(store.load().is_none());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyValueStore::new(dir.path().join("state")).unwrap();
        assert_eq!(store.read(SESSION_STORAGE_KEY).unwrap(), None);

        store.write(SESSION_STORAGE_KEY, "one").unwrap();
        store.write(SESSION_STORAGE_KEY, "two").unwrap();

        let reopened = FileKeyValueStore::new(store.root()).unwrap();
        assert_eq!(
            reopened.read(SESSION_STORAGE_KEY).unwrap().as_deref(),
            Some("two")
        );
        reopened.remove(SESSION_STORAGE_KEY).unwrap();
        reopened.remove(SESSION_STORAGE_KEY).unwrap();
        assert_eq!(reopened.read(SESSION_STORAGE_KEY).unwrap(), None);
    }
}
