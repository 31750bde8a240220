//! The host-facing vault session.

use std::sync::{Arc, Mutex};

use vaultkit_core::{
    session::KeyValueStore, HttpTransport, InitState, RecordRepository, SessionStore,
    VaultConfig, VaultInitializer, VaultTransport,
};

use crate::{
    error::VaultKitError,
    storage::{HostStore, SessionStorage},
    types::{BookmarkInput, BookmarkRecord, BookmarkUpdate, VaultSessionState},
};

#[derive(Debug, Default)]
struct Status {
    user_address: Option<String>,
    error: Option<vaultkit_core::VaultKitError>,
}

/// One user's vault, as seen by the host application.
///
/// The session remembers the last address passed to [`VaultSession::initialize`] and the last
/// failure, so the host can render [`VaultSession::state`] and offer a retry.
#[derive(Debug, uniffi::Object)]
pub struct VaultSession {
    initializer: VaultInitializer,
    records: RecordRepository,
    status: Mutex<Status>,
}

impl VaultSession {
    /// Creates a session over an explicit transport and store.
    #[must_use]
    pub fn with_transport(
        config: VaultConfig,
        transport: Arc<dyn VaultTransport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let sessions = SessionStore::with_ttl(store, config.session_ttl_seconds);
        let initializer = VaultInitializer::new(Arc::new(config), transport, sessions);
        let records = RecordRepository::new(initializer.clone());
        Self {
            initializer,
            records,
            status: Mutex::new(Status::default()),
        }
    }

    fn current_address(&self) -> Result<String, VaultKitError> {
        self.status
            .lock()
            .ok()
            .and_then(|status| status.user_address.clone())
            .ok_or_else(|| vaultkit_core::VaultKitError::MissingUserAddress.into())
    }

    fn record(&self, user_address: Option<&str>, error: Option<vaultkit_core::VaultKitError>) {
        if let Ok(mut status) = self.status.lock() {
            if let Some(address) = user_address {
                status.user_address = Some(address.to_string());
            }
            status.error = error;
        }
    }

    /// Remembers the failure of a record operation for [`VaultSession::state`].
    fn track<T>(&self, result: vaultkit_core::VaultKitResult<T>) -> Result<T, VaultKitError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                self.record(None, Some(err.clone()));
                Err(err.into())
            }
        }
    }
}

#[uniffi::export(async_runtime = "tokio")]
impl VaultSession {
    /// Creates a session from a JSON configuration and the host's storage.
    ///
    /// # Errors
    /// - `BROWSER_REQUIRED` if `storage` is absent.
    /// - `INVALID_CONFIG` if the configuration is rejected.
    #[uniffi::constructor]
    pub fn new(
        config_json: &str,
        storage: Option<Arc<dyn SessionStorage>>,
    ) -> Result<Self, VaultKitError> {
        let storage = storage.ok_or_else(|| vaultkit_core::VaultKitError::BrowserRequired {
            reason: "no session storage was provided".to_string(),
        })?;
        let config = VaultConfig::from_json(config_json)?;
        let transport = HttpTransport::from_config(&config)?;
        Ok(Self::with_transport(
            config,
            Arc::new(transport),
            Arc::new(HostStore(storage)),
        ))
    }

    /// Restores the vault of `user_address` from the persisted session, without network calls.
    ///
    /// Returns whether the vault is ready.
    ///
    /// # Errors
    /// `MISSING_USER_ADDRESS` or key configuration errors.
    pub fn restore(&self, user_address: &str) -> Result<bool, VaultKitError> {
        match self.initializer.restore(user_address) {
            Ok(handle) => {
                self.record(Some(user_address.trim()), None);
                Ok(handle.is_some())
            }
            Err(err) => {
                self.record(None, Some(err.clone()));
                Err(err.into())
            }
        }
    }

    /// Opens the vault of `user_address`, provisioning it if needed.
    ///
    /// # Errors
    /// Any initialization error. The failure is also reported by [`VaultSession::state`].
    pub async fn initialize(&self, user_address: &str) -> Result<(), VaultKitError> {
        if !user_address.trim().is_empty() {
            self.record(Some(user_address.trim()), None);
        }
        match self.initializer.initialize(user_address).await {
            Ok(_) => {
                self.record(None, None);
                Ok(())
            }
            Err(err) => {
                self.record(None, Some(err.clone()));
                Err(err.into())
            }
        }
    }

    /// Runs initialization again for the last address.
    ///
    /// # Errors
    /// `MISSING_USER_ADDRESS` if no address was given before, otherwise as
    /// [`VaultSession::initialize`].
    pub async fn retry_initialize(&self) -> Result<(), VaultKitError> {
        let address = self.current_address()?;
        self.initialize(&address).await
    }

    /// Stores a bookmark and returns its id.
    ///
    /// # Errors
    /// `VAULT_NOT_INITIALIZED` or `CREATE_FAILED`.
    pub async fn create_bookmark(&self, input: BookmarkInput) -> Result<String, VaultKitError> {
        let address = self.current_address()?;
        let result = self.records.create(&address, input.into()).await;
        self.track(result)
    }

    /// Lists the user's bookmarks.
    ///
    /// # Errors
    /// `VAULT_NOT_INITIALIZED` or `READ_FAILED`.
    pub async fn read_bookmarks(&self) -> Result<Vec<BookmarkRecord>, VaultKitError> {
        let address = self.current_address()?;
        let result = self.records.list(&address).await;
        self.track(result)
            .map(|bookmarks| bookmarks.into_iter().map(Into::into).collect())
    }

    /// Editing stored bookmarks is not supported.
    ///
    /// # Errors
    /// Always `UPDATE_NOT_IMPLEMENTED`.
    pub fn update_bookmark(&self, id: &str, update: BookmarkUpdate) -> Result<(), VaultKitError> {
        let address = self.current_address().unwrap_or_default();
        let result = self.records.update(&address, id, &update.into());
        self.track(result)
    }

    /// Deletes a bookmark by id.
    ///
    /// # Errors
    /// `VAULT_NOT_INITIALIZED`, `BOOKMARK_NOT_FOUND` or `DELETE_FAILED`.
    pub async fn delete_bookmark(&self, id: &str) -> Result<(), VaultKitError> {
        let address = self.current_address()?;
        let result = self.records.delete(&address, id).await;
        self.track(result)
    }

    /// Forgets the current vault: cached handle, persisted session and last error.
    pub fn clear_vault(&self) {
        if let Ok(address) = self.current_address() {
            self.initializer.clear(&address);
        }
        if let Ok(mut status) = self.status.lock() {
            *status = Status::default();
        }
    }

    /// The current state for rendering.
    #[must_use]
    pub fn state(&self) -> VaultSessionState {
        let (address, error) = self
            .status
            .lock()
            .map(|status| (status.user_address.clone(), status.error.clone()))
            .unwrap_or_default();
        let init = address
            .as_deref()
            .map_or(InitState::Idle, |address| self.initializer.state(address));

        VaultSessionState {
            is_initialized: init == InitState::Ready,
            is_initializing: init == InitState::Initializing,
            error: error.as_ref().map(|err| err.user_message().to_string()),
            error_code: error.as_ref().map(|err| err.kind().to_string()),
            can_retry: error
                .as_ref()
                .is_some_and(vaultkit_core::VaultKitError::is_retryable),
            session: self.initializer.sessions().load().map(Into::into),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use vaultkit_core::{transport::VaultOperation, MemoryVault, RemoteError};

    use super::*;

    const CONFIG: &str = r#"{
        "base_url": "https://vault.example.org",
        "builder_private_key": "0x3333333333333333333333333333333333333333333333333333333333333333"
    }"#;

    #[derive(Default)]
    struct HostMap(Mutex<HashMap<String, String>>);

    impl SessionStorage for HostMap {
        fn get_item(&self, key: String) -> Option<String> {
            self.0.lock().unwrap().get(&key).cloned()
        }

        fn set_item(&self, key: String, value: String) -> bool {
            self.0.lock().unwrap().insert(key, value);
            true
        }

        fn remove_item(&self, key: String) {
            self.0.lock().unwrap().remove(&key);
        }
    }

    fn session(vault: Arc<MemoryVault>, host: Arc<HostMap>) -> VaultSession {
        VaultSession::with_transport(
            VaultConfig::from_json(CONFIG).unwrap(),
            vault,
            Arc::new(HostStore(host)),
        )
    }

    #[test]
    fn test_missing_storage_is_browser_required() {
        let err = VaultSession::new(CONFIG, None).unwrap_err();
        assert_eq!(err.code(), vaultkit_core::ErrorKind::BrowserRequired);

        let host: Arc<dyn SessionStorage> = Arc::new(HostMap::default());
        assert!(VaultSession::new(CONFIG, Some(host)).is_ok());
    }

    #[tokio::test]
    async fn test_bookmark_lifecycle() {
        let vault = Arc::new(MemoryVault::new());
        let host = Arc::new(HostMap::default());
        let session = session(vault, host.clone());

        assert!(!session.state().is_initialized);
        session.initialize("addr1").await.unwrap();
        let state = session.state();
        assert!(state.is_initialized);
        assert_eq!(state.session.unwrap().user_address, "addr1");
        assert!(host.get_item("vaultkit.session".to_string()).is_some());

        let id = session
            .create_bookmark(BookmarkInput {
                title: "T".to_string(),
                url: "https://example.com".to_string(),
                ..BookmarkInput::default()
            })
            .await
            .unwrap();
        let bookmarks = session.read_bookmarks().await.unwrap();
        assert_eq!(bookmarks.len(), 1);
        assert_eq!(bookmarks[0].id, id);

        let err = session
            .update_bookmark(&id, BookmarkUpdate::default())
            .unwrap_err();
        assert_eq!(err.code(), vaultkit_core::ErrorKind::UpdateNotImplemented);
        assert!(!session.state().can_retry);

        session.delete_bookmark(&id).await.unwrap();
        assert!(session.read_bookmarks().await.unwrap().is_empty());

        session.clear_vault();
        let state = session.state();
        assert!(!state.is_initialized);
        assert!(state.session.is_none());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_failure_offers_retry() {
        let vault = Arc::new(MemoryVault::new());
        vault.fail_next(
            VaultOperation::CreateRecord,
            RemoteError::Rejected {
                status: Some(500),
                message: "boom".to_string(),
            },
        );
        let session = session(vault, Arc::new(HostMap::default()));
        session.initialize("addr1").await.unwrap();

        let input = BookmarkInput {
            title: "T".to_string(),
            url: "https://example.com".to_string(),
            ..BookmarkInput::default()
        };
        assert!(session.create_bookmark(input.clone()).await.is_err());
        let state = session.state();
        assert!(state.can_retry);
        assert_eq!(state.error_code.as_deref(), Some("CREATE_FAILED"));
        assert!(state.is_initialized);

        assert!(session.create_bookmark(input).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscription_lapse_has_its_own_message() {
        let vault = Arc::new(MemoryVault::new());
        vault.set_subscription_expired(true);
        let session = session(vault.clone(), Arc::new(HostMap::default()));

        let err = session.initialize("addr1").await.unwrap_err();
        assert_eq!(err.code(), vaultkit_core::ErrorKind::SubscriptionExpired);
        let state = session.state();
        assert!(!state.is_initialized);
        assert!(!state.can_retry);
        assert!(state.error.unwrap().contains("subscription"));

        vault.set_subscription_expired(false);
        session.retry_initialize().await.unwrap();
        assert!(session.state().is_initialized);
    }

    #[tokio::test]
    async fn test_restore_after_reload() {
        let vault = Arc::new(MemoryVault::new());
        let host = Arc::new(HostMap::default());
        session(vault.clone(), host.clone())
            .initialize("addr1")
            .await
            .unwrap();

        let reloaded = session(vault.clone(), host.clone());
        assert!(reloaded.restore("addr1").unwrap());
        assert!(reloaded.state().is_initialized);

        let other = session(vault, host.clone());
        assert!(!other.restore("addr2").unwrap());
        assert!(!other.state().is_initialized);
        assert!(host.get_item("vaultkit.session".to_string()).is_none());
    }
}
