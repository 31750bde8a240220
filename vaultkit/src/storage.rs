use std::sync::Arc;

use vaultkit_core::session::{KeyValueStore, StoreError};

/// Key-value storage provided by the host, such as browser local storage.
///
/// Implementations must not throw: a failed write reports `false` and a failed read reports
/// nothing. The vault treats both as a missing session.
#[uniffi::export(with_foreign)]
pub trait SessionStorage: Send + Sync {
    /// Returns the value stored under `key`.
    fn get_item(&self, key: String) -> Option<String>;

    /// Stores `value` under `key`. Returns `false` if the value could not be stored.
    fn set_item(&self, key: String, value: String) -> bool;

    /// Removes `key`.
    fn remove_item(&self, key: String);
}

/// Adapts a host [`SessionStorage`] to the orchestrator's store.
pub(crate) struct HostStore(pub(crate) Arc<dyn SessionStorage>);

impl KeyValueStore for HostStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.0.get_item(key.to_string()))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.0.set_item(key.to_string(), value.to_string()) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "host storage rejected the write".to_string(),
            ))
        }
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.0.remove_item(key.to_string());
        Ok(())
    }
}
