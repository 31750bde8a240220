//! Common test utilities shared across integration tests.
#![allow(missing_docs)]

use std::sync::Arc;

use secrecy::SecretString;
use vaultkit_core::{
    session::{KeyValueStore, MemoryKeyValueStore},
    MemoryVault, RecordRepository, SessionStore, VaultConfig, VaultInitializer,
};

pub const BUILDER_KEY: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

/// One app instance: shared vault, shared host storage, fresh in-memory registry.
pub struct Harness {
    pub vault: Arc<MemoryVault>,
    pub storage: Arc<MemoryKeyValueStore>,
    pub initializer: VaultInitializer,
    pub records: RecordRepository,
}

pub fn config() -> VaultConfig {
    VaultConfig::new(
        "https://vault.example.org",
        Some(SecretString::from(BUILDER_KEY.to_string())),
    )
}

impl Harness {
    pub fn new() -> Self {
        Self::with_vault(Arc::new(MemoryVault::new()))
    }

    pub fn with_vault(vault: Arc<MemoryVault>) -> Self {
        Self::build(vault, Arc::new(MemoryKeyValueStore::new()))
    }

    /// Simulates a page reload: same vault and storage, nothing cached in memory.
    pub fn reload(&self) -> Self {
        Self::build(self.vault.clone(), self.storage.clone())
    }

    fn build(vault: Arc<MemoryVault>, storage: Arc<MemoryKeyValueStore>) -> Self {
        let sessions = SessionStore::new(storage.clone() as Arc<dyn KeyValueStore>);
        let initializer = VaultInitializer::new(Arc::new(config()), vault.clone(), sessions);
        let records = RecordRepository::new(initializer.clone());
        Self {
            vault,
            storage,
            initializer,
            records,
        }
    }
}
