//! Integration tests for session handling.

mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use common::Harness;
use futures::future::join_all;
use serde_json::Value;
use vaultkit_core::{
    session::{KeyValueStore, MemoryKeyValueStore, SESSION_STORAGE_KEY},
    transport::{
        BuilderRegistration, CollectionSummary, CreateCollectionRequest, CreateRecordRequest,
        RecordReference, VaultOperation,
    },
    ErrorKind, InitState, MemoryVault, NewBookmark, RemoteError, Session, SessionStore, Token,
    VaultInitializer, VaultTransport,
};

/// Forwards to a [`MemoryVault`] and records the order in which calls complete.
struct RecordingVault {
    vault: MemoryVault,
    log: Mutex<Vec<VaultOperation>>,
}

impl RecordingVault {
    fn new(vault: MemoryVault) -> Self {
        Self {
            vault,
            log: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, operation: VaultOperation) {
        self.log.lock().unwrap().push(operation);
    }

    fn log(&self) -> Vec<VaultOperation> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl VaultTransport for RecordingVault {
    async fn register(&self, registration: &BuilderRegistration) -> Result<(), RemoteError> {
        let result = self.vault.register(registration).await;
        self.record(VaultOperation::Register);
        result
    }

    async fn list_collections(
        &self,
        token: &Token,
    ) -> Result<Vec<CollectionSummary>, RemoteError> {
        let result = self.vault.list_collections(token).await;
        self.record(VaultOperation::ListCollections);
        result
    }

    async fn create_collection(
        &self,
        token: &Token,
        request: &CreateCollectionRequest,
    ) -> Result<(), RemoteError> {
        let result = self.vault.create_collection(token, request).await;
        self.record(VaultOperation::CreateCollection);
        result
    }

    async fn create_record(
        &self,
        token: &Token,
        request: &CreateRecordRequest,
    ) -> Result<String, RemoteError> {
        let result = self.vault.create_record(token, request).await;
        self.record(VaultOperation::CreateRecord);
        result
    }

    async fn list_record_references(
        &self,
        token: &Token,
        collection: Option<&str>,
    ) -> Result<Vec<RecordReference>, RemoteError> {
        let result = self.vault.list_record_references(token, collection).await;
        self.record(VaultOperation::ListRecordReferences);
        result
    }

    async fn read_record(
        &self,
        token: &Token,
        reference: &RecordReference,
    ) -> Result<Value, RemoteError> {
        let result = self.vault.read_record(token, reference).await;
        self.record(VaultOperation::ReadRecord);
        result
    }

    async fn delete_record(
        &self,
        token: &Token,
        reference: &RecordReference,
    ) -> Result<(), RemoteError> {
        let result = self.vault.delete_record(token, reference).await;
        self.record(VaultOperation::DeleteRecord);
        result
    }
}

fn bookmark(title: &str) -> NewBookmark {
    NewBookmark {
        title: title.to_string(),
        url: "https://example.com".to_string(),
        ..NewBookmark::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_initialize_runs_one_provisioning_sequence() {
    let harness = Harness::with_vault(Arc::new(
        MemoryVault::new().with_latency(Duration::from_millis(20)),
    ));

    let calls = (0..8).map(|_| {
        let initializer = harness.initializer.clone();
        tokio::spawn(async move { initializer.initialize("addr1").await })
    });
    let handles: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert!(handles.windows(2).all(|pair| pair[0].ptr_eq(&pair[1])));
    assert_eq!(harness.vault.calls(VaultOperation::Register), 1);
    assert_eq!(harness.vault.calls(VaultOperation::ListCollections), 1);
    assert_eq!(harness.vault.calls(VaultOperation::CreateCollection), 1);
    assert_eq!(harness.initializer.state("addr1"), InitState::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn provisioning_for_different_addresses_runs_one_at_a_time() {
    let vault = Arc::new(RecordingVault::new(
        MemoryVault::new().with_latency(Duration::from_millis(20)),
    ));
    let initializer = VaultInitializer::new(
        Arc::new(common::config()),
        vault.clone(),
        SessionStore::new(Arc::new(MemoryKeyValueStore::new())),
    );

    let calls = ["addr1", "addr2"].map(|address| {
        let initializer = initializer.clone();
        tokio::spawn(async move { initializer.initialize(address).await })
    });
    let handles: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    // The first sequence creates the collection, the second finds it.
    assert_eq!(
        vault.log(),
        vec![
            VaultOperation::Register,
            VaultOperation::ListCollections,
            VaultOperation::CreateCollection,
            VaultOperation::Register,
            VaultOperation::ListCollections,
        ]
    );
    assert_eq!(handles[0].collection_id(), handles[1].collection_id());
    assert_eq!(initializer.state("addr1"), InitState::Ready);
    assert_eq!(initializer.state("addr2"), InitState::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_waiters_share_one_failure() {
    let vault = Arc::new(MemoryVault::new().with_latency(Duration::from_millis(20)));
    vault.set_subscription_expired(true);
    let harness = Harness::with_vault(vault);

    let calls = (0..4).map(|_| {
        let initializer = harness.initializer.clone();
        tokio::spawn(async move { initializer.initialize("addr1").await })
    });
    let errors: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap_err())
        .collect();

    assert!(errors.iter().all(|err| err == &errors[0]));
    assert_eq!(errors[0].kind(), ErrorKind::SubscriptionExpired);
    assert_eq!(harness.vault.calls(VaultOperation::Register), 1);
    assert_eq!(harness.initializer.state("addr1"), InitState::Idle);
    assert!(harness.initializer.sessions().load().is_none());
}

#[tokio::test]
async fn abandoned_initialize_still_completes() {
    let harness = Harness::with_vault(Arc::new(
        MemoryVault::new().with_latency(Duration::from_millis(20)),
    ));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(5),
        harness.initializer.initialize("addr1"),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.initializer.state("addr1"), InitState::Ready);
    assert!(harness.initializer.sessions().load().is_some());
}

#[tokio::test]
async fn reload_within_ttl_restores_without_provisioning() {
    let harness = Harness::new();
    let handle = harness.initializer.initialize("addr1").await.unwrap();

    let session = harness.initializer.sessions().load().unwrap();
    assert_eq!(session.user_address, "addr1");
    assert_eq!(session.collection_id, handle.collection_id());
    assert!(session.initialized);

    let reloaded = harness.reload();
    let restored = reloaded.initializer.restore("addr1").unwrap().unwrap();
    assert_eq!(restored.collection_id(), handle.collection_id());
    assert_eq!(
        restored.user().identity().did(),
        handle.user().identity().did()
    );
    assert_eq!(reloaded.initializer.state("addr1"), InitState::Ready);

    reloaded.initializer.initialize("addr1").await.unwrap();
    assert_eq!(reloaded.vault.calls(VaultOperation::Register), 1);
    assert_eq!(reloaded.vault.calls(VaultOperation::CreateCollection), 1);
    assert_eq!(reloaded.vault.calls(VaultOperation::ListCollections), 1);
}

#[tokio::test]
async fn reload_with_another_address_clears_the_session() {
    let harness = Harness::new();
    harness.initializer.initialize("addr1").await.unwrap();

    let reloaded = harness.reload();
    assert!(reloaded.initializer.restore("addr2").unwrap().is_none());
    assert_eq!(reloaded.initializer.state("addr2"), InitState::Idle);
    assert_eq!(reloaded.initializer.state("addr1"), InitState::Idle);
    assert!(reloaded.storage.read(SESSION_STORAGE_KEY).unwrap().is_none());
}

#[tokio::test]
async fn expired_session_is_cleared_and_reprovisioned() {
    let harness = Harness::new();
    let handle = harness.initializer.initialize("addr1").await.unwrap();

    let mut stale = harness.initializer.sessions().load().unwrap();
    stale.created_at -= 86_401;
    harness.initializer.sessions().save(&stale);

    let reloaded = harness.reload();
    assert!(reloaded.initializer.restore("addr1").unwrap().is_none());

    let fresh = reloaded.initializer.initialize("addr1").await.unwrap();
    assert_eq!(fresh.collection_id(), handle.collection_id());
    assert_eq!(reloaded.vault.calls(VaultOperation::Register), 2);
    assert_eq!(reloaded.vault.calls(VaultOperation::CreateCollection), 1);
    let session: Session = reloaded.initializer.sessions().load().unwrap();
    assert!(reloaded.initializer.sessions().is_valid(&session));
}

#[tokio::test]
async fn records_survive_a_reload() {
    let harness = Harness::new();
    harness.initializer.initialize("addr1").await.unwrap();
    let id = harness.records.create("addr1", bookmark("T")).await.unwrap();

    let reloaded = harness.reload();
    reloaded.initializer.initialize("addr1").await.unwrap();
    let bookmarks = reloaded.records.list("addr1").await.unwrap();

    assert_eq!(bookmarks.len(), 1);
    assert_eq!(bookmarks[0].id, id);
    assert_eq!(bookmarks[0].title, "T");
    assert_ne!(bookmarks[0].storage_id, id);
}

#[tokio::test]
async fn users_only_see_their_own_records() {
    let harness = Harness::new();
    harness.initializer.initialize("addr1").await.unwrap();
    harness.initializer.initialize("addr2").await.unwrap();

    harness.records.create("addr1", bookmark("mine")).await.unwrap();
    assert!(harness.records.list("addr2").await.unwrap().is_empty());
    assert_eq!(
        harness
            .records
            .delete("addr2", "anything")
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::BookmarkNotFound
    );
}

#[tokio::test]
async fn clear_forgets_handle_and_session() {
    let harness = Harness::new();
    harness.initializer.initialize("addr1").await.unwrap();

    harness.initializer.clear("addr1");
    assert_eq!(harness.initializer.state("addr1"), InitState::Idle);
    assert!(harness.initializer.sessions().load().is_none());
    assert_eq!(
        harness.records.list("addr1").await.unwrap_err().kind(),
        ErrorKind::VaultNotInitialized
    );
}

#[tokio::test]
async fn collection_failure_degrades_to_fallback_and_persists() {
    let harness = Harness::new();
    harness.vault.fail_next(
        VaultOperation::CreateCollection,
        RemoteError::Rejected {
            status: Some(400),
            message: "schema rejected".to_string(),
        },
    );

    let handle = harness.initializer.initialize("addr1").await.unwrap();
    let again = harness.reload();
    again.initializer.initialize("addr1").await.unwrap();

    assert_eq!(
        again.initializer.handle("addr1").unwrap().collection_id(),
        handle.collection_id()
    );
    // The fallback collection does not exist remotely, so writes fail without losing the handle.
    assert_eq!(
        again
            .records
            .create("addr1", bookmark("T"))
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::CreateFailed
    );
    assert_eq!(again.initializer.state("addr1"), InitState::Ready);
}
