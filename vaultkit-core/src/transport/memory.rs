use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{
    BuilderRegistration, CollectionSummary, CreateCollectionRequest, CreateRecordRequest,
    RecordReference, RemoteError, VaultOperation, VaultTransport,
};
use crate::{
    delegation::{Command, Token},
    identity::Did,
    utils::unix_now,
};

#[derive(Debug, Clone)]
struct StoredRecord {
    owner: Did,
    reference: RecordReference,
    data: Value,
}

#[derive(Debug, Default)]
struct State {
    builders: HashSet<Did>,
    collections: HashMap<Did, Vec<CollectionSummary>>,
    records: Vec<StoredRecord>,
    calls: HashMap<VaultOperation, usize>,
    faults: HashMap<VaultOperation, Vec<RemoteError>>,
    subscription_expired: bool,
}

/// An in-process vault.
///
/// Tokens are checked the way a vault node checks them (signature, expiry, audience and
/// command), so orchestration bugs surface here instead of against a live node. Calls are
/// counted per [`VaultOperation`] and faults can be queued per operation.
#[derive(Debug, Default)]
pub struct MemoryVault {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl MemoryVault {
    /// Creates an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency` before it touches any state.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of times `operation` was called, including failed calls.
    #[must_use]
    pub fn calls(&self, operation: VaultOperation) -> usize {
        self.lock()
            .map(|state| state.calls.get(&operation).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Makes the next call of `operation` fail with `error`. Queued faults are consumed in order.
    pub fn fail_next(&self, operation: VaultOperation, error: RemoteError) {
        if let Ok(mut state) = self.lock() {
            state.faults.entry(operation).or_default().push(error);
        }
    }

    /// Makes every authenticated call report a lapsed subscription.
    pub fn set_subscription_expired(&self, expired: bool) {
        if let Ok(mut state) = self.lock() {
            state.subscription_expired = expired;
        }
    }

    /// Seeds a collection owned by `owner`.
    pub fn insert_collection(&self, owner: &Did, summary: CollectionSummary) {
        if let Ok(mut state) = self.lock() {
            state
                .collections
                .entry(owner.clone())
                .or_default()
                .push(summary);
        }
    }

    /// Whether `did` has registered.
    #[must_use]
    pub fn is_registered(&self, did: &Did) -> bool {
        self.lock()
            .map(|state| state.builders.contains(did))
            .unwrap_or_default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.lock()
            .map(|state| state.records.len())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, RemoteError> {
        self.state.lock().map_err(|_| RemoteError::Rejected {
            status: None,
            message: "vault state lock poisoned".to_string(),
        })
    }

    /// Common prologue of every call: latency, bookkeeping and queued faults.
    async fn enter(&self, operation: VaultOperation) -> Result<MutexGuard<'_, State>, RemoteError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock()?;
        *state.calls.entry(operation).or_default() += 1;
        if let Some(faults) = state.faults.get_mut(&operation) {
            if !faults.is_empty() {
                return Err(faults.remove(0));
            }
        }
        Ok(state)
    }
}

/// Checks `token` for `command` and returns the identity it acts for.
fn authorize(state: &State, token: &Token, command: Command) -> Result<Did, RemoteError> {
    let unauthorized = |message: String| RemoteError::Unauthorized { message };

    let verified = Token::verify(token.as_str(), unix_now())
        .map_err(|err| unauthorized(err.to_string()))?;
    if !verified.command().permits(command) {
        return Err(unauthorized(format!(
            "token for {} does not cover {command}",
            verified.command()
        )));
    }
    if state.subscription_expired {
        return Err(RemoteError::SubscriptionExpired {
            message: "builder subscription is inactive".to_string(),
        });
    }
    Ok(verified.audience().clone())
}

fn not_found(what: &str) -> RemoteError {
    RemoteError::NotFound {
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl VaultTransport for MemoryVault {
    async fn register(&self, registration: &BuilderRegistration) -> Result<(), RemoteError> {
        let mut state = self.enter(VaultOperation::Register).await?;
        if state.subscription_expired {
            return Err(RemoteError::SubscriptionExpired {
                message: "builder subscription is inactive".to_string(),
            });
        }
        if !state.builders.insert(registration.did.clone()) {
            return Err(RemoteError::Duplicate {
                message: format!("builder {} already registered", registration.did),
            });
        }
        Ok(())
    }

    async fn list_collections(&self, token: &Token) -> Result<Vec<CollectionSummary>, RemoteError> {
        let state = self.enter(VaultOperation::ListCollections).await?;
        let holder = authorize(&state, token, Command::ManageCollections)?;
        Ok(state.collections.get(&holder).cloned().unwrap_or_default())
    }

    async fn create_collection(
        &self,
        token: &Token,
        request: &CreateCollectionRequest,
    ) -> Result<(), RemoteError> {
        let mut state = self.enter(VaultOperation::CreateCollection).await?;
        let holder = authorize(&state, token, Command::ManageCollections)?;
        let taken = state.collections.values().flatten().any(|existing| {
            existing.resolved_id() == Some(request.id.as_str())
        }) || state
            .collections
            .get(&holder)
            .is_some_and(|owned| owned.iter().any(|existing| existing.is_named(&request.name)));
        if taken {
            return Err(RemoteError::Duplicate {
                message: format!("E11000 duplicate key: collection {}", request.name),
            });
        }
        state
            .collections
            .entry(holder)
            .or_default()
            .push(CollectionSummary::new(&request.id, &request.name));
        Ok(())
    }

    async fn create_record(
        &self,
        token: &Token,
        request: &CreateRecordRequest,
    ) -> Result<String, RemoteError> {
        let mut state = self.enter(VaultOperation::CreateRecord).await?;
        let holder = authorize(&state, token, Command::CreateRecord)?;
        if holder != request.owner {
            return Err(RemoteError::Unauthorized {
                message: "delegation audience is not the record owner".to_string(),
            });
        }
        let exists = state
            .collections
            .values()
            .flatten()
            .any(|collection| collection.resolved_id() == Some(request.collection.as_str()));
        if !exists {
            return Err(not_found("collection"));
        }

        let document = request
            .data
            .get("_id")
            .and_then(Value::as_str)
            .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);
        state.records.push(StoredRecord {
            owner: request.owner.clone(),
            reference: RecordReference {
                collection: request.collection.clone(),
                document: document.clone(),
                name: Some(request.name.clone()),
            },
            data: request.data.clone(),
        });
        Ok(document)
    }

    async fn list_record_references(
        &self,
        token: &Token,
        collection: Option<&str>,
    ) -> Result<Vec<RecordReference>, RemoteError> {
        let state = self.enter(VaultOperation::ListRecordReferences).await?;
        let holder = authorize(&state, token, Command::ReadRecord)?;
        Ok(state
            .records
            .iter()
            .filter(|record| record.owner == holder)
            .filter(|record| collection.is_none_or(|id| record.reference.collection == id))
            .map(|record| record.reference.clone())
            .collect())
    }

    async fn read_record(
        &self,
        token: &Token,
        reference: &RecordReference,
    ) -> Result<Value, RemoteError> {
        let state = self.enter(VaultOperation::ReadRecord).await?;
        let holder = authorize(&state, token, Command::ReadRecord)?;
        state
            .records
            .iter()
            .find(|record| {
                record.owner == holder
                    && record.reference.collection == reference.collection
                    && record.reference.document == reference.document
            })
            .map(|record| record.data.clone())
            .ok_or_else(|| not_found("record"))
    }

    async fn delete_record(
        &self,
        token: &Token,
        reference: &RecordReference,
    ) -> Result<(), RemoteError> {
        let mut state = self.enter(VaultOperation::DeleteRecord).await?;
        let holder = authorize(&state, token, Command::DeleteRecord)?;
        let before = state.records.len();
        state.records.retain(|record| {
            !(record.owner == holder
                && record.reference.collection == reference.collection
                && record.reference.document == reference.document)
        });
        if state.records.len() == before {
            return Err(not_found("record"));
        }
        Ok(())
    }
}
