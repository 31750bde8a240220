//! Single-flight vault initialization.
//!
//! [`VaultInitializer`] keeps one registry slot per user address. Concurrent calls for the same
//! address share one in-flight provisioning future, and provisioning sequences for different
//! addresses queue behind a process-wide gate so at most one runs at a time.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::{
    client::{BuilderClient, UserClient},
    config::VaultConfig,
    delegation::DelegationIssuer,
    error::{VaultKitError, VaultKitResult},
    identity::BuilderIdentity,
    provisioning::{CollectionProvisioner, IdentityProvisioner},
    session::{Session, SessionStore},
    transport::VaultTransport,
    utils::{normalize_address, unix_now},
};

/// Everything record operations need for one user address.
#[derive(Debug, Clone)]
pub struct VaultHandle {
    builder: Arc<BuilderClient>,
    user: Arc<UserClient>,
    collection_id: String,
    user_address: String,
}

impl VaultHandle {
    /// The builder client.
    #[must_use]
    pub fn builder(&self) -> &BuilderClient {
        &self.builder
    }

    /// The user client.
    #[must_use]
    pub fn user(&self) -> &UserClient {
        &self.user
    }

    /// Collection holding the user's records.
    #[must_use]
    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    /// Address the handle was provisioned for.
    #[must_use]
    pub fn user_address(&self) -> &str {
        &self.user_address
    }

    /// Whether both handles share the same clients.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.builder, &other.builder) && Arc::ptr_eq(&self.user, &other.user)
    }

    fn session(&self) -> Session {
        Session::new(
            &self.user_address,
            &self.collection_id,
            self.builder.identity().did().as_str(),
        )
    }
}

/// Initialization state of one user address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// Nothing cached and nothing running.
    Idle,
    /// A provisioning sequence is running.
    Initializing,
    /// A handle is cached.
    Ready,
}

type SharedInit = Shared<BoxFuture<'static, VaultKitResult<VaultHandle>>>;

enum Slot {
    Initializing { generation: u64, future: SharedInit },
    Ready(VaultHandle),
}

struct Inner {
    config: Arc<VaultConfig>,
    transport: Arc<dyn VaultTransport>,
    sessions: SessionStore,
    issuer: DelegationIssuer,
    slots: Mutex<HashMap<String, Slot>>,
    generation: AtomicU64,
    provisioning_gate: tokio::sync::Mutex<()>,
}

/// Opens vaults for user addresses, at most once each.
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone)]
pub struct VaultInitializer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for VaultInitializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultInitializer")
            .field("base_url", &self.inner.config.base_url)
            .field("sessions", &self.inner.sessions)
            .finish_non_exhaustive()
    }
}

impl VaultInitializer {
    /// Creates an initializer with an empty registry.
    #[must_use]
    pub fn new(
        config: Arc<VaultConfig>,
        transport: Arc<dyn VaultTransport>,
        sessions: SessionStore,
    ) -> Self {
        let issuer = DelegationIssuer::new(config.delegation_ttl_seconds);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                sessions,
                issuer,
                slots: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                provisioning_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The configuration vaults are opened with.
    #[must_use]
    pub fn config(&self) -> &VaultConfig {
        &self.inner.config
    }

    /// The session store.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    /// The issuer used for delegations.
    #[must_use]
    pub fn issuer(&self) -> DelegationIssuer {
        self.inner.issuer
    }

    /// Returns the vault handle for `user_address`, provisioning it if needed.
    ///
    /// A cached handle is returned without network activity, and so is one restored from a
    /// valid persisted session. Otherwise a single provisioning sequence runs and every
    /// concurrent caller for the same address receives its result. The sequence runs as its own
    /// task and completes even if every caller stops waiting.
    ///
    /// # Errors
    /// - [`VaultKitError::MissingUserAddress`] if `user_address` is blank.
    /// - Any initialization error, shared by every waiter. A failure leaves the address idle and
    ///   clears its persisted session.
    pub async fn initialize(&self, user_address: &str) -> VaultKitResult<VaultHandle> {
        let address = normalize_address(user_address).ok_or(VaultKitError::MissingUserAddress)?;

        match self.lookup(address)? {
            Some(Slot::Ready(handle)) => return Ok(handle),
            Some(Slot::Initializing { future, .. }) => return future.await,
            None => {}
        }

        if let Ok(Some(handle)) = self.restore(address) {
            return Ok(handle);
        }

        let future = {
            let mut slots = self.slots()?;
            match slots.get(address) {
                Some(Slot::Ready(handle)) => return Ok(handle.clone()),
                Some(Slot::Initializing { future, .. }) => future.clone(),
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = self.spawn_provisioning(address, generation);
                    slots.insert(
                        address.to_string(),
                        Slot::Initializing {
                            generation,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };
        future.await
    }

    /// Rebuilds the handle for `user_address` from the persisted session, without network calls.
    ///
    /// Returns `None` if there is no valid session for this address and builder. A session that
    /// is expired, belongs to another address or was created by another builder is cleared.
    ///
    /// # Errors
    /// - [`VaultKitError::MissingUserAddress`] if `user_address` is blank.
    /// - Key errors while deriving the identities.
    pub fn restore(&self, user_address: &str) -> VaultKitResult<Option<VaultHandle>> {
        let address = normalize_address(user_address).ok_or(VaultKitError::MissingUserAddress)?;
        if let Some(Slot::Ready(handle)) = self.lookup(address)? {
            return Ok(Some(handle));
        }

        let Some(session) = self.inner.sessions.load_valid_for(address, unix_now()) else {
            return Ok(None);
        };
        let builder = BuilderIdentity::from_config(&self.inner.config)?;
        if session.builder_identity != builder.did().as_str() {
            log::info!("clearing vault session created by another builder");
            self.inner.sessions.clear();
            return Ok(None);
        }

        let user = builder.derive_user(address)?;
        let handle = VaultHandle {
            builder: Arc::new(BuilderClient::new(builder, self.inner.transport.clone())),
            user: Arc::new(UserClient::new(user, self.inner.transport.clone())),
            collection_id: session.collection_id,
            user_address: address.to_string(),
        };

        let mut slots = self.slots()?;
        match slots.get(address) {
            Some(Slot::Ready(existing)) => Ok(Some(existing.clone())),
            Some(Slot::Initializing { .. }) => Ok(None),
            None => {
                log::debug!("restored vault session for {address}");
                slots.insert(address.to_string(), Slot::Ready(handle.clone()));
                Ok(Some(handle))
            }
        }
    }

    /// Drops the cached handle and the persisted session of `user_address`.
    ///
    /// A provisioning sequence still running for the address completes but is not cached.
    pub fn clear(&self, user_address: &str) {
        let Some(address) = normalize_address(user_address) else {
            return;
        };
        let mut slots = self.slots().ok();
        if let Some(slots) = slots.as_mut() {
            slots.remove(address);
        }
        // Under the registry lock, so a provisioning run cannot save the session afterwards.
        self.inner.sessions.clear_for(address);
        drop(slots);
    }

    /// Initialization state of `user_address`.
    #[must_use]
    pub fn state(&self, user_address: &str) -> InitState {
        let lookup = normalize_address(user_address).and_then(|address| self.lookup(address).ok());
        match lookup.flatten() {
            None => InitState::Idle,
            Some(Slot::Initializing { .. }) => InitState::Initializing,
            Some(Slot::Ready(_)) => InitState::Ready,
        }
    }

    /// The cached handle of `user_address`, if it is ready.
    #[must_use]
    pub fn handle(&self, user_address: &str) -> Option<VaultHandle> {
        let address = normalize_address(user_address)?;
        match self.lookup(address).ok()?? {
            Slot::Ready(handle) => Some(handle),
            Slot::Initializing { .. } => None,
        }
    }

    fn slots(&self) -> VaultKitResult<MutexGuard<'_, HashMap<String, Slot>>> {
        self.inner
            .slots
            .lock()
            .map_err(|_| VaultKitError::InitializationFailed {
                reason: "vault registry lock poisoned".to_string(),
            })
    }

    fn lookup(&self, address: &str) -> VaultKitResult<Option<Slot>> {
        Ok(self.slots()?.get(address).map(|slot| match slot {
            Slot::Initializing { generation, future } => Slot::Initializing {
                generation: *generation,
                future: future.clone(),
            },
            Slot::Ready(handle) => Slot::Ready(handle.clone()),
        }))
    }

    fn spawn_provisioning(&self, address: &str, generation: u64) -> SharedInit {
        let inner = Arc::clone(&self.inner);
        let owned_address = address.to_string();
        let task = tokio::spawn(async move {
            let result = inner.provision(&owned_address).await.map_err(categorize);
            inner.settle(&owned_address, generation, &result);
            result
        });

        let inner = Arc::clone(&self.inner);
        let owned_address = address.to_string();
        async move {
            match task.await {
                Ok(result) => result,
                Err(err) => {
                    let result = Err(VaultKitError::InitializationFailed {
                        reason: format!("provisioning task failed: {err}"),
                    });
                    inner.settle(&owned_address, generation, &result);
                    result
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn provision(&self, address: &str) -> VaultKitResult<VaultHandle> {
        let _gate = self.provisioning_gate.lock().await;
        log::debug!("provisioning vault for {address}");

        self.config.validate()?;
        let provisioned = IdentityProvisioner::new(self.transport.clone())
            .provision(&self.config)
            .await?;
        let user = provisioned.identity.derive_user(address)?;
        let builder = Arc::new(BuilderClient::new(
            provisioned.identity,
            self.transport.clone(),
        ));
        let collection = CollectionProvisioner::new(&self.config.collection_name, self.issuer)
            .ensure_collection(&builder, address)
            .await?;

        log::info!(
            "vault ready for {address} (collection {}, {:?})",
            collection.id,
            collection.source
        );
        Ok(VaultHandle {
            builder,
            user: Arc::new(UserClient::new(user, self.transport.clone())),
            collection_id: collection.id,
            user_address: address.to_string(),
        })
    }

    /// Records the outcome of the provisioning run `generation`. Runs that were cleared or
    /// superseded leave the registry and the session untouched.
    ///
    /// The session is written while the registry lock is held, so a concurrent `clear` either
    /// removes the slot first or runs after the write and removes the session too.
    fn settle(&self, address: &str, generation: u64, result: &VaultKitResult<VaultHandle>) {
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };
        let current = matches!(
            slots.get(address),
            Some(Slot::Initializing { generation: running, .. }) if *running == generation
        );
        if !current {
            return;
        }

        match result {
            Ok(handle) => {
                self.sessions.save(&handle.session());
                slots.insert(address.to_string(), Slot::Ready(handle.clone()));
            }
            Err(err) => {
                slots.remove(address);
                drop(slots);
                log::warn!("vault initialization for {address} failed: {err}");
                self.sessions.clear_for(address);
            }
        }
    }
}

/// Maps errors outside the initialization taxonomy to [`VaultKitError::InitializationFailed`].
pub(crate) fn categorize(err: VaultKitError) -> VaultKitError {
    match err {
        VaultKitError::MissingUserAddress
        | VaultKitError::BrowserRequired { .. }
        | VaultKitError::MissingPrivateKey
        | VaultKitError::KeypairCreationFailed { .. }
        | VaultKitError::InvalidConfig { .. }
        | VaultKitError::ClientInitFailed { .. }
        | VaultKitError::CollectionSetupFailed { .. }
        | VaultKitError::SubscriptionExpired { .. }
        | VaultKitError::InitializationFailed { .. } => err,
        other => VaultKitError::InitializationFailed {
            reason: other.to_string(),
        },
    }
}
