//! Builder and user clients bound to a transport.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use crate::{
    delegation::{Command, DelegationIssuer, RootCredential, Token, ROOT_CREDENTIAL_TTL_SECONDS},
    error::{VaultKitError, VaultKitResult},
    identity::{BuilderIdentity, UserIdentity},
    transport::VaultTransport,
    utils::unix_now,
};

/// Acts as the builder: administers collections and issues delegations.
pub struct BuilderClient {
    identity: BuilderIdentity,
    transport: Arc<dyn VaultTransport>,
    root: Mutex<Option<RootCredential>>,
}

impl fmt::Debug for BuilderClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderClient")
            .field("did", self.identity.did())
            .finish_non_exhaustive()
    }
}

impl BuilderClient {
    /// Binds `identity` to `transport`.
    #[must_use]
    pub fn new(identity: BuilderIdentity, transport: Arc<dyn VaultTransport>) -> Self {
        Self {
            identity,
            transport,
            root: Mutex::new(None),
        }
    }

    /// The builder identity.
    #[must_use]
    pub const fn identity(&self) -> &BuilderIdentity {
        &self.identity
    }

    /// The transport this client talks through.
    #[must_use]
    pub fn transport(&self) -> &dyn VaultTransport {
        self.transport.as_ref()
    }

    /// The builder's root credential, minted again once it has expired.
    ///
    /// # Errors
    /// Returns [`VaultKitError::ClientInitFailed`] if the credential cannot be minted.
    pub fn root_credential(&self) -> VaultKitResult<RootCredential> {
        let now = unix_now();
        let mut cached = self.root.lock().map_err(|_| VaultKitError::ClientInitFailed {
            reason: "root credential lock poisoned".to_string(),
        })?;
        if let Some(root) = cached.as_ref().filter(|root| !root.is_expired_at(now)) {
            return Ok(root.clone());
        }

        let root = DelegationIssuer::root_credential(
            self.identity.keypair(),
            ROOT_CREDENTIAL_TTL_SECONDS,
            now,
        )
        .map_err(|err| VaultKitError::ClientInitFailed {
            reason: err.to_string(),
        })?;
        *cached = Some(root.clone());
        Ok(root)
    }

    /// A token for the builder's own collection management.
    ///
    /// # Errors
    /// Returns [`VaultKitError::ClientInitFailed`] if the token cannot be minted.
    pub fn collections_token(&self, issuer: &DelegationIssuer) -> VaultKitResult<Token> {
        let root = self.root_credential()?;
        issuer
            .issue(
                &root,
                self.identity.keypair(),
                self.identity.did(),
                Command::ManageCollections,
            )
            .map_err(|err| VaultKitError::ClientInitFailed {
                reason: err.to_string(),
            })
    }
}

/// Acts as one user: owns and reads records.
pub struct UserClient {
    identity: UserIdentity,
    transport: Arc<dyn VaultTransport>,
}

impl fmt::Debug for UserClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClient")
            .field("did", self.identity.did())
            .field("address", &self.identity.address())
            .finish_non_exhaustive()
    }
}

impl UserClient {
    /// Binds `identity` to `transport`.
    #[must_use]
    pub fn new(identity: UserIdentity, transport: Arc<dyn VaultTransport>) -> Self {
        Self {
            identity,
            transport,
        }
    }

    /// The user identity.
    #[must_use]
    pub const fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    /// The transport this client talks through.
    #[must_use]
    pub fn transport(&self) -> &dyn VaultTransport {
        self.transport.as_ref()
    }
}
