use std::sync::Arc;

use crate::{
    config::VaultConfig,
    error::{VaultKitError, VaultKitResult},
    identity::BuilderIdentity,
    transport::{BuilderRegistration, VaultTransport},
};

/// How builder registration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The vault accepted a new registration.
    Registered,
    /// The builder was registered before.
    AlreadyRegistered,
    /// Registration failed for another reason; the builder is assumed to be registered.
    Unconfirmed {
        /// The failure that was tolerated.
        reason: String,
    },
}

/// A builder identity together with its registration outcome.
#[derive(Debug, Clone)]
pub struct ProvisionedIdentity {
    /// The builder identity.
    pub identity: BuilderIdentity,
    /// What registration reported.
    pub outcome: RegistrationOutcome,
}

/// Loads the builder identity and registers it with the vault.
pub struct IdentityProvisioner {
    transport: Arc<dyn VaultTransport>,
}

impl IdentityProvisioner {
    /// Creates a provisioner registering through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn VaultTransport>) -> Self {
        Self { transport }
    }

    /// Derives the builder identity and registers it.
    ///
    /// Key problems fail before any network call. A duplicate registration is success, and any
    /// other registration failure is logged and tolerated, except a lapsed subscription.
    ///
    /// # Errors
    /// - [`VaultKitError::MissingPrivateKey`] or [`VaultKitError::KeypairCreationFailed`].
    /// - [`VaultKitError::SubscriptionExpired`] if the vault reports a lapsed subscription.
    pub async fn provision(&self, config: &VaultConfig) -> VaultKitResult<ProvisionedIdentity> {
        let identity = BuilderIdentity::from_config(config)?;
        let registration = BuilderRegistration {
            did: identity.did().clone(),
            name: config.builder_name.clone(),
        };

        let outcome = match self.transport.register(&registration).await {
            Ok(()) => {
                log::info!("registered builder {}", identity.did());
                RegistrationOutcome::Registered
            }
            Err(err) if err.is_duplicate() => {
                log::debug!("builder {} already registered", identity.did());
                RegistrationOutcome::AlreadyRegistered
            }
            Err(err) if err.is_subscription_expired() => {
                return Err(VaultKitError::from_remote(err, |reason| {
                    VaultKitError::ClientInitFailed { reason }
                }));
            }
            Err(err) => {
                log::warn!("builder registration failed, continuing: {err}");
                RegistrationOutcome::Unconfirmed {
                    reason: err.to_string(),
                }
            }
        };

        Ok(ProvisionedIdentity { identity, outcome })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::{
        transport::{MemoryVault, RemoteError, VaultOperation},
        ErrorKind,
    };

    const KEY: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    fn config(key: Option<&str>) -> VaultConfig {
        VaultConfig::new(
            "https://vault.example.org",
            key.map(|key| SecretString::from(key.to_string())),
        )
    }

    #[tokio::test]
    async fn test_registers_then_tolerates_duplicate() {
        let vault = Arc::new(MemoryVault::new());
        let provisioner = IdentityProvisioner::new(vault.clone());

        let first = provisioner.provision(&config(Some(KEY))).await.unwrap();
        assert_eq!(first.outcome, RegistrationOutcome::Registered);

        let second = provisioner.provision(&config(Some(KEY))).await.unwrap();
        assert_eq!(second.outcome, RegistrationOutcome::AlreadyRegistered);
        assert_eq!(first.identity.did(), second.identity.did());
    }

    #[tokio::test]
    async fn test_duplicate_message_without_status_is_success() {
        let vault = Arc::new(MemoryVault::new());
        vault.fail_next(
            VaultOperation::Register,
            RemoteError::Rejected {
                status: Some(500),
                message: "E11000 duplicate key error".to_string(),
            },
        );
        let provisioned = IdentityProvisioner::new(vault)
            .provision(&config(Some(KEY)))
            .await
            .unwrap();
        assert_eq!(provisioned.outcome, RegistrationOutcome::AlreadyRegistered);
    }

    #[tokio::test]
    async fn test_other_failures_are_tolerated() {
        let vault = Arc::new(MemoryVault::new());
        vault.fail_next(
            VaultOperation::Register,
            RemoteError::Network {
                url: "https://vault.example.org".to_string(),
                status: None,
                error: "connection reset".to_string(),
            },
        );
        let provisioned = IdentityProvisioner::new(vault)
            .provision(&config(Some(KEY)))
            .await
            .unwrap();
        assert!(matches!(
            provisioned.outcome,
            RegistrationOutcome::Unconfirmed { .. }
        ));
    }

    #[tokio::test]
    async fn test_key_errors_skip_the_network() {
        let vault = Arc::new(MemoryVault::new());
        let provisioner = IdentityProvisioner::new(vault.clone());

        let err = provisioner.provision(&config(None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingPrivateKey);

        let err = provisioner
            .provision(&config(Some("0xnothex")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeypairCreationFailed);

        assert_eq!(vault.calls(VaultOperation::Register), 0);
    }

    #[tokio::test]
    async fn test_lapsed_subscription_is_fatal() {
        let vault = Arc::new(MemoryVault::new());
        vault.set_subscription_expired(true);
        let err = IdentityProvisioner::new(vault)
            .provision(&config(Some(KEY)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubscriptionExpired);
    }
}
