use strum::{AsRefStr, Display};
use thiserror::Error;

use crate::transport::RemoteError;

/// Result type for every fallible orchestrator operation.
pub type VaultKitResult<T, E = VaultKitError> = std::result::Result<T, E>;

/// Error outputs from `VaultKit`.
///
/// The type is `Clone` because a single initialization result is handed to every caller that
/// awaited the same in-flight sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultKitError {
    /// No user address was supplied, or it was blank.
    #[error("missing_user_address")]
    MissingUserAddress,
    /// The host did not provide a session store to persist into.
    #[error("browser_required: {reason}")]
    BrowserRequired {
        /// What was missing.
        reason: String,
    },
    /// No builder private key is configured.
    #[error("missing_private_key")]
    MissingPrivateKey,
    /// The configured builder private key could not be turned into a keypair.
    #[error("keypair_creation_failed: {reason}")]
    KeypairCreationFailed {
        /// Why the key was rejected.
        reason: String,
    },
    /// A configuration value was rejected.
    #[error("invalid_config: {attribute}: {reason}")]
    InvalidConfig {
        /// Name of the offending setting.
        attribute: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The transport or the vault clients could not be constructed.
    #[error("client_init_failed: {reason}")]
    ClientInitFailed {
        /// Underlying failure.
        reason: String,
    },
    /// The record collection could not be resolved or created.
    #[error("collection_setup_failed: {reason}")]
    CollectionSetupFailed {
        /// Underlying failure.
        reason: String,
    },
    /// A record operation was attempted without a ready vault for the address.
    #[error("vault_not_initialized")]
    VaultNotInitialized,
    /// Creating a record failed.
    #[error("create_failed: {reason}")]
    CreateFailed {
        /// Underlying failure.
        reason: String,
    },
    /// Listing or reading records failed.
    #[error("read_failed: {reason}")]
    ReadFailed {
        /// Underlying failure.
        reason: String,
    },
    /// Deleting a record failed.
    #[error("delete_failed: {reason}")]
    DeleteFailed {
        /// Underlying failure.
        reason: String,
    },
    /// Owned records cannot be mutated in place.
    #[error("update_not_implemented")]
    UpdateNotImplemented,
    /// No record reference matches the requested id.
    #[error("bookmark_not_found: {id}")]
    BookmarkNotFound {
        /// The application id that was looked up.
        id: String,
    },
    /// The vault reports that the builder's subscription has lapsed.
    #[error("subscription_expired: {reason}")]
    SubscriptionExpired {
        /// Message returned by the vault.
        reason: String,
    },
    /// Unrecognized failure during initialization.
    #[error("initialization_failed: {reason}")]
    InitializationFailed {
        /// Underlying failure.
        reason: String,
    },
}

/// Stable, host-visible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// See [`VaultKitError::MissingUserAddress`].
    MissingUserAddress,
    /// See [`VaultKitError::BrowserRequired`].
    BrowserRequired,
    /// See [`VaultKitError::MissingPrivateKey`].
    MissingPrivateKey,
    /// See [`VaultKitError::KeypairCreationFailed`].
    KeypairCreationFailed,
    /// See [`VaultKitError::InvalidConfig`].
    InvalidConfig,
    /// See [`VaultKitError::ClientInitFailed`].
    ClientInitFailed,
    /// See [`VaultKitError::CollectionSetupFailed`].
    CollectionSetupFailed,
    /// See [`VaultKitError::VaultNotInitialized`].
    VaultNotInitialized,
    /// See [`VaultKitError::CreateFailed`].
    CreateFailed,
    /// See [`VaultKitError::ReadFailed`].
    ReadFailed,
    /// See [`VaultKitError::DeleteFailed`].
    DeleteFailed,
    /// See [`VaultKitError::UpdateNotImplemented`].
    UpdateNotImplemented,
    /// See [`VaultKitError::BookmarkNotFound`].
    BookmarkNotFound,
    /// See [`VaultKitError::SubscriptionExpired`].
    SubscriptionExpired,
    /// See [`VaultKitError::InitializationFailed`].
    InitializationFailed,
}

impl VaultKitError {
    /// Returns the stable code for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingUserAddress => ErrorKind::MissingUserAddress,
            Self::BrowserRequired { .. } => ErrorKind::BrowserRequired,
            Self::MissingPrivateKey => ErrorKind::MissingPrivateKey,
            Self::KeypairCreationFailed { .. } => ErrorKind::KeypairCreationFailed,
            Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Self::ClientInitFailed { .. } => ErrorKind::ClientInitFailed,
            Self::CollectionSetupFailed { .. } => ErrorKind::CollectionSetupFailed,
            Self::VaultNotInitialized => ErrorKind::VaultNotInitialized,
            Self::CreateFailed { .. } => ErrorKind::CreateFailed,
            Self::ReadFailed { .. } => ErrorKind::ReadFailed,
            Self::DeleteFailed { .. } => ErrorKind::DeleteFailed,
            Self::UpdateNotImplemented => ErrorKind::UpdateNotImplemented,
            Self::BookmarkNotFound { .. } => ErrorKind::BookmarkNotFound,
            Self::SubscriptionExpired { .. } => ErrorKind::SubscriptionExpired,
            Self::InitializationFailed { .. } => ErrorKind::InitializationFailed,
        }
    }

    /// Whether retrying the same call may succeed without changing configuration.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ClientInitFailed { .. }
                | Self::CollectionSetupFailed { .. }
                | Self::CreateFailed { .. }
                | Self::ReadFailed { .. }
                | Self::DeleteFailed { .. }
                | Self::InitializationFailed { .. }
        )
    }

    /// A sentence suitable for showing to an end user.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::MissingUserAddress => "Connect your wallet to open your vault.",
            ErrorKind::BrowserRequired => {
                "Your vault needs local storage, which is not available here."
            }
            ErrorKind::MissingPrivateKey
            | ErrorKind::KeypairCreationFailed
            | ErrorKind::InvalidConfig => {
                "The vault service is misconfigured. Please contact support."
            }
            ErrorKind::SubscriptionExpired => {
                "The vault subscription has expired. Access resumes once it is renewed."
            }
            ErrorKind::VaultNotInitialized => "Your vault is not open yet.",
            ErrorKind::CreateFailed => "The bookmark could not be saved. Please try again.",
            ErrorKind::ReadFailed => "Your bookmarks could not be loaded. Please try again.",
            ErrorKind::DeleteFailed => "The bookmark could not be deleted. Please try again.",
            ErrorKind::UpdateNotImplemented => "Editing saved bookmarks is not supported.",
            ErrorKind::BookmarkNotFound => "That bookmark no longer exists.",
            ErrorKind::ClientInitFailed
            | ErrorKind::CollectionSetupFailed
            | ErrorKind::InitializationFailed => {
                "Your vault could not be opened. Please try again."
            }
        }
    }

    /// Maps a transport failure into `wrap`, except for a lapsed subscription which always
    /// keeps its own kind.
    pub(crate) fn from_remote(
        err: RemoteError,
        wrap: impl FnOnce(String) -> Self,
    ) -> Self {
        match err {
            RemoteError::SubscriptionExpired { message } => {
                Self::SubscriptionExpired { reason: message }
            }
            other => wrap(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(VaultKitError::MissingUserAddress, "MISSING_USER_ADDRESS")]
    #[test_case(VaultKitError::UpdateNotImplemented, "UPDATE_NOT_IMPLEMENTED")]
    #[test_case(VaultKitError::BookmarkNotFound { id: "x".into() }, "BOOKMARK_NOT_FOUND")]
    #[test_case(VaultKitError::KeypairCreationFailed { reason: "bad".into() }, "KEYPAIR_CREATION_FAILED")]
    #[test_case(VaultKitError::InitializationFailed { reason: "boom".into() }, "INITIALIZATION_FAILED")]
    fn test_error_codes(err: VaultKitError, code: &str) {
        assert_eq!(err.kind().to_string(), code);
        assert_eq!(err.kind().as_ref(), code);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(VaultKitError::CreateFailed { reason: String::new() }.is_retryable());
        assert!(VaultKitError::ClientInitFailed { reason: String::new() }.is_retryable());
        assert!(!VaultKitError::UpdateNotImplemented.is_retryable());
        assert!(!VaultKitError::MissingPrivateKey.is_retryable());
        assert!(!VaultKitError::SubscriptionExpired { reason: String::new() }.is_retryable());
    }

    #[test]
    fn test_subscription_expired_keeps_its_kind() {
        let err = VaultKitError::from_remote(
            RemoteError::SubscriptionExpired {
                message: "payment required".to_string(),
            },
            |reason| VaultKitError::CreateFailed { reason },
        );
        assert_eq!(err.kind(), ErrorKind::SubscriptionExpired);
        assert_ne!(
            err.user_message(),
            VaultKitError::InitializationFailed {
                reason: String::new()
            }
            .user_message()
        );

        let err = VaultKitError::from_remote(
            RemoteError::NotFound {
                message: "gone".to_string(),
            },
            |reason| VaultKitError::DeleteFailed { reason },
        );
        assert_eq!(err.kind(), ErrorKind::DeleteFailed);
    }
}
