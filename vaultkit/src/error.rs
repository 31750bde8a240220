use vaultkit_core::ErrorKind;

/// Error returned across the foreign boundary.
///
/// Flattened to its message for foreign callers; the stable code is available through
/// [`VaultKitError::code`] and in [`crate::VaultSessionState`].
#[derive(Debug, thiserror::Error, uniffi::Error)]
#[uniffi(flat_error)]
pub enum VaultKitError {
    /// An orchestrator error.
    #[error(transparent)]
    Vault(#[from] vaultkit_core::VaultKitError),
}

impl VaultKitError {
    /// The stable error code, e.g. `BOOKMARK_NOT_FOUND`.
    #[must_use]
    pub fn code(&self) -> ErrorKind {
        match self {
            Self::Vault(err) => err.kind(),
        }
    }

    /// The wrapped orchestrator error.
    #[must_use]
    pub const fn inner(&self) -> &vaultkit_core::VaultKitError {
        match self {
            Self::Vault(err) => err,
        }
    }
}
