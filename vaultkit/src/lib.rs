//! Host bindings for `VaultKit`.
//!
//! Exposes [`VaultSession`] and the host [`SessionStorage`] and [`logger::Logger`] callbacks
//! through `UniFFI`. All orchestration lives in `vaultkit-core`.

#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

mod error;
pub use error::VaultKitError;

pub mod logger;

mod session;
pub use session::VaultSession;

mod storage;
pub use storage::SessionStorage;

mod types;
pub use types::*;

pub use vaultkit_core::ErrorKind;

uniffi::setup_scaffolding!("vaultkit");
