//! The steps that turn configuration and a user address into a usable vault.

mod collection;
mod identity;

pub use collection::{
    bookmark_schema, CollectionProvisioner, CollectionSource, ResolvedCollection,
    DEFAULT_COLLECTION_NAME,
};
pub use identity::{IdentityProvisioner, ProvisionedIdentity, RegistrationOutcome};
