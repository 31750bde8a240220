//! `vaultkit-core` opens per-user encrypted vault sessions.
//!
//! A [`VaultInitializer`] turns a wallet address into a [`VaultHandle`]: it derives the builder
//! and user identities, registers the builder, resolves the record collection and persists a
//! [`Session`] so a reload can skip all of that. A [`RecordRepository`] then stores bookmarks
//! owned by the user, presenting a fresh [`DelegationToken`] for every mutation.
//!
//! The vault itself sits behind the [`VaultTransport`] trait, with [`HttpTransport`] for real
//! nodes and [`MemoryVault`] for tests and offline development.

#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

mod client;
pub use client::{BuilderClient, UserClient};

mod config;
pub use config::{Environment, VaultConfig, DELEGATION_TTL_SECONDS};

mod delegation;
pub use delegation::{
    Command, DelegationIssuer, DelegationToken, RootCredential, Token, TokenClaims, TokenError,
    ROOT_CREDENTIAL_TTL_SECONDS,
};

mod error;
pub use error::*;

mod identity;
pub use identity::{BuilderIdentity, Did, Keypair, UserIdentity, DID_PREFIX};

mod initializer;
pub use initializer::{InitState, VaultHandle, VaultInitializer};

pub mod provisioning;

mod records;
pub use records::{Bookmark, BookmarkPatch, NewBookmark, RecordRepository};

pub mod session;
pub use session::{Session, SessionStore};

pub mod transport;
pub use transport::{HttpTransport, MemoryVault, RemoteError, VaultTransport};

pub mod http_request;

// private modules
mod utils;
