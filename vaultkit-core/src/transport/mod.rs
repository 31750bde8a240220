//! The boundary to the remote vault.
//!
//! [`VaultTransport`] is the only way the orchestrator talks to the vault. [`HttpTransport`]
//! speaks the vault's HTTP API; [`MemoryVault`] keeps everything in process for tests and
//! offline development.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter};
use thiserror::Error;

use crate::{delegation::Token, identity::Did};

mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::MemoryVault;

/// A failure reported by, or while reaching, the vault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The entity already exists.
    #[error("duplicate: {message}")]
    Duplicate {
        /// Message returned by the vault.
        message: String,
    },
    /// The entity does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Message returned by the vault.
        message: String,
    },
    /// The presented token was rejected.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Message returned by the vault.
        message: String,
    },
    /// The builder's subscription has lapsed.
    #[error("subscription expired: {message}")]
    SubscriptionExpired {
        /// Message returned by the vault.
        message: String,
    },
    /// Any other refusal.
    #[error("rejected ({}): {message}", status.map_or_else(|| "-".to_string(), |s| s.to_string()))]
    Rejected {
        /// HTTP status, if there was one.
        status: Option<u16>,
        /// Message returned by the vault.
        message: String,
    },
    /// The vault could not be reached.
    #[error("network error at {url}: {error}")]
    Network {
        /// Requested URL.
        url: String,
        /// HTTP status of the last attempt, if any.
        status: Option<u16>,
        /// Underlying failure.
        error: String,
    },
    /// The vault's response could not be understood.
    #[error("malformed response: {message}")]
    Malformed {
        /// What could not be parsed.
        message: String,
    },
}

const DUPLICATE_MARKERS: [&str; 4] = [
    "already exists",
    "already registered",
    "duplicate key",
    "E11000",
];

impl RemoteError {
    /// Classifies a refusal from its HTTP status and message.
    #[must_use]
    pub fn classify(status: u16, message: String) -> Self {
        match status {
            409 => Self::Duplicate { message },
            404 => Self::NotFound { message },
            401 | 403 => Self::Unauthorized { message },
            402 => Self::SubscriptionExpired { message },
            _ if is_duplicate_message(&message) => Self::Duplicate { message },
            _ => Self::Rejected {
                status: Some(status),
                message,
            },
        }
    }

    /// Whether the failure means the entity already exists.
    ///
    /// Vaults do not report duplicates consistently, so the message is inspected too.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        match self {
            Self::Duplicate { .. } => true,
            Self::Rejected { message, .. }
            | Self::Unauthorized { message }
            | Self::NotFound { message } => is_duplicate_message(message),
            Self::Network { error, .. } => is_duplicate_message(error),
            Self::SubscriptionExpired { .. } | Self::Malformed { .. } => false,
        }
    }

    /// Whether the builder's subscription has lapsed.
    #[must_use]
    pub const fn is_subscription_expired(&self) -> bool {
        matches!(self, Self::SubscriptionExpired { .. })
    }
}

fn is_duplicate_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    DUPLICATE_MARKERS
        .iter()
        .any(|marker| lowered.contains(&marker.to_ascii_lowercase()))
}

/// Registration payload for a builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderRegistration {
    /// Builder DID.
    pub did: Did,
    /// Display name.
    pub name: String,
}

/// A collection as listed by the vault.
///
/// Vault deployments disagree on which field carries the identifier, see
/// [`CollectionSummary::resolved_id`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSummary {
    /// Identifier, when reported as `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Identifier, when reported as `_id`.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub alt_id: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CollectionSummary {
    /// Builds a summary reporting `id` and `name`.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            alt_id: None,
            name: Some(name.into()),
        }
    }

    /// The collection identifier: `id`, else `_id`, else `name`. Blank values are skipped.
    #[must_use]
    pub fn resolved_id(&self) -> Option<&str> {
        [&self.id, &self.alt_id, &self.name]
            .into_iter()
            .filter_map(Option::as_deref)
            .find(|value| !value.trim().is_empty())
    }

    /// Whether the collection's name is `name`.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }
}

/// Kind of a collection. Only owned collections are created here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// Each record is owned by one user.
    Owned,
}

/// Payload creating a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    /// Caller-chosen identifier.
    #[serde(rename = "_id")]
    pub id: String,
    /// Collection kind.
    #[serde(rename = "type")]
    pub kind: CollectionKind,
    /// Display name.
    pub name: String,
    /// JSON schema of the records.
    pub schema: Value,
}

/// Access granted to one identity on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// May read.
    pub read: bool,
    /// May write.
    pub write: bool,
    /// May run queries over it.
    pub execute: bool,
}

/// Access control entry attached to a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    /// Identity the permissions are granted to.
    pub grantee: Did,
    /// Granted permissions.
    #[serde(flatten)]
    pub permissions: Permissions,
}

impl AccessControl {
    /// Owner access: read and write, no execute.
    #[must_use]
    pub const fn owner(grantee: Did) -> Self {
        Self {
            grantee,
            permissions: Permissions {
                read: true,
                write: true,
                execute: false,
            },
        }
    }
}

/// Payload creating a user-owned record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRecordRequest {
    /// Owning user.
    pub owner: Did,
    /// Target collection.
    pub collection: String,
    /// Application identifier stored alongside the record.
    pub name: String,
    /// Access granted on the record.
    pub acl: AccessControl,
    /// Record body.
    pub data: Value,
}

/// Pointer to a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReference {
    /// Collection holding the record.
    pub collection: String,
    /// Storage identifier.
    pub document: String,
    /// Application identifier, when the vault reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RecordReference {
    /// Whether this reference is the record known to the application as `id`.
    #[must_use]
    pub fn matches(&self, id: &str) -> bool {
        self.document == id || self.name.as_deref() == Some(id)
    }
}

/// Operations a transport performs, used for bookkeeping and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum VaultOperation {
    /// [`VaultTransport::register`].
    Register,
    /// [`VaultTransport::list_collections`].
    ListCollections,
    /// [`VaultTransport::create_collection`].
    CreateCollection,
    /// [`VaultTransport::create_record`].
    CreateRecord,
    /// [`VaultTransport::list_record_references`].
    ListRecordReferences,
    /// [`VaultTransport::read_record`].
    ReadRecord,
    /// [`VaultTransport::delete_record`].
    DeleteRecord,
}

/// Remote vault operations.
///
/// Every call except [`VaultTransport::register`] presents a token that must be signed,
/// unexpired, addressed to the caller and cover the operation.
#[async_trait]
pub trait VaultTransport: Send + Sync {
    /// Registers a builder.
    ///
    /// # Errors
    /// [`RemoteError::Duplicate`] if already registered.
    async fn register(&self, registration: &BuilderRegistration) -> Result<(), RemoteError>;

    /// Lists the collections visible to the token's holder.
    async fn list_collections(&self, token: &Token) -> Result<Vec<CollectionSummary>, RemoteError>;

    /// Creates a collection.
    ///
    /// # Errors
    /// [`RemoteError::Duplicate`] if the identifier or name is taken.
    async fn create_collection(
        &self,
        token: &Token,
        request: &CreateCollectionRequest,
    ) -> Result<(), RemoteError>;

    /// Creates a user-owned record and returns its storage identifier.
    async fn create_record(
        &self,
        token: &Token,
        request: &CreateRecordRequest,
    ) -> Result<String, RemoteError>;

    /// Lists the holder's record references, optionally within one collection.
    async fn list_record_references(
        &self,
        token: &Token,
        collection: Option<&str>,
    ) -> Result<Vec<RecordReference>, RemoteError>;

    /// Reads one record's body.
    async fn read_record(
        &self,
        token: &Token,
        reference: &RecordReference,
    ) -> Result<Value, RemoteError>;

    /// Deletes one record.
    async fn delete_record(
        &self,
        token: &Token,
        reference: &RecordReference,
    ) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    #[test_case(409, "conflict", true ; "conflict status")]
    #[test_case(500, "E11000 duplicate key error collection", true ; "mongo code")]
    #[test_case(400, "Builder already registered", true ; "registered")]
    #[test_case(400, "collection Already Exists", true ; "case insensitive")]
    #[test_case(400, "bad request", false ; "plain")]
    #[test_case(402, "already exists", false ; "subscription wins")]
    fn test_duplicate_detection(status: u16, message: &str, expected: bool) {
        assert_eq!(
            RemoteError::classify(status, message.to_string()).is_duplicate(),
            expected
        );
    }

    #[test]
    fn test_classify_statuses() {
        assert!(RemoteError::classify(402, String::new()).is_subscription_expired());
        assert!(matches!(
            RemoteError::classify(403, String::new()),
            RemoteError::Unauthorized { .. }
        ));
        assert!(matches!(
            RemoteError::classify(404, String::new()),
            RemoteError::NotFound { .. }
        ));
        assert_eq!(
            RemoteError::classify(418, "teapot".to_string()),
            RemoteError::Rejected {
                status: Some(418),
                message: "teapot".to_string()
            }
        );
    }

    #[test_case(json!({"id": "a", "_id": "b", "name": "c"}), Some("a") ; "id first")]
    #[test_case(json!({"_id": "b", "name": "c"}), Some("b") ; "underscore id")]
    #[test_case(json!({"id": "", "name": "c"}), Some("c") ; "blank id skipped")]
    #[test_case(json!({}), None ; "nothing")]
    fn test_collection_id_resolution(raw: Value, expected: Option<&str>) {
        let summary: CollectionSummary = serde_json::from_value(raw).unwrap();
        assert_eq!(summary.resolved_id(), expected);
    }

    #[test]
    fn test_owner_acl_shape() {
        let acl = AccessControl::owner(Did::from_verifying_key(
            &crate::identity::Keypair::from_secret_bytes(&[7; 32])
                .did()
                .verifying_key()
                .unwrap(),
        ));
        let value = serde_json::to_value(&acl).unwrap();
        assert_eq!(value["read"], true);
        assert_eq!(value["write"], true);
        assert_eq!(value["execute"], false);
        assert!(value["grantee"].as_str().unwrap().starts_with("did:vault:"));
    }

    #[test]
    fn test_reference_matches_document_or_name() {
        let reference = RecordReference {
            collection: "c".to_string(),
            document: "storage-1".to_string(),
            name: Some("app-1".to_string()),
        };
        assert!(reference.matches("storage-1"));
        assert!(reference.matches("app-1"));
        assert!(!reference.matches("other"));
    }
}
