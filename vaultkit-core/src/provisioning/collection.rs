use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    client::BuilderClient,
    delegation::DelegationIssuer,
    error::{VaultKitError, VaultKitResult},
    transport::{CollectionKind, CollectionSummary, CreateCollectionRequest, RemoteError},
};

/// Collection name used when none is configured.
pub const DEFAULT_COLLECTION_NAME: &str = "bookmarks";

/// Namespace of the deterministic fallback collection ids.
const FALLBACK_NAMESPACE: Uuid = Uuid::from_u128(0x6c0b_5f0e_2d4a_4c1e_9a57_3e8d_1f2b_7a90);

/// Where a resolved collection id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionSource {
    /// A collection with the configured name was already listed.
    Existing,
    /// This call created the collection.
    Created,
    /// Listing or creating failed; the id is derived locally and may not exist remotely.
    Fallback,
}

/// The collection records go to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCollection {
    /// Collection id.
    pub id: String,
    /// How the id was obtained.
    pub source: CollectionSource,
}

/// JSON schema of a stored bookmark.
#[must_use]
pub fn bookmark_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Bookmark",
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "_id": { "type": "string", "format": "uuid" },
                "id": { "type": "string" },
                "title": { "type": "string" },
                "url": { "type": "string" },
                "description": { "type": "string" },
                "image": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "archived": { "type": "boolean" },
                "favorite": { "type": "boolean" },
                "createdAt": { "type": "integer" }
            },
            "required": ["_id", "id", "title", "url", "archived", "favorite", "createdAt"]
        }
    })
}

/// Finds or creates the named record collection.
#[derive(Debug, Clone)]
pub struct CollectionProvisioner {
    name: String,
    issuer: DelegationIssuer,
}

impl CollectionProvisioner {
    /// Creates a provisioner for the collection called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, issuer: DelegationIssuer) -> Self {
        Self {
            name: name.into(),
            issuer,
        }
    }

    /// The collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves the collection id, creating the collection if it does not exist.
    ///
    /// A lost creation race adopts the winner's collection. Any other failure degrades to a
    /// deterministic id derived from the builder and `user_address`.
    ///
    /// # Errors
    /// - [`VaultKitError::SubscriptionExpired`] if the vault reports a lapsed subscription.
    /// - [`VaultKitError::ClientInitFailed`] if no token can be minted.
    pub async fn ensure_collection(
        &self,
        builder: &BuilderClient,
        user_address: &str,
    ) -> VaultKitResult<ResolvedCollection> {
        let token = builder.collections_token(&self.issuer)?;
        let transport = builder.transport();

        match transport.list_collections(&token).await {
            Ok(collections) => {
                if let Some(id) = self.find(&collections) {
                    log::debug!("using existing collection {id}");
                    return Ok(ResolvedCollection {
                        id,
                        source: CollectionSource::Existing,
                    });
                }
            }
            Err(err) => return self.degrade(err, builder, user_address),
        }

        let request = CreateCollectionRequest {
            id: Uuid::new_v4().to_string(),
            kind: CollectionKind::Owned,
            name: self.name.clone(),
            schema: bookmark_schema(),
        };
        match transport.create_collection(&token, &request).await {
            Ok(()) => {
                log::info!("created collection {} ({})", request.name, request.id);
                Ok(ResolvedCollection {
                    id: request.id,
                    source: CollectionSource::Created,
                })
            }
            Err(err) if err.is_duplicate() => {
                let winner = transport
                    .list_collections(&token)
                    .await
                    .ok()
                    .and_then(|collections| self.find(&collections));
                log::debug!("collection {} was created concurrently", self.name);
                Ok(winner.map_or(
                    ResolvedCollection {
                        id: request.id,
                        source: CollectionSource::Created,
                    },
                    |id| ResolvedCollection {
                        id,
                        source: CollectionSource::Existing,
                    },
                ))
            }
            Err(err) => self.degrade(err, builder, user_address),
        }
    }

    fn find(&self, collections: &[CollectionSummary]) -> Option<String> {
        collections
            .iter()
            .filter(|collection| collection.is_named(&self.name))
            .find_map(CollectionSummary::resolved_id)
            .map(ToString::to_string)
    }

    fn degrade(
        &self,
        err: RemoteError,
        builder: &BuilderClient,
        user_address: &str,
    ) -> VaultKitResult<ResolvedCollection> {
        if err.is_subscription_expired() {
            return Err(VaultKitError::from_remote(err, |reason| {
                VaultKitError::CollectionSetupFailed { reason }
            }));
        }
        let id = fallback_collection_id(&builder.identity().did().to_string(), user_address);
        log::warn!(
            "collection {} could not be resolved, using fallback {id}: {err}",
            self.name
        );
        Ok(ResolvedCollection {
            id,
            source: CollectionSource::Fallback,
        })
    }
}

fn fallback_collection_id(builder_did: &str, user_address: &str) -> String {
    Uuid::new_v5(
        &FALLBACK_NAMESPACE,
        format!("{builder_did}:{user_address}").as_bytes(),
    )
    .to_string()
}
