//! User-owned bookmark records.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    delegation::{Command, DelegationIssuer, Token},
    error::{VaultKitError, VaultKitResult},
    initializer::{VaultHandle, VaultInitializer},
    transport::{AccessControl, CreateRecordRequest, RecordReference},
    utils::{normalize_address, unix_now},
};

/// A stored bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    /// Identifier assigned by the vault.
    #[serde(rename = "_id")]
    pub storage_id: String,
    /// Identifier the application refers to the bookmark by.
    pub id: String,
    /// Title.
    pub title: String,
    /// Target URL.
    pub url: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Preview image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Archived flag.
    #[serde(default)]
    pub archived: bool,
    /// Favorite flag.
    #[serde(default)]
    pub favorite: bool,
    /// Creation time, unix seconds.
    pub created_at: u64,
}

impl Bookmark {
    /// The vault's document id is authoritative, whatever `_id` the body carries.
    fn stored_at(mut self, reference: &RecordReference) -> Self {
        self.storage_id.clone_from(&reference.document);
        self
    }
}

/// Input for [`RecordRepository::create`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBookmark {
    /// Title.
    pub title: String,
    /// Target URL.
    pub url: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Preview image URL.
    #[serde(default)]
    pub image: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Archived flag.
    #[serde(default)]
    pub archived: bool,
    /// Favorite flag.
    #[serde(default)]
    pub favorite: bool,
}

/// Partial update of a bookmark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkPatch {
    /// New title.
    pub title: Option<String>,
    /// New URL.
    pub url: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New image URL.
    pub image: Option<String>,
    /// New tags.
    pub tags: Option<Vec<String>>,
    /// New archived flag.
    pub archived: Option<bool>,
    /// New favorite flag.
    pub favorite: Option<bool>,
}

/// Bookmark operations on an initialized vault.
///
/// Every call needs a ready handle for the address, see [`VaultInitializer::initialize`].
/// Mutations present a delegation minted for that single call.
#[derive(Debug, Clone)]
pub struct RecordRepository {
    initializer: VaultInitializer,
    issuer: DelegationIssuer,
}

impl RecordRepository {
    /// Creates a repository over the handles of `initializer`.
    #[must_use]
    pub fn new(initializer: VaultInitializer) -> Self {
        let issuer = initializer.issuer();
        Self {
            initializer,
            issuer,
        }
    }

    /// Stores a new bookmark and returns its application id.
    ///
    /// # Errors
    /// - [`VaultKitError::VaultNotInitialized`] without a ready handle.
    /// - [`VaultKitError::CreateFailed`] if the vault rejects the record.
    pub async fn create(&self, user_address: &str, input: NewBookmark) -> VaultKitResult<String> {
        let handle = self.ready(user_address)?;
        let create_failed = |reason: String| VaultKitError::CreateFailed { reason };

        let bookmark = Bookmark {
            storage_id: Uuid::new_v4().to_string(),
            id: Uuid::new_v4().to_string(),
            title: input.title,
            url: input.url,
            description: input.description,
            image: input.image,
            tags: input.tags,
            archived: input.archived,
            favorite: input.favorite,
            created_at: unix_now(),
        };
        let data = serde_json::to_value(&bookmark).map_err(|err| create_failed(err.to_string()))?;
        let token = self
            .delegate(&handle, Command::CreateRecord)
            .map_err(create_failed)?;

        let owner = handle.user().identity().did().clone();
        let request = CreateRecordRequest {
            owner: owner.clone(),
            collection: handle.collection_id().to_string(),
            name: bookmark.id.clone(),
            acl: AccessControl::owner(owner),
            data,
        };
        let storage_id = handle
            .user()
            .transport()
            .create_record(&token, &request)
            .await
            .map_err(|err| VaultKitError::from_remote(err, create_failed))?;

        log::debug!("created bookmark {} (document {storage_id})", bookmark.id);
        Ok(bookmark.id)
    }

    /// Lists the user's bookmarks. Records that cannot be read or decoded are skipped.
    ///
    /// # Errors
    /// - [`VaultKitError::VaultNotInitialized`] without a ready handle.
    /// - [`VaultKitError::ReadFailed`] if the references cannot be listed.
    pub async fn list(&self, user_address: &str) -> VaultKitResult<Vec<Bookmark>> {
        let handle = self.ready(user_address)?;
        let token = self.invoke(&handle, read_failed)?;
        let references = self
            .references(&handle, &token, read_failed)
            .await?;

        let transport = handle.user().transport();
        let reads = references
            .iter()
            .map(|reference| transport.read_record(&token, reference));
        let bookmarks = join_all(reads)
            .await
            .into_iter()
            .zip(&references)
            .filter_map(|(result, reference)| {
                let decoded = result.map_err(|err| err.to_string()).and_then(|value| {
                    serde_json::from_value::<Bookmark>(value).map_err(|err| err.to_string())
                });
                match decoded {
                    Ok(bookmark) => Some(bookmark.stored_at(reference)),
                    Err(err) => {
                        log::warn!("skipping unreadable record {}: {err}", reference.document);
                        None
                    }
                }
            })
            .collect();
        Ok(bookmarks)
    }

    /// Reads one bookmark by application or storage id.
    ///
    /// # Errors
    /// - [`VaultKitError::VaultNotInitialized`] without a ready handle.
    /// - [`VaultKitError::BookmarkNotFound`] if no record matches `id`.
    /// - [`VaultKitError::ReadFailed`] if the record cannot be read or decoded.
    pub async fn read(&self, user_address: &str, id: &str) -> VaultKitResult<Bookmark> {
        let handle = self.ready(user_address)?;
        let token = self.invoke(&handle, read_failed)?;
        let reference = self
            .find(&handle, &token, id, read_failed)
            .await?;

        let value = handle
            .user()
            .transport()
            .read_record(&token, &reference)
            .await
            .map_err(|err| VaultKitError::from_remote(err, read_failed))?;
        serde_json::from_value::<Bookmark>(value)
            .map(|bookmark| bookmark.stored_at(&reference))
            .map_err(|err| VaultKitError::ReadFailed {
                reason: err.to_string(),
            })
    }

    /// Deletes one bookmark by application or storage id.
    ///
    /// # Errors
    /// - [`VaultKitError::VaultNotInitialized`] without a ready handle.
    /// - [`VaultKitError::BookmarkNotFound`] if no record matches `id`.
    /// - [`VaultKitError::DeleteFailed`] if the vault rejects the deletion.
    pub async fn delete(&self, user_address: &str, id: &str) -> VaultKitResult<()> {
        let handle = self.ready(user_address)?;
        let delete_failed = |reason: String| VaultKitError::DeleteFailed { reason };

        let lookup = self.invoke(&handle, delete_failed)?;
        let reference = self.find(&handle, &lookup, id, delete_failed).await?;
        let token = self
            .delegate(&handle, Command::DeleteRecord)
            .map_err(delete_failed)?;

        handle
            .user()
            .transport()
            .delete_record(&token, &reference)
            .await
            .map_err(|err| VaultKitError::from_remote(err, delete_failed))?;
        log::debug!("deleted bookmark {id}");
        Ok(())
    }

    /// Owned records cannot be changed in place, so this always fails.
    ///
    /// # Errors
    /// Always [`VaultKitError::UpdateNotImplemented`].
    pub const fn update(
        &self,
        _user_address: &str,
        _id: &str,
        _patch: &BookmarkPatch,
    ) -> VaultKitResult<()> {
        Err(VaultKitError::UpdateNotImplemented)
    }

    fn ready(&self, user_address: &str) -> VaultKitResult<VaultHandle> {
        let address = normalize_address(user_address).ok_or(VaultKitError::MissingUserAddress)?;
        self.initializer
            .handle(address)
            .ok_or(VaultKitError::VaultNotInitialized)
    }

    /// A fresh builder delegation to the user for `command`.
    fn delegate(&self, handle: &VaultHandle, command: Command) -> Result<Token, String> {
        let builder = handle.builder();
        let root = builder.root_credential().map_err(|err| err.to_string())?;
        self.issuer
            .issue(
                &root,
                builder.identity().keypair(),
                handle.user().identity().did(),
                command,
            )
            .map_err(|err| err.to_string())
    }

    fn invoke(
        &self,
        handle: &VaultHandle,
        wrap: impl FnOnce(String) -> VaultKitError,
    ) -> VaultKitResult<Token> {
        self.issuer
            .invoke(handle.user().identity().keypair(), Command::ReadRecord)
            .map_err(|err| wrap(err.to_string()))
    }

    async fn references(
        &self,
        handle: &VaultHandle,
        token: &Token,
        wrap: impl FnOnce(String) -> VaultKitError + Send,
    ) -> VaultKitResult<Vec<RecordReference>> {
        let collection = handle.collection_id();
        let references = handle
            .user()
            .transport()
            .list_record_references(token, Some(collection))
            .await
            .map_err(|err| VaultKitError::from_remote(err, wrap))?;
        Ok(references
            .into_iter()
            .filter(|reference| reference.collection == collection)
            .collect())
    }

    async fn find(
        &self,
        handle: &VaultHandle,
        token: &Token,
        id: &str,
        wrap: impl FnOnce(String) -> VaultKitError + Send,
    ) -> VaultKitResult<RecordReference> {
        self.references(handle, token, wrap)
            .await?
            .into_iter()
            .find(|reference| reference.matches(id))
            .ok_or_else(|| VaultKitError::BookmarkNotFound { id: id.to_string() })
    }
}

const fn read_failed(reason: String) -> VaultKitError {
    VaultKitError::ReadFailed { reason }
}
