use vaultkit_core::{session::Session, Bookmark, BookmarkPatch, NewBookmark};

/// A stored bookmark.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct BookmarkRecord {
    /// Identifier assigned by the vault.
    pub storage_id: String,
    /// Identifier the application refers to the bookmark by.
    pub id: String,
    /// Title.
    pub title: String,
    /// Target URL.
    pub url: String,
    /// Free-form description.
    pub description: String,
    /// Preview image URL.
    pub image: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
    /// Archived flag.
    pub archived: bool,
    /// Favorite flag.
    pub favorite: bool,
    /// Creation time, unix seconds.
    pub created_at: u64,
}

impl From<Bookmark> for BookmarkRecord {
    fn from(bookmark: Bookmark) -> Self {
        Self {
            storage_id: bookmark.storage_id,
            id: bookmark.id,
            title: bookmark.title,
            url: bookmark.url,
            description: bookmark.description,
            image: bookmark.image,
            tags: bookmark.tags,
            archived: bookmark.archived,
            favorite: bookmark.favorite,
            created_at: bookmark.created_at,
        }
    }
}

/// Input for a new bookmark.
#[derive(Debug, Clone, Default, PartialEq, Eq, uniffi::Record)]
pub struct BookmarkInput {
    /// Title.
    pub title: String,
    /// Target URL.
    pub url: String,
    /// Free-form description.
    pub description: String,
    /// Preview image URL.
    pub image: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
    /// Archived flag.
    pub archived: bool,
    /// Favorite flag.
    pub favorite: bool,
}

impl From<BookmarkInput> for NewBookmark {
    fn from(input: BookmarkInput) -> Self {
        Self {
            title: input.title,
            url: input.url,
            description: input.description,
            image: input.image,
            tags: input.tags,
            archived: input.archived,
            favorite: input.favorite,
        }
    }
}

/// Partial bookmark update.
#[derive(Debug, Clone, Default, PartialEq, Eq, uniffi::Record)]
pub struct BookmarkUpdate {
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

impl From<BookmarkUpdate> for BookmarkPatch {
    fn from(update: BookmarkUpdate) -> Self {
        Self {
            title: update.title,
            url: update.url,
            description: update.description,
            image: update.image,
            tags: update.tags,
            archived: update.archived,
            favorite: update.favorite,
        }
    }
}

/// The persisted session, as shown to the host.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct PersistedSession {
    /// Wallet address the vault was opened for.
    pub user_address: String,
    /// Collection holding the user's records.
    pub collection_id: String,
    /// DID of the builder that provisioned the session.
    pub builder_identity: String,
    /// Whether initialization completed.
    pub initialized: bool,
    /// When the session was created, unix seconds.
    pub created_at: u64,
}

impl From<Session> for PersistedSession {
    fn from(session: Session) -> Self {
        Self {
            user_address: session.user_address,
            collection_id: session.collection_id,
            builder_identity: session.builder_identity,
            initialized: session.initialized,
            created_at: session.created_at,
        }
    }
}

/// Snapshot of a [`crate::VaultSession`] for rendering.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct VaultSessionState {
    /// A vault handle is ready for the current address.
    pub is_initialized: bool,
    /// Initialization is running for the current address.
    pub is_initializing: bool,
    /// Message to show for the last failure.
    pub error: Option<String>,
    /// Stable code of the last failure.
    pub error_code: Option<String>,
    /// Whether offering a retry makes sense.
    pub can_retry: bool,
    /// The persisted session, if any.
    pub session: Option<PersistedSession>,
}
