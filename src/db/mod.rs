//! Persistence contracts consumed by the recommendation engine
//!
//! Every collaborator the engine talks to sits behind one of these traits so the
//! engine can run against PostgreSQL/Redis in production and against the
//! in-memory maps in tests and local development.
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        ContentItem, Counter, InteractionEntry, InteractionKind, NewContent, Page,
        SimilarityIndex, SuggestionList,
    },
};

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::{MemoryContentStore, MemoryDerivedStore, MemoryIdentity, MemoryInteractions};
pub use postgres::{create_pool, PgContentStore, PgIdentity, PgInteractions};
pub use redis::{create_redis_client, RedisDerivedStore};

/// Content documents and their engagement counters
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    /// Persists a new item built from the ingestion payload
    async fn create(&self, new: NewContent, trending_val: f64) -> AppResult<ContentItem>;

    async fn get(&self, id: Uuid) -> AppResult<Option<ContentItem>>;

    /// Fetches several items; unknown ids are skipped, order is not guaranteed
    async fn get_many(&self, ids: &[Uuid]) -> AppResult<Vec<ContentItem>>;

    /// Published, non-deleted items of one source, newest first
    async fn list_by_source(&self, source: &str, page: Page) -> AppResult<Vec<ContentItem>>;

    /// Non-deleted, non-hidden items by trending score, highest first
    async fn list_trending(&self, page: Page) -> AppResult<Vec<ContentItem>>;

    /// Atomically adds `delta` to a counter (saturating at zero) and returns the
    /// post-mutation item, or `None` if the item does not exist
    async fn increment(
        &self,
        id: Uuid,
        counter: Counter,
        delta: i64,
    ) -> AppResult<Option<ContentItem>>;

    async fn set_trending(&self, id: Uuid, trending_val: f64) -> AppResult<()>;

    /// Returns false when the item does not exist
    async fn set_hidden(&self, id: Uuid, hidden: bool) -> AppResult<bool>;

    /// Returns false when the item does not exist
    async fn set_deleted(&self, id: Uuid) -> AppResult<bool>;

    /// Visible items sharing at least one of the given tags or keywords
    async fn find_related(
        &self,
        tags: &[String],
        keywords: &[String],
        limit: usize,
    ) -> AppResult<Vec<ContentItem>>;
}

/// Durable backing for the per-user viewed / ignored sets
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait InteractionRepository: Send + Sync {
    /// Inserts or refreshes an entry; true when the entry did not exist before
    async fn upsert(&self, kind: InteractionKind, entry: InteractionEntry) -> AppResult<bool>;

    /// Deletes an entry; true when something was removed
    async fn remove(&self, kind: InteractionKind, user_id: Uuid, content_id: Uuid)
        -> AppResult<bool>;

    async fn list(&self, kind: InteractionKind, user_id: Uuid) -> AppResult<Vec<InteractionEntry>>;

    /// One set for several users in a single round trip; users without entries
    /// are absent from the map
    async fn list_many(
        &self,
        kind: InteractionKind,
        user_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, Vec<InteractionEntry>>>;

    /// Distinct other users with any interaction on one of `content_ids`
    async fn peers(
        &self,
        user_id: Uuid,
        content_ids: &[Uuid],
        limit: usize,
    ) -> AppResult<Vec<Uuid>>;
}

/// Storage for the derived per-user caches
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DerivedStore: Send + Sync {
    async fn similarity(&self, user_id: Uuid) -> AppResult<Option<SimilarityIndex>>;

    async fn put_similarity(&self, index: &SimilarityIndex) -> AppResult<()>;

    async fn suggestions(&self, user_id: Uuid) -> AppResult<Option<SuggestionList>>;

    async fn put_suggestions(&self, list: &SuggestionList) -> AppResult<()>;
}

/// Resolves user ids to known identities
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn exists(&self, user_id: Uuid) -> AppResult<bool>;

    async fn register(&self, user_id: Uuid) -> AppResult<()>;
}

/// The full set of collaborators an engine is built from
#[derive(Clone)]
pub struct Stores {
    pub content: Arc<dyn ContentStore>,
    pub interactions: Arc<dyn InteractionRepository>,
    pub derived: Arc<dyn DerivedStore>,
    pub identity: Arc<dyn IdentityResolver>,
}

impl Stores {
    /// Process-local stores, used for tests and the `memory` backend
    pub fn in_memory() -> Self {
        Self {
            content: Arc::new(MemoryContentStore::new()),
            interactions: Arc::new(MemoryInteractions::new()),
            derived: Arc::new(MemoryDerivedStore::new()),
            identity: Arc::new(MemoryIdentity::new()),
        }
    }
}
