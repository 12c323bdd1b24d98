use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{ContentStore, IdentityResolver, InteractionRepository, Stores},
    error::{AppError, AppResult},
    models::{
        ContentItem, Counter, InteractionEntry, InteractionKind, NewContent, Page,
        Recommendations,
    },
    services::{
        locks::UserLocks,
        recompute::{spawn_worker, RecomputePipeline, RecomputeQueue, RecomputeWorkerHandle},
        similarity::{SimilarityConfig, SimilarityEngine},
        suggestions::{SuggestionConfig, SuggestionEngine},
        trending::{TrendingConfig, TrendingScorer},
    },
};

/// How "read recommendations" requests are served
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Recompute similars and suggestions, then read
    Immediate,
    /// Read the last persisted generation as is
    Lazy,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub read_mode: ReadMode,
    /// Whether interaction feedback schedules a background recompute
    pub update_on_action: bool,
    pub page_size: usize,
    pub recompute_timeout: Duration,
    pub trending: TrendingConfig,
    pub similarity: SimilarityConfig,
    pub suggestion: SuggestionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_mode: ReadMode::Immediate,
            update_on_action: false,
            page_size: 12,
            recompute_timeout: Duration::from_secs(5),
            trending: TrendingConfig::default(),
            similarity: SimilarityConfig::default(),
            suggestion: SuggestionConfig::default(),
        }
    }
}

/// Lifecycle handle returned alongside the engine
pub struct EngineHandle {
    worker: RecomputeWorkerHandle,
}

impl EngineHandle {
    /// Waits for scheduled and in-flight recomputes, then stops the worker
    pub async fn shutdown(self) {
        self.worker.shutdown().await;
        tracing::info!("Recommendation engine stopped");
    }
}

/// Recommendation and trending engine
///
/// Constructed once at startup and shared by reference with the routing layer.
/// All per-user mutations and recomputes go through the same [`UserLocks`], so
/// requests for one user are serialized while different users proceed in
/// parallel.
pub struct Engine {
    config: EngineConfig,
    content: Arc<dyn ContentStore>,
    interactions: Arc<dyn InteractionRepository>,
    identity: Arc<dyn IdentityResolver>,
    scorer: TrendingScorer,
    suggestions: Arc<SuggestionEngine>,
    pipeline: RecomputePipeline,
    queue: RecomputeQueue,
    locks: UserLocks,
}

/// One of the two interaction sets, bound to an engine
///
/// Obtained through [`Engine::views`] and [`Engine::ignored`].
pub struct InteractionSet<'a> {
    engine: &'a Engine,
    kind: InteractionKind,
}

impl InteractionSet<'_> {
    /// Upserts `content_id` into this set for `user_id`, taking it out of the
    /// other set first so an item is never both viewed and ignored
    ///
    /// Fails with `InvalidUser` for an unknown user and `NotFound` for unknown
    /// content. With `trigger_recompute` a background recompute is scheduled
    /// once the entry is stored.
    pub async fn add(&self, user_id: Uuid, content_id: Uuid, trigger_recompute: bool) -> AppResult<()> {
        self.engine.ensure_user(user_id).await?;
        self.engine.ensure_content(content_id).await?;
        self.engine.move_to(self.kind, user_id, content_id).await?;
        self.engine.after_mutation(user_id, trigger_recompute);
        Ok(())
    }

    /// Removes `content_id` from this set; absent entries and unknown content
    /// are a no-op
    pub async fn remove(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        trigger_recompute: bool,
    ) -> AppResult<()> {
        self.engine.ensure_user(user_id).await?;
        {
            let _guard = self.engine.locks.acquire(user_id).await;
            self.engine.apply_remove(self.kind, user_id, content_id).await?;
        }
        self.engine.after_mutation(user_id, trigger_recompute);
        Ok(())
    }

    pub async fn list(&self, user_id: Uuid) -> AppResult<Vec<InteractionEntry>> {
        self.engine.interactions.list(self.kind, user_id).await
    }
}

impl Engine {
    /// Builds the engine and starts its background recompute worker
    pub fn new(config: EngineConfig, stores: Stores) -> (Self, EngineHandle) {
        let locks = UserLocks::new();
        let similars = Arc::new(SimilarityEngine::new(
            stores.content.clone(),
            stores.interactions.clone(),
            stores.derived.clone(),
            config.similarity.clone(),
        ));
        let suggestions = Arc::new(SuggestionEngine::new(
            stores.content.clone(),
            stores.interactions.clone(),
            stores.derived.clone(),
            config.similarity.clone(),
            config.suggestion.clone(),
        ));
        let pipeline = RecomputePipeline::new(similars, suggestions.clone(), locks.clone());
        let (queue, worker) = spawn_worker(pipeline.clone());

        tracing::info!(
            read_mode = ?config.read_mode,
            update_on_action = config.update_on_action,
            timeout_ms = config.recompute_timeout.as_millis() as u64,
            "Recommendation engine ready"
        );

        let engine = Self {
            scorer: TrendingScorer::new(config.trending.clone()),
            config,
            content: stores.content,
            interactions: stores.interactions,
            identity: stores.identity,
            suggestions,
            pipeline,
            queue,
            locks,
        };

        (engine, EngineHandle { worker })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn views(&self) -> InteractionSet<'_> {
        InteractionSet {
            engine: self,
            kind: InteractionKind::Viewed,
        }
    }

    pub fn ignored(&self) -> InteractionSet<'_> {
        InteractionSet {
            engine: self,
            kind: InteractionKind::Ignored,
        }
    }

    /// Registers an identity so interaction calls accept it
    pub async fn register_user(&self, user_id: Uuid) -> AppResult<()> {
        self.identity.register(user_id).await
    }

    pub async fn user_exists(&self, user_id: Uuid) -> AppResult<bool> {
        self.identity.exists(user_id).await
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    /// Ingests a new item, published and with a fresh trending score
    #[instrument(skip(self, new), fields(source = %new.source))]
    pub async fn create_content(&self, new: NewContent) -> AppResult<ContentItem> {
        if new.title.trim().is_empty() || new.source.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "title and source are required".to_string(),
            ));
        }

        let initial = self.scorer.score(0.0, 0.0, chrono::Duration::zero());
        let item = self.content.create(new, initial).await?;
        tracing::info!(content_id = %item.id, slug = %item.slug, "Content created");
        Ok(item)
    }

    pub async fn list_by_source(&self, source: &str, page: usize) -> AppResult<Vec<ContentItem>> {
        if source.trim().is_empty() {
            return Err(AppError::InvalidInput("source not provided".to_string()));
        }
        let page = self.page(page)?;
        self.content.list_by_source(source, page).await
    }

    pub async fn trending(&self, page: usize) -> AppResult<Vec<ContentItem>> {
        let page = self.page(page)?;
        self.content.list_trending(page).await
    }

    /// Soft-deletes an item from listings
    pub async fn hide(&self, content_id: Uuid) -> AppResult<()> {
        if !self.content.set_hidden(content_id, true).await? {
            return Err(AppError::NotFound(format!("content {}", content_id)));
        }
        tracing::info!(content_id = %content_id, "Content hidden");
        Ok(())
    }

    /// Counts a view and, for a signed-in user, moves the item from ignored to
    /// viewed. Returns the item with its refreshed trending score.
    #[instrument(skip(self))]
    pub async fn record_view(&self, user_id: Option<Uuid>, content_id: Uuid) -> AppResult<ContentItem> {
        if let Some(user_id) = user_id {
            self.ensure_user(user_id).await?;
        }

        let item = self.bump(content_id, Counter::Views, 1).await?;

        if let Some(user_id) = user_id {
            self.move_to(InteractionKind::Viewed, user_id, content_id).await?;
            self.after_mutation(user_id, self.config.update_on_action);
        }
        Ok(item)
    }

    /// Moves the item from viewed to ignored and counts the ignore
    #[instrument(skip(self))]
    pub async fn record_ignore(&self, user_id: Uuid, content_id: Uuid) -> AppResult<()> {
        self.ensure_user(user_id).await?;
        self.bump(content_id, Counter::Ignores, 1).await?;

        self.move_to(InteractionKind::Ignored, user_id, content_id).await?;
        self.after_mutation(user_id, self.config.update_on_action);
        Ok(())
    }

    /// Adjusts the global save counter; saves are not tracked per user
    #[instrument(skip(self))]
    pub async fn record_save(&self, content_id: Uuid, saved: bool) -> AppResult<ContentItem> {
        self.bump(content_id, Counter::Saves, if saved { 1 } else { -1 })
            .await
    }

    // ------------------------------------------------------------------
    // Recommendations
    // ------------------------------------------------------------------

    /// Reads a page of recommendations in the configured mode
    #[instrument(skip(self))]
    pub async fn get_recommendations(&self, user_id: Uuid, page: usize) -> AppResult<Recommendations> {
        if self.config.read_mode == ReadMode::Immediate {
            self.recompute_bounded(user_id).await?;
        }

        let ids = self
            .suggestions
            .for_user(user_id, page.max(1), self.config.page_size)
            .await?;
        if ids.is_empty() {
            return Ok(Recommendations::Empty);
        }

        // get_many gives no ordering guarantee; restore the ranked order
        let mut by_id: HashMap<Uuid, ContentItem> = self
            .content
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();
        let items: Vec<ContentItem> = ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .filter(|item| item.flags.is_visible())
            .collect();

        if items.is_empty() {
            Ok(Recommendations::Empty)
        } else {
            Ok(Recommendations::Items(items))
        }
    }

    /// Forces an immediate recompute without reading a page
    #[instrument(skip(self))]
    pub async fn refresh(&self, user_id: Uuid) -> AppResult<()> {
        self.recompute_bounded(user_id).await?;
        tracing::info!(user_id = %user_id, "Recommendations refreshed");
        Ok(())
    }

    /// Runs the recompute chain on its own task and waits at most the
    /// configured timeout for it
    ///
    /// Dropping or timing out the wait leaves the task running; its result
    /// still becomes the persisted generation.
    async fn recompute_bounded(&self, user_id: Uuid) -> AppResult<()> {
        let pipeline = self.pipeline.clone();
        let task = tokio::spawn(async move { pipeline.run(user_id).await });

        match tokio::time::timeout(self.config.recompute_timeout, task).await {
            Ok(Ok(result)) => result.map(|_| ()),
            Ok(Err(e)) => Err(AppError::Internal(format!("recompute task failed: {}", e))),
            Err(_) => {
                tracing::warn!(
                    user_id = %user_id,
                    timeout_ms = self.config.recompute_timeout.as_millis() as u64,
                    "Recompute exceeded its bound"
                );
                Err(AppError::RecomputeTimeout(
                    self.config.recompute_timeout.as_millis() as u64,
                ))
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn page(&self, number: usize) -> AppResult<Page> {
        if number == 0 {
            return Err(AppError::InvalidInput("page must be at least 1".to_string()));
        }
        Ok(Page::new(number, self.config.page_size))
    }

    async fn ensure_user(&self, user_id: Uuid) -> AppResult<()> {
        if self.identity.exists(user_id).await? {
            Ok(())
        } else {
            Err(AppError::InvalidUser(user_id.to_string()))
        }
    }

    async fn ensure_content(&self, content_id: Uuid) -> AppResult<()> {
        match self.content.get(content_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("content {}", content_id))),
        }
    }

    /// Applies a counter delta and rescores the item from the post-increment
    /// counters
    async fn bump(&self, content_id: Uuid, counter: Counter, delta: i64) -> AppResult<ContentItem> {
        let mut item = self
            .content
            .increment(content_id, counter, delta)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("content {}", content_id)))?;

        item.trending_val = self.scorer.score_item(&item, Utc::now());
        self.content.set_trending(item.id, item.trending_val).await?;

        tracing::debug!(
            content_id = %content_id,
            counter = counter.column(),
            trending_val = item.trending_val,
            "Counter updated"
        );
        Ok(item)
    }

    async fn apply_add(&self, kind: InteractionKind, user_id: Uuid, content_id: Uuid) -> AppResult<()> {
        let created = self
            .interactions
            .upsert(kind, InteractionEntry::now(user_id, content_id))
            .await?;
        tracing::debug!(
            user_id = %user_id,
            content_id = %content_id,
            set = %kind,
            created,
            "Interaction stored"
        );
        Ok(())
    }

    async fn apply_remove(&self, kind: InteractionKind, user_id: Uuid, content_id: Uuid) -> AppResult<()> {
        let removed = self.interactions.remove(kind, user_id, content_id).await?;
        tracing::debug!(
            user_id = %user_id,
            content_id = %content_id,
            set = %kind,
            removed,
            "Interaction removed"
        );
        Ok(())
    }

    /// Removes the item from the opposite set and adds it to `kind` while
    /// holding the user's lock, so no other request for the user observes or
    /// interleaves with the intermediate state
    async fn move_to(&self, kind: InteractionKind, user_id: Uuid, content_id: Uuid) -> AppResult<()> {
        let _guard = self.locks.acquire(user_id).await;
        self.apply_remove(kind.opposite(), user_id, content_id).await?;
        self.apply_add(kind, user_id, content_id).await
    }

    fn after_mutation(&self, user_id: Uuid, trigger_recompute: bool) {
        if trigger_recompute && self.queue.schedule(user_id) {
            tracing::debug!(user_id = %user_id, "Background recompute scheduled");
        }
    }
}
