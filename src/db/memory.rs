//! In-memory store backends
//!
//! Backed by `DashMap` so concurrent requests for different users or items only
//! contend on the shard they touch. Counter increments mutate the entry while its
//! shard guard is held, which makes them atomic per item.

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::{
    db::{ContentStore, DerivedStore, IdentityResolver, InteractionRepository},
    error::AppResult,
    models::{
        normalize_term, ContentItem, Counter, InteractionEntry, InteractionKind, NewContent,
        Page, SimilarityIndex, SuggestionList,
    },
};

fn paginate(items: Vec<ContentItem>, page: Page) -> Vec<ContentItem> {
    items
        .into_iter()
        .skip(page.offset())
        .take(page.size)
        .collect()
}

#[derive(Default)]
pub struct MemoryContentStore {
    items: DashMap<Uuid, ContentItem>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ContentStore for MemoryContentStore {
    async fn create(&self, new: NewContent, trending_val: f64) -> AppResult<ContentItem> {
        let mut item = ContentItem::from_new(new, Utc::now());
        item.trending_val = trending_val;
        self.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<ContentItem>> {
        Ok(self.items.get(&id).map(|entry| entry.value().clone()))
    }

    async fn get_many(&self, ids: &[Uuid]) -> AppResult<Vec<ContentItem>> {
        Ok(ids
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| self.items.get(id).map(|entry| entry.value().clone()))
            .collect())
    }

    async fn list_by_source(&self, source: &str, page: Page) -> AppResult<Vec<ContentItem>> {
        let mut items: Vec<ContentItem> = self
            .items
            .iter()
            .filter(|entry| {
                let item = entry.value();
                item.source == source && item.flags.published && !item.flags.deleted
            })
            .map(|entry| entry.value().clone())
            .collect();

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(items, page))
    }

    async fn list_trending(&self, page: Page) -> AppResult<Vec<ContentItem>> {
        let mut items: Vec<ContentItem> = self
            .items
            .iter()
            .filter(|entry| !entry.flags.deleted && !entry.flags.hidden)
            .map(|entry| entry.value().clone())
            .collect();

        items.sort_by(|a, b| {
            b.trending_val
                .total_cmp(&a.trending_val)
                .then(a.id.cmp(&b.id))
        });
        Ok(paginate(items, page))
    }

    async fn increment(
        &self,
        id: Uuid,
        counter: Counter,
        delta: i64,
    ) -> AppResult<Option<ContentItem>> {
        Ok(self.items.get_mut(&id).map(|mut entry| {
            entry.counters.apply(counter, delta);
            entry.value().clone()
        }))
    }

    async fn set_trending(&self, id: Uuid, trending_val: f64) -> AppResult<()> {
        if let Some(mut entry) = self.items.get_mut(&id) {
            entry.trending_val = trending_val;
        }
        Ok(())
    }

    async fn set_hidden(&self, id: Uuid, hidden: bool) -> AppResult<bool> {
        Ok(self
            .items
            .get_mut(&id)
            .map(|mut entry| entry.flags.hidden = hidden)
            .is_some())
    }

    async fn set_deleted(&self, id: Uuid) -> AppResult<bool> {
        Ok(self
            .items
            .get_mut(&id)
            .map(|mut entry| entry.flags.deleted = true)
            .is_some())
    }

    async fn find_related(
        &self,
        tags: &[String],
        keywords: &[String],
        limit: usize,
    ) -> AppResult<Vec<ContentItem>> {
        let tags: Vec<String> = tags.iter().map(|t| normalize_term(t)).collect();
        let keywords: Vec<String> = keywords.iter().map(|k| normalize_term(k)).collect();

        let mut items: Vec<ContentItem> = self
            .items
            .iter()
            .filter(|entry| entry.flags.is_visible())
            .filter(|entry| {
                tags.iter().any(|t| entry.tags.contains(t))
                    || keywords.iter().any(|k| entry.keywords.contains(k))
            })
            .map(|entry| entry.value().clone())
            .collect();

        items.sort_by(|a, b| {
            b.trending_val
                .total_cmp(&a.trending_val)
                .then(a.id.cmp(&b.id))
        });
        items.truncate(limit);
        Ok(items)
    }
}

/// Both interaction sets of one user
#[derive(Default, Clone)]
struct UserSets {
    viewed: HashMap<Uuid, InteractionEntry>,
    ignored: HashMap<Uuid, InteractionEntry>,
}

impl UserSets {
    fn set_mut(&mut self, kind: InteractionKind) -> &mut HashMap<Uuid, InteractionEntry> {
        match kind {
            InteractionKind::Viewed => &mut self.viewed,
            InteractionKind::Ignored => &mut self.ignored,
        }
    }

    fn set(&self, kind: InteractionKind) -> &HashMap<Uuid, InteractionEntry> {
        match kind {
            InteractionKind::Viewed => &self.viewed,
            InteractionKind::Ignored => &self.ignored,
        }
    }

    fn touches(&self, content_id: &Uuid) -> bool {
        self.viewed.contains_key(content_id) || self.ignored.contains_key(content_id)
    }
}

#[derive(Default)]
pub struct MemoryInteractions {
    users: DashMap<Uuid, UserSets>,
}

impl MemoryInteractions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl InteractionRepository for MemoryInteractions {
    async fn upsert(&self, kind: InteractionKind, entry: InteractionEntry) -> AppResult<bool> {
        let mut sets = self.users.entry(entry.user_id).or_default();
        Ok(sets.set_mut(kind).insert(entry.content_id, entry).is_none())
    }

    async fn remove(
        &self,
        kind: InteractionKind,
        user_id: Uuid,
        content_id: Uuid,
    ) -> AppResult<bool> {
        Ok(self
            .users
            .get_mut(&user_id)
            .map(|mut sets| sets.set_mut(kind).remove(&content_id).is_some())
            .unwrap_or(false))
    }

    async fn list(&self, kind: InteractionKind, user_id: Uuid) -> AppResult<Vec<InteractionEntry>> {
        let mut entries: Vec<InteractionEntry> = self
            .users
            .get(&user_id)
            .map(|sets| sets.set(kind).values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.content_id.cmp(&b.content_id));
        Ok(entries)
    }

    async fn list_many(
        &self,
        kind: InteractionKind,
        user_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, Vec<InteractionEntry>>> {
        let mut by_user = HashMap::new();
        for user_id in user_ids {
            let Some(sets) = self.users.get(user_id) else {
                continue;
            };
            let mut entries: Vec<InteractionEntry> = sets.set(kind).values().cloned().collect();
            if entries.is_empty() {
                continue;
            }
            entries.sort_by(|a, b| a.content_id.cmp(&b.content_id));
            by_user.insert(*user_id, entries);
        }
        Ok(by_user)
    }

    async fn peers(
        &self,
        user_id: Uuid,
        content_ids: &[Uuid],
        limit: usize,
    ) -> AppResult<Vec<Uuid>> {
        let mut peers: Vec<Uuid> = self
            .users
            .iter()
            .filter(|entry| *entry.key() != user_id)
            .filter(|entry| content_ids.iter().any(|id| entry.value().touches(id)))
            .map(|entry| *entry.key())
            .collect();
        peers.sort();
        peers.truncate(limit);
        Ok(peers)
    }
}

#[derive(Default)]
pub struct MemoryDerivedStore {
    similarity: DashMap<Uuid, SimilarityIndex>,
    suggestions: DashMap<Uuid, SuggestionList>,
}

impl MemoryDerivedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DerivedStore for MemoryDerivedStore {
    async fn similarity(&self, user_id: Uuid) -> AppResult<Option<SimilarityIndex>> {
        Ok(self.similarity.get(&user_id).map(|entry| entry.value().clone()))
    }

    async fn put_similarity(&self, index: &SimilarityIndex) -> AppResult<()> {
        self.similarity.insert(index.user_id, index.clone());
        Ok(())
    }

    async fn suggestions(&self, user_id: Uuid) -> AppResult<Option<SuggestionList>> {
        Ok(self.suggestions.get(&user_id).map(|entry| entry.value().clone()))
    }

    async fn put_suggestions(&self, list: &SuggestionList) -> AppResult<()> {
        self.suggestions.insert(list.user_id, list.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryIdentity {
    users: DashSet<Uuid>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl IdentityResolver for MemoryIdentity {
    async fn exists(&self, user_id: Uuid) -> AppResult<bool> {
        Ok(self.users.contains(&user_id))
    }

    async fn register(&self, user_id: Uuid) -> AppResult<()> {
        self.users.insert(user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_content(title: &str, tags: &[&str]) -> NewContent {
        NewContent {
            title: title.to_string(),
            source: "wire".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_increment_unknown_item_is_none() {
        let store = MemoryContentStore::new();
        let result = store.increment(Uuid::new_v4(), Counter::Views, 1).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_increment_returns_post_mutation_counters() {
        let store = MemoryContentStore::new();
        let item = store.create(new_content("a", &[]), 0.0).await.unwrap();

        store.increment(item.id, Counter::Views, 1).await.unwrap();
        let updated = store.increment(item.id, Counter::Views, 1).await.unwrap().unwrap();
        assert_eq!(updated.counters.views, 2);
    }

    #[tokio::test]
    async fn test_deleted_items_leave_every_listing() {
        let store = MemoryContentStore::new();
        let kept = store.create(new_content("kept", &["rust"]), 0.0).await.unwrap();
        let gone = store.create(new_content("gone", &["rust"]), 1.0).await.unwrap();

        assert!(store.set_deleted(gone.id).await.unwrap());
        assert!(!store.set_deleted(Uuid::new_v4()).await.unwrap());

        let by_source = store.list_by_source("wire", Page::new(1, 10)).await.unwrap();
        let trending = store.list_trending(Page::new(1, 10)).await.unwrap();
        let related = store
            .find_related(&["rust".to_string()], &[], 10)
            .await
            .unwrap();
        for listing in [by_source, trending, related] {
            let ids: Vec<Uuid> = listing.iter().map(|i| i.id).collect();
            assert_eq!(ids, vec![kept.id]);
        }
    }

    #[tokio::test]
    async fn test_trending_excludes_hidden_and_orders_desc() {
        let store = MemoryContentStore::new();
        let low = store.create(new_content("low", &[]), 0.1).await.unwrap();
        let high = store.create(new_content("high", &[]), 0.9).await.unwrap();
        let hidden = store.create(new_content("hidden", &[]), 5.0).await.unwrap();
        store.set_hidden(hidden.id, true).await.unwrap();

        let page = store.list_trending(Page::new(1, 10)).await.unwrap();
        let ids: Vec<Uuid> = page.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![high.id, low.id]);
    }

    #[tokio::test]
    async fn test_find_related_matches_tags() {
        let store = MemoryContentStore::new();
        let rust = store.create(new_content("rust", &["rust"]), 0.0).await.unwrap();
        store.create(new_content("go", &["go"]), 0.0).await.unwrap();

        let related = store
            .find_related(&["rust".to_string()], &[], 10)
            .await
            .unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, rust.id);
    }

    #[tokio::test]
    async fn test_find_related_ignores_case() {
        let store = MemoryContentStore::new();
        let item = store.create(new_content("a", &["World"]), 0.0).await.unwrap();

        let related = store
            .find_related(&["WORLD".to_string()], &[], 10)
            .await
            .unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, item.id);
    }

    #[tokio::test]
    async fn test_list_many_groups_by_user() {
        let store = MemoryInteractions::new();
        let (a, b, idle) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for content in [Uuid::new_v4(), Uuid::new_v4()] {
            store
                .upsert(InteractionKind::Viewed, InteractionEntry::now(a, content))
                .await
                .unwrap();
        }
        store
            .upsert(InteractionKind::Viewed, InteractionEntry::now(b, Uuid::new_v4()))
            .await
            .unwrap();

        let by_user = store
            .list_many(InteractionKind::Viewed, &[a, b, idle])
            .await
            .unwrap();
        assert_eq!(by_user.len(), 2);
        assert_eq!(by_user[&a].len(), 2);
        assert_eq!(by_user[&b].len(), 1);
        assert!(store
            .list_many(InteractionKind::Ignored, &[a, b])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_upsert_reports_creation_once() {
        let repo = MemoryInteractions::new();
        let user = Uuid::new_v4();
        let content = Uuid::new_v4();

        let first = repo
            .upsert(InteractionKind::Viewed, InteractionEntry::now(user, content))
            .await
            .unwrap();
        let second = repo
            .upsert(InteractionKind::Viewed, InteractionEntry::now(user, content))
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(repo.list(InteractionKind::Viewed, user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_peers_excludes_self() {
        let repo = MemoryInteractions::new();
        let user = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let content = Uuid::new_v4();

        repo.upsert(InteractionKind::Viewed, InteractionEntry::now(user, content))
            .await
            .unwrap();
        repo.upsert(InteractionKind::Ignored, InteractionEntry::now(peer, content))
            .await
            .unwrap();

        let peers = repo.peers(user, &[content], 10).await.unwrap();
        assert_eq!(peers, vec![peer]);
    }
}
