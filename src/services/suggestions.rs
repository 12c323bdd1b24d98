use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{ContentStore, DerivedStore, InteractionRepository},
    error::{AppError, AppResult},
    models::{ContentItem, Page, SimilarityIndex, SuggestionList},
    services::{
        profile::FeatureVector,
        similarity::{fill_content, load_histories, load_history, SimilarityConfig},
    },
};

#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionConfig {
    /// Weight of user/content similarity in the combined score
    pub alpha: f64,
    /// Weight of the content's trending score
    pub beta: f64,
    pub max_suggestions: usize,
    /// Upper bound on content pulled in by profile terms
    pub related_pool: usize,
    /// Leave already viewed content out of the list
    pub exclude_viewed: bool,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 0.5,
            max_suggestions: 240,
            related_pool: 100,
            exclude_viewed: true,
        }
    }
}

/// Net support of similar peers for one content item
#[derive(Debug, Default, Clone, Copy)]
struct PeerSupport {
    sum: f64,
    voters: usize,
}

impl PeerSupport {
    fn value(&self) -> f64 {
        if self.voters == 0 {
            0.0
        } else {
            (self.sum / self.voters as f64).clamp(0.0, 1.0)
        }
    }
}

#[derive(Debug, Clone)]
struct Scored {
    content_id: Uuid,
    score: f64,
}

/// Builds, persists and serves the per-user ranked suggestion list
pub struct SuggestionEngine {
    content: Arc<dyn ContentStore>,
    interactions: Arc<dyn InteractionRepository>,
    derived: Arc<dyn DerivedStore>,
    similarity: SimilarityConfig,
    config: SuggestionConfig,
}

impl SuggestionEngine {
    pub fn new(
        content: Arc<dyn ContentStore>,
        interactions: Arc<dyn InteractionRepository>,
        derived: Arc<dyn DerivedStore>,
        similarity: SimilarityConfig,
        config: SuggestionConfig,
    ) -> Self {
        Self {
            content,
            interactions,
            derived,
            similarity,
            config,
        }
    }

    /// Replaces the user's suggestion list with a new generation computed from
    /// the persisted similarity index and current trending scores
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn update(&self, user_id: Uuid) -> AppResult<SuggestionList> {
        let index = self
            .derived
            .similarity(user_id)
            .await?
            .unwrap_or_else(|| SimilarityIndex::empty(user_id));
        let previous = self.derived.suggestions(user_id).await?;

        let items = self.rank(user_id, &index).await?;
        let list = SuggestionList {
            user_id,
            generation: previous.map(|p| p.generation + 1).unwrap_or(1),
            items,
            computed_at: Utc::now(),
        };
        self.derived.put_suggestions(&list).await?;

        tracing::debug!(
            generation = list.generation,
            items = list.items.len(),
            "Suggestion list updated"
        );
        Ok(list)
    }

    /// Slice of the persisted generation; never recomputes
    ///
    /// Returns an empty sequence both for a user without any generation yet and
    /// for a page past the end of the list.
    pub async fn for_user(&self, user_id: Uuid, page: usize, page_size: usize) -> AppResult<Vec<Uuid>> {
        if page == 0 || page_size == 0 {
            return Err(AppError::InvalidInput(
                "page and page size must be at least 1".to_string(),
            ));
        }

        Ok(self
            .derived
            .suggestions(user_id)
            .await?
            .map(|list| list.page(Page::new(page, page_size)))
            .unwrap_or_default())
    }

    async fn rank(&self, user_id: Uuid, index: &SimilarityIndex) -> AppResult<Vec<Uuid>> {
        let history = load_history(self.interactions.as_ref(), user_id).await?;
        if history.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut content: HashMap<Uuid, ContentItem> = HashMap::new();
        fill_content(self.content.as_ref(), &mut content, history.content_ids()).await?;

        let profile = self.similarity.profile_builder().build(
            &history.viewed,
            &history.ignored,
            &content,
            now,
        );

        let ignored: HashSet<Uuid> = history.ignored.iter().map(|e| e.content_id).collect();
        let viewed: HashSet<Uuid> = history.viewed.iter().map(|e| e.content_id).collect();

        // Candidates from peers: content they viewed counts for, ignored against
        let peer_ids: Vec<Uuid> = index.peers.iter().map(|peer| peer.peer_id).collect();
        let peer_histories = load_histories(self.interactions.as_ref(), &peer_ids).await?;

        let mut support: BTreeMap<Uuid, PeerSupport> = BTreeMap::new();
        for peer in &index.peers {
            let Some(history) = peer_histories.get(&peer.peer_id) else {
                continue;
            };
            for entry in &history.viewed {
                let s = support.entry(entry.content_id).or_default();
                s.sum += peer.score;
                s.voters += 1;
            }
            for entry in &history.ignored {
                let s = support.entry(entry.content_id).or_default();
                s.sum -= peer.score;
                s.voters += 1;
            }
        }
        fill_content(self.content.as_ref(), &mut content, support.keys().copied()).await?;

        // Candidates from the profile itself
        let (tags, keywords) = profile.positive_terms();
        for item in self
            .content
            .find_related(&tags, &keywords, self.config.related_pool)
            .await?
        {
            support.entry(item.id).or_default();
            content.insert(item.id, item);
        }

        let mut scored: Vec<Scored> = support
            .iter()
            .filter(|(id, _)| !ignored.contains(*id))
            .filter(|(id, _)| !(self.config.exclude_viewed && viewed.contains(*id)))
            .filter_map(|(id, peer_support)| {
                let item = content.get(id)?;
                if !item.flags.is_visible() {
                    return None;
                }

                let affinity = profile.cosine(&FeatureVector::of_content(item));
                let similarity = affinity.max(peer_support.value());
                if similarity <= 0.0 {
                    return None;
                }

                Some(Scored {
                    content_id: *id,
                    score: self.config.alpha * similarity + self.config.beta * item.trending_val,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.content_id.cmp(&b.content_id))
        });
        scored.truncate(self.config.max_suggestions);

        Ok(scored.into_iter().map(|s| s.content_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryContentStore, MemoryDerivedStore, MemoryInteractions};
    use crate::models::{InteractionEntry, InteractionKind, NewContent, SimilarPeer};

    struct Fixture {
        content: Arc<MemoryContentStore>,
        interactions: Arc<MemoryInteractions>,
        derived: Arc<MemoryDerivedStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                content: Arc::new(MemoryContentStore::new()),
                interactions: Arc::new(MemoryInteractions::new()),
                derived: Arc::new(MemoryDerivedStore::new()),
            }
        }

        fn engine(&self, config: SuggestionConfig) -> SuggestionEngine {
            SuggestionEngine::new(
                self.content.clone(),
                self.interactions.clone(),
                self.derived.clone(),
                SimilarityConfig::default(),
                config,
            )
        }

        async fn create(&self, tags: &[&str], trending_val: f64) -> ContentItem {
            self.content
                .create(
                    NewContent {
                        title: tags.join(" "),
                        source: "wire".to_string(),
                        tags: tags.iter().map(|t| t.to_string()).collect(),
                        ..Default::default()
                    },
                    trending_val,
                )
                .await
                .unwrap()
        }

        async fn interact(&self, kind: InteractionKind, user: Uuid, content: Uuid) {
            self.interactions
                .upsert(kind, InteractionEntry::now(user, content))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_new_user_has_no_generation() {
        let f = Fixture::new();
        let engine = f.engine(SuggestionConfig::default());
        let page = engine.for_user(Uuid::new_v4(), 1, 12).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn test_zero_page_is_invalid() {
        let f = Fixture::new();
        let engine = f.engine(SuggestionConfig::default());
        assert!(matches!(
            engine.for_user(Uuid::new_v4(), 0, 12).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_generation_increments() {
        let f = Fixture::new();
        let engine = f.engine(SuggestionConfig::default());
        let user = Uuid::new_v4();

        assert_eq!(engine.update(user).await.unwrap().generation, 1);
        assert_eq!(engine.update(user).await.unwrap().generation, 2);
    }

    #[tokio::test]
    async fn test_excludes_ignored_hidden_and_viewed() {
        let f = Fixture::new();
        let engine = f.engine(SuggestionConfig::default());
        let user = Uuid::new_v4();

        let seen = f.create(&["rust"], 0.0).await;
        let fresh = f.create(&["rust"], 0.0).await;
        let ignored = f.create(&["rust"], 0.0).await;
        let hidden = f.create(&["rust"], 0.0).await;
        f.content.set_hidden(hidden.id, true).await.unwrap();

        f.interact(InteractionKind::Viewed, user, seen.id).await;
        f.interact(InteractionKind::Ignored, user, ignored.id).await;

        let list = engine.update(user).await.unwrap();
        assert_eq!(list.items, vec![fresh.id]);
    }

    #[tokio::test]
    async fn test_trending_breaks_similarity_ties() {
        let f = Fixture::new();
        let engine = f.engine(SuggestionConfig::default());
        let user = Uuid::new_v4();

        let seen = f.create(&["rust"], 0.0).await;
        let cold = f.create(&["rust"], 0.1).await;
        let hot = f.create(&["rust"], 2.0).await;
        f.interact(InteractionKind::Viewed, user, seen.id).await;

        let list = engine.update(user).await.unwrap();
        assert_eq!(list.items, vec![hot.id, cold.id]);
    }

    #[tokio::test]
    async fn test_peer_views_become_candidates() {
        let f = Fixture::new();
        let engine = f.engine(SuggestionConfig::default());
        let user = Uuid::new_v4();
        let peer = Uuid::new_v4();

        let shared = f.create(&["rust"], 0.0).await;
        let peer_pick = f.create(&["gardening"], 0.0).await;
        f.interact(InteractionKind::Viewed, user, shared.id).await;
        f.interact(InteractionKind::Viewed, peer, shared.id).await;
        f.interact(InteractionKind::Viewed, peer, peer_pick.id).await;

        f.derived
            .put_similarity(&SimilarityIndex {
                user_id: user,
                peers: vec![SimilarPeer {
                    peer_id: peer,
                    score: 0.7,
                    last_interaction: Utc::now(),
                }],
                computed_at: Utc::now(),
            })
            .await
            .unwrap();

        let list = engine.update(user).await.unwrap();
        assert_eq!(list.items, vec![peer_pick.id]);
    }

    #[tokio::test]
    async fn test_for_user_pages_latest_generation() {
        let f = Fixture::new();
        let engine = f.engine(SuggestionConfig::default());
        let user = Uuid::new_v4();

        let seen = f.create(&["rust"], 0.0).await;
        f.interact(InteractionKind::Viewed, user, seen.id).await;
        for i in 0..5 {
            f.create(&["rust"], i as f64).await;
        }

        let list = engine.update(user).await.unwrap();
        let mut paged = Vec::new();
        for page in 1..=3 {
            paged.extend(engine.for_user(user, page, 2).await.unwrap());
        }
        assert_eq!(paged, list.items);
        assert!(engine.for_user(user, 4, 2).await.unwrap().is_empty());
    }
}
