use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{ContentStore, DerivedStore, InteractionRepository},
    error::AppResult,
    models::{ContentItem, InteractionEntry, InteractionKind, SimilarPeer, SimilarityIndex},
    services::profile::{FeatureVector, ProfileBuilder},
};

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityConfig {
    /// Peers kept in the index
    pub top_k: usize,
    /// Upper bound on peers scored per update
    pub candidate_pool: usize,
    /// Upper bound on related content used to discover peers
    pub related_pool: usize,
    pub half_life_days: f64,
    /// Fraction of an ignored entry's weight subtracted from the profile
    pub ignored_penalty: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            candidate_pool: 200,
            related_pool: 100,
            half_life_days: 14.0,
            ignored_penalty: 0.5,
        }
    }
}

impl SimilarityConfig {
    pub fn profile_builder(&self) -> ProfileBuilder {
        ProfileBuilder {
            half_life_days: self.half_life_days,
            ignored_penalty: self.ignored_penalty,
        }
    }
}

/// A user's interaction history together with the content it refers to
pub struct History {
    pub viewed: Vec<InteractionEntry>,
    pub ignored: Vec<InteractionEntry>,
}

impl History {
    pub fn is_empty(&self) -> bool {
        self.viewed.is_empty() && self.ignored.is_empty()
    }

    pub fn content_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.viewed
            .iter()
            .chain(self.ignored.iter())
            .map(|entry| entry.content_id)
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.viewed
            .iter()
            .chain(self.ignored.iter())
            .map(|entry| entry.timestamp)
            .max()
    }
}

/// Loads both interaction sets of a user
pub async fn load_history(
    interactions: &dyn InteractionRepository,
    user_id: Uuid,
) -> AppResult<History> {
    Ok(History {
        viewed: interactions.list(InteractionKind::Viewed, user_id).await?,
        ignored: interactions.list(InteractionKind::Ignored, user_id).await?,
    })
}

/// Loads both interaction sets of several users with one query per set
///
/// Users without any interaction are left out.
pub async fn load_histories(
    interactions: &dyn InteractionRepository,
    user_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, History>> {
    let mut viewed = interactions.list_many(InteractionKind::Viewed, user_ids).await?;
    let mut ignored = interactions.list_many(InteractionKind::Ignored, user_ids).await?;

    Ok(user_ids
        .iter()
        .map(|id| {
            let history = History {
                viewed: viewed.remove(id).unwrap_or_default(),
                ignored: ignored.remove(id).unwrap_or_default(),
            };
            (*id, history)
        })
        .filter(|(_, history)| !history.is_empty())
        .collect())
}

/// Fetches every content item referenced by `ids` into `cache`, skipping ids
/// already present
pub async fn fill_content(
    content: &dyn ContentStore,
    cache: &mut HashMap<Uuid, ContentItem>,
    ids: impl IntoIterator<Item = Uuid>,
) -> AppResult<()> {
    let missing: Vec<Uuid> = ids
        .into_iter()
        .filter(|id| !cache.contains_key(id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    for item in content.get_many(&missing).await? {
        cache.insert(item.id, item);
    }
    Ok(())
}

/// Orders peers by score, then most recent contributing interaction, then id
pub fn rank_peers(peers: &mut Vec<SimilarPeer>, top_k: usize) {
    peers.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.last_interaction.cmp(&a.last_interaction))
            .then(a.peer_id.cmp(&b.peer_id))
    });
    peers.truncate(top_k);
}

/// Computes and persists the per-user similarity index ("similars")
///
/// A user's interest profile is a recency-weighted tag/keyword vector built from
/// their viewed (positive) and ignored (negative) sets. Candidate peers are the
/// other users who interacted with the same or related content; each is scored
/// by cosine similarity of profiles and the best `top_k` are kept.
pub struct SimilarityEngine {
    content: Arc<dyn ContentStore>,
    interactions: Arc<dyn InteractionRepository>,
    derived: Arc<dyn DerivedStore>,
    config: SimilarityConfig,
}

impl SimilarityEngine {
    pub fn new(
        content: Arc<dyn ContentStore>,
        interactions: Arc<dyn InteractionRepository>,
        derived: Arc<dyn DerivedStore>,
        config: SimilarityConfig,
    ) -> Self {
        Self {
            content,
            interactions,
            derived,
            config,
        }
    }

    /// Recomputes the index from current interaction state and replaces the
    /// persisted one. A user without history gets an empty index.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn update(&self, user_id: Uuid) -> AppResult<SimilarityIndex> {
        let index = self.compute(user_id, Utc::now()).await?;
        self.derived.put_similarity(&index).await?;

        tracing::debug!(peers = index.peers.len(), "Similarity index updated");
        Ok(index)
    }

    async fn compute(&self, user_id: Uuid, now: DateTime<Utc>) -> AppResult<SimilarityIndex> {
        let history = load_history(self.interactions.as_ref(), user_id).await?;
        if history.is_empty() {
            return Ok(SimilarityIndex::empty(user_id));
        }

        let builder = self.config.profile_builder();
        let mut content = HashMap::new();
        fill_content(self.content.as_ref(), &mut content, history.content_ids()).await?;

        let profile = builder.build(&history.viewed, &history.ignored, &content, now);
        if profile.is_empty() {
            return Ok(SimilarityIndex::empty(user_id));
        }

        // Peers are discovered through the user's own content and through content
        // sharing a positive term with the profile
        let (tags, keywords) = profile.positive_terms();
        let related = self
            .content
            .find_related(&tags, &keywords, self.config.related_pool)
            .await?;

        let mut pool: BTreeSet<Uuid> = history.content_ids().collect();
        for item in related {
            pool.insert(item.id);
            content.insert(item.id, item);
        }
        let pool: Vec<Uuid> = pool.into_iter().collect();

        let peer_ids = self
            .interactions
            .peers(user_id, &pool, self.config.candidate_pool)
            .await?;

        let histories = load_histories(self.interactions.as_ref(), &peer_ids).await?;
        fill_content(
            self.content.as_ref(),
            &mut content,
            histories.values().flat_map(|history| history.content_ids()),
        )
        .await?;

        let mut peers: Vec<SimilarPeer> = histories
            .iter()
            .filter_map(|(peer_id, history)| {
                score_peer(*peer_id, history, &profile, &builder, &content, now)
            })
            .collect();

        rank_peers(&mut peers, self.config.top_k);

        Ok(SimilarityIndex {
            user_id,
            peers,
            computed_at: now,
        })
    }
}


fn score_peer(
    peer_id: Uuid,
    history: &History,
    profile: &FeatureVector,
    builder: &ProfileBuilder,
    content: &HashMap<Uuid, ContentItem>,
    now: DateTime<Utc>,
) -> Option<SimilarPeer> {
    let last_interaction = history.latest()?;
    let peer_profile = builder.build(&history.viewed, &history.ignored, content, now);

    let score = profile.cosine(&peer_profile);
    if score <= 0.0 {
        return None;
    }

    Some(SimilarPeer {
        peer_id,
        score,
        last_interaction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        MemoryContentStore, MemoryDerivedStore, MemoryInteractions, MockDerivedStore,
        MockInteractionRepository,
    };
    use crate::error::AppError;
    use crate::models::NewContent;
    use chrono::Duration;

    struct Fixture {
        content: Arc<MemoryContentStore>,
        interactions: Arc<MemoryInteractions>,
        derived: Arc<MemoryDerivedStore>,
        engine: SimilarityEngine,
    }

    fn fixture() -> Fixture {
        let content = Arc::new(MemoryContentStore::new());
        let interactions = Arc::new(MemoryInteractions::new());
        let derived = Arc::new(MemoryDerivedStore::new());
        let engine = SimilarityEngine::new(
            content.clone(),
            interactions.clone(),
            derived.clone(),
            SimilarityConfig::default(),
        );
        Fixture {
            content,
            interactions,
            derived,
            engine,
        }
    }

    async fn create(content: &MemoryContentStore, tags: &[&str]) -> ContentItem {
        content
            .create(
                NewContent {
                    title: tags.join(" "),
                    source: "wire".to_string(),
                    tags: tags.iter().map(|t| t.to_string()).collect(),
                    ..Default::default()
                },
                0.0,
            )
            .await
            .unwrap()
    }

    async fn view(interactions: &MemoryInteractions, user: Uuid, content: Uuid) {
        interactions
            .upsert(InteractionKind::Viewed, InteractionEntry::now(user, content))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_history_gives_empty_index() {
        let f = fixture();
        let user = Uuid::new_v4();

        let index = f.engine.update(user).await.unwrap();
        assert!(index.is_empty());
        assert_eq!(f.derived.similarity(user).await.unwrap(), Some(index));
    }

    #[tokio::test]
    async fn test_peers_ranked_by_shared_interests() {
        let f = fixture();
        let rust = create(&f.content, &["rust", "systems"]).await;
        let rust_news = create(&f.content, &["rust"]).await;
        let cooking = create(&f.content, &["cooking"]).await;

        let user = Uuid::new_v4();
        let close = Uuid::new_v4();
        let partial = Uuid::new_v4();
        let unrelated = Uuid::new_v4();

        view(&f.interactions, user, rust.id).await;
        view(&f.interactions, close, rust.id).await;
        view(&f.interactions, partial, rust_news.id).await;
        view(&f.interactions, partial, cooking.id).await;
        view(&f.interactions, unrelated, cooking.id).await;

        let index = f.engine.update(user).await.unwrap();
        let ids: Vec<Uuid> = index.peers.iter().map(|p| p.peer_id).collect();

        assert_eq!(ids, vec![close, partial]);
        assert!((index.peers[0].score - 1.0).abs() < 1e-9);
        assert!(index.peers.iter().all(|p| p.score > 0.0 && p.score <= 1.0));
    }

    #[tokio::test]
    async fn test_mixed_case_tags_still_find_peers() {
        let f = fixture();
        let read = create(&f.content, &["Rust"]).await;
        let related = create(&f.content, &["RUST", "Async"]).await;

        let user = Uuid::new_v4();
        let peer = Uuid::new_v4();
        view(&f.interactions, user, read.id).await;
        view(&f.interactions, peer, related.id).await;

        let index = f.engine.update(user).await.unwrap();
        let ids: Vec<Uuid> = index.peers.iter().map(|p| p.peer_id).collect();
        assert_eq!(ids, vec![peer]);
    }

    #[tokio::test]
    async fn test_top_k_truncates() {
        let f = fixture();
        let engine = SimilarityEngine::new(
            f.content.clone(),
            f.interactions.clone(),
            f.derived.clone(),
            SimilarityConfig {
                top_k: 2,
                ..Default::default()
            },
        );
        let item = create(&f.content, &["rust"]).await;
        let user = Uuid::new_v4();
        view(&f.interactions, user, item.id).await;
        for _ in 0..5 {
            view(&f.interactions, Uuid::new_v4(), item.id).await;
        }

        let index = engine.update(user).await.unwrap();
        assert_eq!(index.peers.len(), 2);
    }

    #[tokio::test]
    async fn test_load_histories_skips_users_without_entries() {
        let f = fixture();
        let item = create(&f.content, &["rust"]).await;
        let active = Uuid::new_v4();
        let idle = Uuid::new_v4();
        view(&f.interactions, active, item.id).await;
        f.interactions
            .upsert(InteractionKind::Ignored, InteractionEntry::now(active, Uuid::new_v4()))
            .await
            .unwrap();

        let histories = load_histories(f.interactions.as_ref(), &[active, idle])
            .await
            .unwrap();
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[&active].viewed.len(), 1);
        assert_eq!(histories[&active].ignored.len(), 1);
    }

    #[tokio::test]
    async fn test_peer_histories_are_fetched_in_batch() {
        let f = fixture();
        let item = create(&f.content, &["rust"]).await;
        let item_id = item.id;
        let peer_ids: Vec<Uuid> = (0..50).map(|_| Uuid::new_v4()).collect();

        let mut interactions = MockInteractionRepository::new();
        // Only the user's own sets go through `list`
        interactions
            .expect_list()
            .times(2)
            .returning(move |kind, user_id| match kind {
                InteractionKind::Viewed => Ok(vec![InteractionEntry::now(user_id, item_id)]),
                InteractionKind::Ignored => Ok(Vec::new()),
            });
        let candidates = peer_ids.clone();
        interactions
            .expect_peers()
            .times(1)
            .returning(move |_, _, _| Ok(candidates.clone()));
        interactions
            .expect_list_many()
            .times(2)
            .returning(move |kind, ids| {
                Ok(match kind {
                    InteractionKind::Viewed => ids
                        .iter()
                        .map(|id| (*id, vec![InteractionEntry::now(*id, item_id)]))
                        .collect(),
                    InteractionKind::Ignored => HashMap::new(),
                })
            });

        let engine = SimilarityEngine::new(
            f.content.clone(),
            Arc::new(interactions),
            f.derived.clone(),
            SimilarityConfig::default(),
        );
        let index = engine.update(Uuid::new_v4()).await.unwrap();
        assert_eq!(index.peers.len(), SimilarityConfig::default().top_k);
    }

    #[test]
    fn test_rank_peers_tie_breaks() {
        let now = Utc::now();
        let older = SimilarPeer {
            peer_id: Uuid::from_u128(1),
            score: 0.5,
            last_interaction: now - Duration::hours(1),
        };
        let newer = SimilarPeer {
            peer_id: Uuid::from_u128(9),
            score: 0.5,
            last_interaction: now,
        };
        let same_time_low_id = SimilarPeer {
            peer_id: Uuid::from_u128(2),
            score: 0.5,
            last_interaction: now,
        };

        let mut peers = vec![older.clone(), newer.clone(), same_time_low_id.clone()];
        rank_peers(&mut peers, 10);
        assert_eq!(peers, vec![same_time_low_id, newer, older]);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let f = fixture();
        let mut derived = MockDerivedStore::new();
        derived
            .expect_put_similarity()
            .returning(|_| Err(AppError::StoreUnavailable("redis down".to_string())));

        let engine = SimilarityEngine::new(
            f.content.clone(),
            f.interactions.clone(),
            Arc::new(derived),
            SimilarityConfig::default(),
        );

        let result = engine.update(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::StoreUnavailable(_))));
    }
}
