use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use uuid::Uuid;

use crate::db::DerivedStore;
use crate::error::{AppError, AppResult};
use crate::models::{SimilarityIndex, SuggestionList};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Similars(Uuid),
    Suggestions(Uuid),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Similars(user_id) => write!(f, "similars:{}", user_id),
            CacheKey::Suggestions(user_id) => write!(f, "suggestions:{}", user_id),
        }
    }
}

/// Creates a Redis client for the derived caches
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Derived per-user caches stored as JSON values in Redis
///
/// Writes are synchronous: a recompute is only considered persisted once Redis
/// has acknowledged the `SET`, so a read issued after `update` returns always
/// sees the new generation. Values carry no TTL; the last computed value stays
/// readable until the next recompute replaces it.
#[derive(Clone)]
pub struct RedisDerivedStore {
    redis_client: Client,
}

impl RedisDerivedStore {
    pub fn new(redis_client: Client) -> Self {
        Self { redis_client }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &CacheKey) -> AppResult<Option<T>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(key.to_string()).await.map_err(|e| {
            tracing::warn!(error = %e, key = %key, "Redis get failed");
            e
        })?;

        match cached {
            Some(json) => {
                let data = serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize>(&self, key: &CacheKey, value: &T) -> AppResult<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = conn.set(key.to_string(), json).await.map_err(|e| {
            tracing::warn!(error = %e, key = %key, "Redis set failed");
            e
        })?;
        tracing::debug!(key = %key, "Stored derived cache entry");
        Ok(())
    }
}

#[async_trait::async_trait]
impl DerivedStore for RedisDerivedStore {
    async fn similarity(&self, user_id: Uuid) -> AppResult<Option<SimilarityIndex>> {
        self.get_json(&CacheKey::Similars(user_id)).await
    }

    async fn put_similarity(&self, index: &SimilarityIndex) -> AppResult<()> {
        self.set_json(&CacheKey::Similars(index.user_id), index).await
    }

    async fn suggestions(&self, user_id: Uuid) -> AppResult<Option<SuggestionList>> {
        self.get_json(&CacheKey::Suggestions(user_id)).await
    }

    async fn put_suggestions(&self, list: &SuggestionList) -> AppResult<()> {
        self.set_json(&CacheKey::Suggestions(list.user_id), list).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_display_similars() {
        let user_id = Uuid::nil();
        let key = CacheKey::Similars(user_id);
        assert_eq!(
            format!("{}", key),
            "similars:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_cache_key_display_suggestions() {
        let user_id = Uuid::nil();
        let key = CacheKey::Suggestions(user_id);
        assert_eq!(
            format!("{}", key),
            "suggestions:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_cache_keys_differ_per_kind() {
        let user_id = Uuid::new_v4();
        assert_ne!(
            CacheKey::Similars(user_id).to_string(),
            CacheKey::Suggestions(user_id).to_string()
        );
    }
}
