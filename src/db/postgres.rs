use chrono::{DateTime, Utc};
use std::collections::HashMap;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

use crate::{
    db::{ContentStore, IdentityResolver, InteractionRepository},
    error::AppResult,
    models::{
        normalize_term, ContentFlags, ContentItem, Counter, Counters, InteractionEntry,
        InteractionKind, NewContent, Page,
    },
};

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Applies the embedded schema migrations
pub async fn run_migrations(pool: &PgPool) -> AppResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

const CONTENT_COLUMNS: &str = "id, title, source, slug, subtitle, summary, article, url, cover, \
     tags, keywords, views, saves, ignores, trending_val, published, deleted, hidden, created_at";

#[derive(Debug, FromRow)]
struct ContentRow {
    id: Uuid,
    title: String,
    source: String,
    slug: String,
    subtitle: Option<String>,
    summary: Option<String>,
    article: Option<String>,
    url: Option<String>,
    cover: Option<String>,
    tags: Vec<String>,
    keywords: Vec<String>,
    views: i64,
    saves: i64,
    ignores: i64,
    trending_val: f64,
    published: bool,
    deleted: bool,
    hidden: bool,
    created_at: DateTime<Utc>,
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl From<ContentRow> for ContentItem {
    fn from(row: ContentRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            source: row.source,
            slug: row.slug,
            subtitle: row.subtitle,
            summary: row.summary,
            article: row.article,
            url: row.url,
            cover: row.cover,
            tags: row.tags.into_iter().collect(),
            keywords: row.keywords.into_iter().collect(),
            counters: Counters {
                views: non_negative(row.views),
                saves: non_negative(row.saves),
                ignores: non_negative(row.ignores),
            },
            trending_val: row.trending_val,
            flags: ContentFlags {
                published: row.published,
                deleted: row.deleted,
                hidden: row.hidden,
            },
            created_at: row.created_at,
        }
    }
}

fn limit_offset(page: Page) -> (i64, i64) {
    (page.size as i64, page.offset() as i64)
}

/// Content store backed by the `content_items` table
#[derive(Clone)]
pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ContentStore for PgContentStore {
    async fn create(&self, new: NewContent, trending_val: f64) -> AppResult<ContentItem> {
        let item = ContentItem::from_new(new, Utc::now());
        let tags: Vec<String> = item.tags.iter().cloned().collect();
        let keywords: Vec<String> = item.keywords.iter().cloned().collect();

        let row = sqlx::query_as::<_, ContentRow>(&format!(
            r#"
            INSERT INTO content_items
                (id, title, source, slug, subtitle, summary, article, url, cover,
                 tags, keywords, trending_val, published, deleted, hidden, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {}
            "#,
            CONTENT_COLUMNS
        ))
        .bind(item.id)
        .bind(&item.title)
        .bind(&item.source)
        .bind(&item.slug)
        .bind(&item.subtitle)
        .bind(&item.summary)
        .bind(&item.article)
        .bind(&item.url)
        .bind(&item.cover)
        .bind(&tags)
        .bind(&keywords)
        .bind(trending_val)
        .bind(item.flags.published)
        .bind(item.flags.deleted)
        .bind(item.flags.hidden)
        .bind(item.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<ContentItem>> {
        let row = sqlx::query_as::<_, ContentRow>(&format!(
            "SELECT {} FROM content_items WHERE id = $1",
            CONTENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ContentItem::from))
    }

    async fn get_many(&self, ids: &[Uuid]) -> AppResult<Vec<ContentItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ContentRow>(&format!(
            "SELECT {} FROM content_items WHERE id = ANY($1)",
            CONTENT_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ContentItem::from).collect())
    }

    async fn list_by_source(&self, source: &str, page: Page) -> AppResult<Vec<ContentItem>> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, ContentRow>(&format!(
            r#"
            SELECT {} FROM content_items
            WHERE source = $1 AND published AND NOT deleted
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
            CONTENT_COLUMNS
        ))
        .bind(source)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ContentItem::from).collect())
    }

    async fn list_trending(&self, page: Page) -> AppResult<Vec<ContentItem>> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, ContentRow>(&format!(
            r#"
            SELECT {} FROM content_items
            WHERE NOT deleted AND NOT hidden
            ORDER BY trending_val DESC, id
            LIMIT $1 OFFSET $2
            "#,
            CONTENT_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ContentItem::from).collect())
    }

    async fn increment(
        &self,
        id: Uuid,
        counter: Counter,
        delta: i64,
    ) -> AppResult<Option<ContentItem>> {
        // GREATEST keeps counters non-negative on decrement
        let column = counter.column();
        let row = sqlx::query_as::<_, ContentRow>(&format!(
            "UPDATE content_items SET {column} = GREATEST({column} + $2, 0) WHERE id = $1 RETURNING {}",
            CONTENT_COLUMNS
        ))
        .bind(id)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ContentItem::from))
    }

    async fn set_trending(&self, id: Uuid, trending_val: f64) -> AppResult<()> {
        sqlx::query("UPDATE content_items SET trending_val = $2 WHERE id = $1")
            .bind(id)
            .bind(trending_val)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_hidden(&self, id: Uuid, hidden: bool) -> AppResult<bool> {
        let result = sqlx::query("UPDATE content_items SET hidden = $2 WHERE id = $1")
            .bind(id)
            .bind(hidden)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_deleted(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("UPDATE content_items SET deleted = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_related(
        &self,
        tags: &[String],
        keywords: &[String],
        limit: usize,
    ) -> AppResult<Vec<ContentItem>> {
        if tags.is_empty() && keywords.is_empty() {
            return Ok(Vec::new());
        }
        // Stored terms are normalized on ingestion
        let tags: Vec<String> = tags.iter().map(|t| normalize_term(t)).collect();
        let keywords: Vec<String> = keywords.iter().map(|k| normalize_term(k)).collect();

        let rows = sqlx::query_as::<_, ContentRow>(&format!(
            r#"
            SELECT {} FROM content_items
            WHERE published AND NOT deleted AND NOT hidden
              AND (tags && $1 OR keywords && $2)
            ORDER BY trending_val DESC, id
            LIMIT $3
            "#,
            CONTENT_COLUMNS
        ))
        .bind(&tags)
        .bind(&keywords)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ContentItem::from).collect())
    }
}

#[derive(Debug, FromRow)]
struct InteractionRow {
    user_id: Uuid,
    content_id: Uuid,
    weight: f64,
    updated_at: DateTime<Utc>,
}

impl From<InteractionRow> for InteractionEntry {
    fn from(row: InteractionRow) -> Self {
        Self {
            user_id: row.user_id,
            content_id: row.content_id,
            weight: row.weight,
            timestamp: row.updated_at,
        }
    }
}

/// Interaction sets backed by the `interactions` table, one row per set member
#[derive(Clone)]
pub struct PgInteractions {
    pool: PgPool,
}

impl PgInteractions {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InteractionRepository for PgInteractions {
    async fn upsert(&self, kind: InteractionKind, entry: InteractionEntry) -> AppResult<bool> {
        // xmax is zero only for freshly inserted tuples
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO interactions (user_id, content_id, kind, weight, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, content_id, kind)
            DO UPDATE SET weight = EXCLUDED.weight, updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.content_id)
        .bind(kind.as_str())
        .bind(entry.weight)
        .bind(entry.timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(inserted)
    }

    async fn remove(
        &self,
        kind: InteractionKind,
        user_id: Uuid,
        content_id: Uuid,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "DELETE FROM interactions WHERE user_id = $1 AND content_id = $2 AND kind = $3",
        )
        .bind(user_id)
        .bind(content_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, kind: InteractionKind, user_id: Uuid) -> AppResult<Vec<InteractionEntry>> {
        let rows = sqlx::query_as::<_, InteractionRow>(
            r#"
            SELECT user_id, content_id, weight, updated_at FROM interactions
            WHERE user_id = $1 AND kind = $2
            ORDER BY content_id
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(InteractionEntry::from).collect())
    }

    async fn list_many(
        &self,
        kind: InteractionKind,
        user_ids: &[Uuid],
    ) -> AppResult<HashMap<Uuid, Vec<InteractionEntry>>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, InteractionRow>(
            r#"
            SELECT user_id, content_id, weight, updated_at FROM interactions
            WHERE user_id = ANY($1) AND kind = $2
            ORDER BY user_id, content_id
            "#,
        )
        .bind(user_ids)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut by_user: HashMap<Uuid, Vec<InteractionEntry>> = HashMap::new();
        for entry in rows.into_iter().map(InteractionEntry::from) {
            by_user.entry(entry.user_id).or_default().push(entry);
        }
        Ok(by_user)
    }

    async fn peers(
        &self,
        user_id: Uuid,
        content_ids: &[Uuid],
        limit: usize,
    ) -> AppResult<Vec<Uuid>> {
        if content_ids.is_empty() {
            return Ok(Vec::new());
        }

        let peers = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT user_id FROM interactions
            WHERE content_id = ANY($1) AND user_id <> $2
            ORDER BY user_id
            LIMIT $3
            "#,
        )
        .bind(content_ids)
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(peers)
    }
}

/// Known identities from the `users` table
#[derive(Clone)]
pub struct PgIdentity {
    pool: PgPool,
}

impl PgIdentity {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IdentityResolver for PgIdentity {
    async fn exists(&self, user_id: Uuid) -> AppResult<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn register(&self, user_id: Uuid) -> AppResult<()> {
        sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
