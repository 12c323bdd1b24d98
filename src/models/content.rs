use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Engagement counters kept on every content item
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counters {
    pub views: u64,
    pub saves: u64,
    pub ignores: u64,
}

impl Counters {
    /// Applies a signed delta to one counter, saturating at zero
    pub fn apply(&mut self, counter: Counter, delta: i64) {
        let slot = match counter {
            Counter::Views => &mut self.views,
            Counter::Saves => &mut self.saves,
            Counter::Ignores => &mut self.ignores,
        };
        *slot = if delta >= 0 {
            slot.saturating_add(delta as u64)
        } else {
            slot.saturating_sub(delta.unsigned_abs())
        };
    }
}

/// Names one of the engagement counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Views,
    Saves,
    Ignores,
}

impl Counter {
    /// Column name in the content table
    pub fn column(&self) -> &'static str {
        match self {
            Counter::Views => "views",
            Counter::Saves => "saves",
            Counter::Ignores => "ignores",
        }
    }
}

/// Visibility flags of a content item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentFlags {
    pub published: bool,
    pub deleted: bool,
    pub hidden: bool,
}

impl Default for ContentFlags {
    fn default() -> Self {
        Self {
            published: true,
            deleted: false,
            hidden: false,
        }
    }
}

impl ContentFlags {
    /// Content that may be surfaced in listings and suggestions
    pub fn is_visible(&self) -> bool {
        self.published && !self.deleted && !self.hidden
    }
}

/// An ingested news item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub id: Uuid,
    pub title: String,
    pub source: String,
    pub slug: String,
    pub subtitle: Option<String>,
    pub summary: Option<String>,
    pub article: Option<String>,
    pub url: Option<String>,
    pub cover: Option<String>,
    pub tags: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    pub counters: Counters,
    pub trending_val: f64,
    pub flags: ContentFlags,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    /// Builds a fresh item from an ingestion request
    pub fn from_new(new: NewContent, created_at: DateTime<Utc>) -> Self {
        let slug = create_slug(&new.title);
        let subtitle = new.article.as_deref().map(create_subtitle);

        Self {
            id: Uuid::new_v4(),
            title: new.title,
            source: new.source,
            slug,
            subtitle,
            summary: new.summary,
            article: new.article,
            url: new.url,
            cover: new.cover,
            tags: normalize_terms(&new.tags),
            keywords: normalize_terms(&new.keywords),
            counters: Counters::default(),
            trending_val: 0.0,
            flags: ContentFlags::default(),
            created_at,
        }
    }
}

/// Ingestion payload for a new content item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewContent {
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub article: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Canonical form of a tag or keyword; matching is case-insensitive
pub fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

fn normalize_terms(terms: &[String]) -> BTreeSet<String> {
    terms
        .iter()
        .map(|t| normalize_term(t))
        .filter(|t| !t.is_empty())
        .collect()
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// URL slug: ASCII word characters only, lower-cased, word runs joined by `-`
pub fn create_slug(title: &str) -> String {
    let stripped: String = title
        .chars()
        .filter(|c| is_word_char(*c) || c.is_whitespace())
        .collect();

    stripped
        .trim()
        .to_lowercase()
        .split(|c: char| !is_word_char(c))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

const SUBTITLE_LEN: usize = 200;

/// Subtitle: the first 200 characters of the article on a single line
pub fn create_subtitle(article: &str) -> String {
    article
        .chars()
        .take(SUBTITLE_LEN)
        .filter(|c| *c != '\n' && *c != '\r')
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_slug() {
        assert_eq!(create_slug("Hello, World!"), "hello-world");
        assert_eq!(create_slug("  Rust 1.80 released  "), "rust-180-released");
        assert_eq!(create_slug("snake_case stays"), "snake_case-stays");
        assert_eq!(create_slug("Café déjà vu"), "caf-dj-vu");
    }

    #[test]
    fn test_tags_and_keywords_are_normalized_on_ingestion() {
        let item = ContentItem::from_new(
            NewContent {
                title: "Mixed".to_string(),
                source: "wire".to_string(),
                tags: vec!["Rust".to_string(), " rust ".to_string(), "  ".to_string()],
                keywords: vec!["World Cup".to_string()],
                ..Default::default()
            },
            Utc::now(),
        );
        assert_eq!(item.tags, BTreeSet::from(["rust".to_string()]));
        assert_eq!(item.keywords, BTreeSet::from(["world cup".to_string()]));
    }

    #[test]
    fn test_create_subtitle_strips_line_breaks() {
        let article = "First line\r\nsecond line\n";
        assert_eq!(create_subtitle(article), "First linesecond line");
    }

    #[test]
    fn test_create_subtitle_truncates() {
        let article = "a".repeat(500);
        assert_eq!(create_subtitle(&article).len(), 200);
    }

    #[test]
    fn test_counters_saturate_at_zero() {
        let mut counters = Counters::default();
        counters.apply(Counter::Saves, -1);
        assert_eq!(counters.saves, 0);

        counters.apply(Counter::Saves, 2);
        counters.apply(Counter::Saves, -1);
        assert_eq!(counters.saves, 1);
    }

    #[test]
    fn test_new_item_is_visible_with_zero_counters() {
        let item = ContentItem::from_new(
            NewContent {
                title: "Breaking News".to_string(),
                source: "wire".to_string(),
                tags: vec!["world".to_string(), "world".to_string()],
                ..Default::default()
            },
            Utc::now(),
        );
        assert!(item.flags.is_visible());
        assert_eq!(item.counters, Counters::default());
        assert_eq!(item.slug, "breaking-news");
        assert_eq!(item.tags.len(), 1);
    }
}
