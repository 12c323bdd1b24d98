use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ContentItem;

/// A peer user and how closely their taste matches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarPeer {
    pub peer_id: Uuid,
    /// Cosine similarity in [0, 1]
    pub score: f64,
    /// Most recent interaction of the peer that contributed to the score
    pub last_interaction: DateTime<Utc>,
}

/// Top-K most similar peers for one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityIndex {
    pub user_id: Uuid,
    pub peers: Vec<SimilarPeer>,
    pub computed_at: DateTime<Utc>,
}

impl SimilarityIndex {
    /// Neutral index for a user without usable history
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            peers: Vec::new(),
            computed_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Ranked content ids for one user, replaced wholesale on every recompute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestionList {
    pub user_id: Uuid,
    pub generation: u64,
    pub items: Vec<Uuid>,
    pub computed_at: DateTime<Utc>,
}

impl SuggestionList {
    /// Slice of the list for a 1-based page; past the end yields nothing
    pub fn page(&self, page: Page) -> Vec<Uuid> {
        self.items
            .iter()
            .skip(page.offset())
            .take(page.size)
            .copied()
            .collect()
    }
}

/// A 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn new(number: usize, size: usize) -> Self {
        Self { number, size }
    }

    /// Number of rows skipped before this page
    pub fn offset(&self) -> usize {
        self.number.saturating_sub(1).saturating_mul(self.size)
    }
}

/// Outcome of a recommendation read
#[derive(Debug, Clone, PartialEq)]
pub enum Recommendations {
    Items(Vec<ContentItem>),
    /// No generation exists yet, or the page is past its end
    Empty,
}
