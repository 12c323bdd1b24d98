use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::models::{normalize_term, ContentItem, InteractionEntry};

/// Sparse tag/keyword vector
///
/// Keys are namespaced (`tag:` / `kw:`) so a tag and a keyword with the same
/// text stay separate dimensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    weights: HashMap<String, f64>,
}

impl FeatureVector {
    /// Unit-weight vector of a single content item's attributes
    pub fn of_content(item: &ContentItem) -> Self {
        let mut vector = Self::default();
        vector.accumulate(item, 1.0);
        vector
    }

    /// Adds `weight` to every attribute dimension of `item`
    pub fn accumulate(&mut self, item: &ContentItem, weight: f64) {
        for tag in &item.tags {
            *self.weights.entry(format!("tag:{}", normalize_term(tag))).or_default() += weight;
        }
        for keyword in &item.keywords {
            *self.weights.entry(format!("kw:{}", normalize_term(keyword))).or_default() += weight;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.weights.values().all(|w| *w == 0.0)
    }

    fn norm(&self) -> f64 {
        self.weights.values().map(|w| w * w).sum::<f64>().sqrt()
    }

    /// Cosine similarity clamped to [0, 1]; zero when either side is empty
    pub fn cosine(&self, other: &FeatureVector) -> f64 {
        let denominator = self.norm() * other.norm();
        if denominator == 0.0 {
            return 0.0;
        }

        let (small, large) = if self.weights.len() <= other.weights.len() {
            (self, other)
        } else {
            (other, self)
        };
        let dot: f64 = small
            .weights
            .iter()
            .filter_map(|(key, w)| large.weights.get(key).map(|o| w * o))
            .sum();

        (dot / denominator).clamp(0.0, 1.0)
    }

    /// Dimensions with positive weight, split back into (tags, keywords)
    pub fn positive_terms(&self) -> (Vec<String>, Vec<String>) {
        let mut tags = BTreeSet::new();
        let mut keywords = BTreeSet::new();
        for (key, weight) in &self.weights {
            if *weight <= 0.0 {
                continue;
            }
            if let Some(tag) = key.strip_prefix("tag:") {
                tags.insert(tag.to_string());
            } else if let Some(keyword) = key.strip_prefix("kw:") {
                keywords.insert(keyword.to_string());
            }
        }
        (tags.into_iter().collect(), keywords.into_iter().collect())
    }
}

/// Builds interest profiles from interaction history
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    pub half_life_days: f64,
    pub ignored_penalty: f64,
}

impl ProfileBuilder {
    /// Exponential recency decay: 1.0 now, 0.5 after one half-life
    pub fn recency(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        if self.half_life_days <= 0.0 {
            return 1.0;
        }
        let age_days = ((now - timestamp).num_seconds().max(0) as f64) / 86_400.0;
        0.5_f64.powf(age_days / self.half_life_days)
    }

    /// Viewed entries pull the profile toward their attributes, ignored entries
    /// push it away. Entries whose content is unknown are skipped.
    pub fn build(
        &self,
        viewed: &[InteractionEntry],
        ignored: &[InteractionEntry],
        content: &HashMap<Uuid, ContentItem>,
        now: DateTime<Utc>,
    ) -> FeatureVector {
        let mut vector = FeatureVector::default();

        for entry in viewed {
            if let Some(item) = content.get(&entry.content_id) {
                vector.accumulate(item, entry.weight * self.recency(entry.timestamp, now));
            }
        }
        for entry in ignored {
            if let Some(item) = content.get(&entry.content_id) {
                let weight = entry.weight * self.recency(entry.timestamp, now);
                vector.accumulate(item, -self.ignored_penalty * weight);
            }
        }

        vector
    }
}
