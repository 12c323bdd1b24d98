use chrono::{DateTime, Duration, Utc};

use crate::models::{ContentItem, Counters};

/// Weights and decay parameters of the trending score
#[derive(Debug, Clone, PartialEq)]
pub struct TrendingConfig {
    pub save_weight: f64,
    pub view_weight: f64,
    pub ignore_weight: f64,
    /// How strongly negative engagement offsets positive engagement
    pub negative_penalty: f64,
    /// Exponent of the age decay
    pub gravity: f64,
    /// Hours added to the age so fresh items do not divide by zero
    pub offset_hours: f64,
}

impl Default for TrendingConfig {
    fn default() -> Self {
        Self {
            save_weight: 3.0,
            view_weight: 1.0,
            ignore_weight: 1.0,
            negative_penalty: 0.5,
            gravity: 1.8,
            offset_hours: 2.0,
        }
    }
}

/// Decaying popularity score for content items
///
/// The score is a log-damped net engagement divided by a power of the item's
/// age in hours:
///
/// ```text
/// engagement = max(0, ln(1 + positive) - penalty * ln(1 + negative))
/// score      = engagement / (age_hours + offset) ^ gravity
/// ```
///
/// It never goes below zero, and with no engagement it is exactly zero.
#[derive(Debug, Clone, Default)]
pub struct TrendingScorer {
    config: TrendingConfig,
}

impl TrendingScorer {
    pub fn new(config: TrendingConfig) -> Self {
        Self { config }
    }

    /// Lowest value `score` can return
    pub const FLOOR: f64 = 0.0;

    pub fn score(&self, positive: f64, negative: f64, age: Duration) -> f64 {
        let positive = positive.max(0.0);
        let negative = negative.max(0.0);
        let engagement =
            (positive.ln_1p() - self.config.negative_penalty * negative.ln_1p()).max(0.0);

        let age_hours = (age.num_milliseconds().max(0) as f64) / 3_600_000.0;
        let decay = (age_hours + self.config.offset_hours).powf(self.config.gravity);

        let score = engagement / decay;
        if score.is_finite() {
            score.max(Self::FLOOR)
        } else {
            Self::FLOOR
        }
    }

    /// Saves weigh more than views
    pub fn positive_weight(&self, counters: &Counters) -> f64 {
        counters.saves as f64 * self.config.save_weight
            + counters.views as f64 * self.config.view_weight
    }

    pub fn negative_weight(&self, counters: &Counters) -> f64 {
        counters.ignores as f64 * self.config.ignore_weight
    }

    /// Score of an item's current counters at `now`
    pub fn score_item(&self, item: &ContentItem, now: DateTime<Utc>) -> f64 {
        self.score(
            self.positive_weight(&item.counters),
            self.negative_weight(&item.counters),
            now - item.created_at,
        )
    }
}
