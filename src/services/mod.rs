pub mod engine;
pub mod locks;
pub mod profile;
pub mod recompute;
pub mod similarity;
pub mod suggestions;
pub mod trending;

pub use engine::{Engine, EngineConfig, EngineHandle, InteractionSet, ReadMode};
pub use similarity::{SimilarityConfig, SimilarityEngine};
pub use suggestions::{SuggestionConfig, SuggestionEngine};
pub use trending::{TrendingConfig, TrendingScorer};
