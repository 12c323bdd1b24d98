mod content;
mod interaction;
mod recommendation;

pub use content::{
    create_slug, create_subtitle, normalize_term, ContentFlags, ContentItem, Counter, Counters, NewContent,
};
pub use interaction::{InteractionEntry, InteractionKind};
pub use recommendation::{
    Page, Recommendations, SimilarPeer, SimilarityIndex, SuggestionList,
};
