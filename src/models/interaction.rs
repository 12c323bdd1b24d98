use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// The two per-user interaction sets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Viewed,
    Ignored,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Viewed => "viewed",
            InteractionKind::Ignored => "ignored",
        }
    }

    /// The set an item leaves when it enters this one
    pub fn opposite(&self) -> Self {
        match self {
            InteractionKind::Viewed => InteractionKind::Ignored,
            InteractionKind::Ignored => InteractionKind::Viewed,
        }
    }
}

impl Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One member of a user's viewed or ignored set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionEntry {
    pub user_id: Uuid,
    pub content_id: Uuid,
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
}

impl InteractionEntry {
    /// Entry with the default unit weight stamped now
    pub fn now(user_id: Uuid, content_id: Uuid) -> Self {
        Self {
            user_id,
            content_id,
            weight: 1.0,
            timestamp: Utc::now(),
        }
    }
}
