//! Context type for tracking request origin and causality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Correlation id attached to every state write and event
///
/// A write without a context gets a fresh one; `created_at` records when the
/// context was assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier for this context (ULID)
    pub id: String,

    /// User ID that initiated this action (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Parent context ID for tracking causality chains
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// When the context was assigned
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Context {
    /// Create a new context with a fresh ULID
    pub fn new() -> Self {
        Self::with_id(Ulid::new().to_string())
    }

    /// Create a new context with a specific ID
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: None,
            parent_id: None,
            created_at: Utc::now(),
        }
    }

    /// Create a child context with this context as parent
    pub fn child(&self) -> Self {
        Self {
            parent_id: Some(self.id.clone()),
            user_id: self.user_id.clone(),
            ..Self::new()
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
