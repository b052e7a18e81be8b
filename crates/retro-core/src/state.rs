//! State type representing an entity's state at a point in time

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Context, EntityId, STATE_UNAVAILABLE, STATE_UNKNOWN};

/// Attribute map carried by a state
pub type Attributes = HashMap<String, serde_json::Value>;

/// Represents the state of an entity at a point in time
///
/// Timestamps may be supplied by the writer instead of taken from the clock;
/// see [`State::resolve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// The entity this state belongs to
    pub entity_id: EntityId,

    /// The state value (e.g., "on", "off", "23.5", "unavailable")
    pub state: String,

    /// Additional attributes associated with the state
    #[serde(default)]
    pub attributes: Attributes,

    /// When the state value last changed
    pub last_changed: DateTime<Utc>,

    /// When the state was last written, even if the value didn't change
    pub last_updated: DateTime<Utc>,

    /// When the state was last reported by the producer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reported: Option<DateTime<Utc>>,

    /// Context of the change that created this state
    pub context: Context,
}

impl State {
    /// Create a new state stamped with the current time
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: Attributes,
        context: Context,
    ) -> Self {
        Self::resolve(entity_id, state, attributes, context, None, None, None)
    }

    /// Build a state, resolving optional explicit timestamps
    ///
    /// `last_updated` falls back to now. `last_changed` falls back to the
    /// previous state's `last_changed` when the value is unchanged, and to
    /// `last_updated` otherwise.
    pub fn resolve(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: Attributes,
        context: Context,
        previous: Option<&State>,
        last_changed: Option<DateTime<Utc>>,
        last_updated: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        let state = state.into();
        let last_updated = last_updated.unwrap_or(now);
        let last_changed = last_changed.unwrap_or_else(|| match previous {
            Some(prev) if prev.state == state => prev.last_changed,
            _ => last_updated,
        });

        Self {
            entity_id,
            state,
            attributes,
            last_changed,
            last_updated,
            last_reported: Some(now),
            context,
        }
    }

    /// Create an updated state, preserving last_changed if state value is the same
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: Attributes,
        context: Context,
    ) -> Self {
        Self::resolve(
            self.entity_id.clone(),
            new_state,
            new_attributes,
            context,
            Some(self),
            None,
            None,
        )
    }

    pub fn domain(&self) -> &str {
        self.entity_id.domain()
    }

    pub fn object_id(&self) -> &str {
        self.entity_id.object_id()
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    pub fn is_unknown(&self) -> bool {
        self.state == STATE_UNKNOWN
    }

    /// Get an attribute value by key
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps and context are not compared
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}
