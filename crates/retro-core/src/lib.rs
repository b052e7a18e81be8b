//! Core types for retro_state
//!
//! This crate provides the fundamental types shared by the state store, the
//! recorder and the time-series exporter: EntityId, State, Event, Context and
//! EntityFilter.

mod context;
pub mod duration_secs;
mod entity_id;
mod event;
mod filter;
mod state;

pub use context::Context;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventKind, EventOrigin, EventType};
pub use filter::{EntityFilter, FilterSet};
pub use state::{Attributes, State};

/// State value for an entity whose value could not be determined
pub const STATE_UNKNOWN: &str = "unknown";

/// State value for an entity that is offline
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Attribute key holding the unit of a measurement
pub const ATTR_UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";

/// Attribute key holding the display name
pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";

pub const ATTR_ICON: &str = "icon";

pub const ATTR_ENTITY_PICTURE: &str = "entity_picture";

pub const ATTR_DEVICE_CLASS: &str = "device_class";

/// Standard event types
pub mod events {
    use super::*;

    /// Event type for live state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for writes that carry a timestamp older than the live state
    pub const HISTORIC_STATE_CHANGED: &str = "historic_state_changed";

    /// Event type for runtime start
    pub const HOMEASSISTANT_START: &str = "homeassistant_start";

    /// Event type for runtime stop
    pub const HOMEASSISTANT_STOP: &str = "homeassistant_stop";

    /// Event type used to surface problems that need the user's attention
    pub const NOTIFICATION: &str = "retro_state_notification";

    /// Data for STATE_CHANGED and HISTORIC_STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for NOTIFICATION events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct NotificationData {
        pub title: String,
        pub message: String,
    }

    impl EventData for NotificationData {
        fn event_type() -> &'static str {
            NOTIFICATION
        }
    }
}
