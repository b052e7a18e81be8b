//! Event types for the event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{HISTORIC_STATE_CHANGED, STATE_CHANGED};
use crate::Context;

/// Trait for typed event data
pub trait EventData: Clone + Send + Sync + 'static {
    /// The event type string for this data type
    fn event_type() -> &'static str;
}

/// Event type identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Special event type that matches all events
    pub fn match_all() -> Self {
        Self("*".to_string())
    }

    pub fn is_match_all(&self) -> bool {
        self.0 == "*"
    }

    /// Classify this event type
    pub fn kind(&self) -> EventKind {
        match self.0.as_str() {
            STATE_CHANGED => EventKind::StateChanged,
            HISTORIC_STATE_CHANGED => EventKind::HistoricStateChanged,
            _ => EventKind::Other,
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        Self::new(kind.as_str())
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a state-carrying event means to consumers
///
/// `HistoricStateChanged` marks a fact about the past: its `new_state` was
/// never applied to the live state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    HistoricStateChanged,
    Other,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StateChanged => STATE_CHANGED,
            EventKind::HistoricStateChanged => HISTORIC_STATE_CHANGED,
            EventKind::Other => "other",
        }
    }

    /// True for the two kinds that carry `StateChangedData`
    pub fn carries_state(&self) -> bool {
        !matches!(self, EventKind::Other)
    }
}

/// An event that can be fired on the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    /// The type of event
    pub event_type: EventType,

    /// The event data
    pub data: T,

    /// Origin of the event (local, remote, etc.)
    pub origin: EventOrigin,

    /// When the event was fired
    pub time_fired: DateTime<Utc>,

    /// Context tracking the origin and causality
    pub context: Context,
}

impl<T> Event<T> {
    /// Create a new event with current timestamp
    pub fn new(event_type: impl Into<EventType>, data: T, context: Context) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            origin: EventOrigin::Local,
            time_fired: Utc::now(),
            context,
        }
    }

    pub fn with_origin(mut self, origin: EventOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.event_type.kind()
    }

    /// Swap the payload, keeping type, origin, time and context
    pub fn map_data<U>(self, f: impl FnOnce(T) -> U) -> Event<U> {
        Event {
            event_type: self.event_type,
            data: f(self.data),
            origin: self.origin,
            time_fired: self.time_fired,
            context: self.context,
        }
    }
}

impl<T: EventData> Event<T> {
    /// Create a typed event from EventData
    pub fn typed(data: T, context: Context) -> Self {
        Self::new(T::event_type(), data, context)
    }
}

impl<T: Serialize> Event<T> {
    /// Convert to the untyped form carried on the bus
    pub fn to_json_event(&self) -> Result<Event<serde_json::Value>, serde_json::Error> {
        Ok(Event {
            event_type: self.event_type.clone(),
            data: serde_json::to_value(&self.data)?,
            origin: self.origin,
            time_fired: self.time_fired,
            context: self.context.clone(),
        })
    }
}

/// Origin of an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    #[default]
    Local,
    Remote,
}

impl EventOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOrigin::Local => "local",
            EventOrigin::Remote => "remote",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(EventType::new("state_changed").kind(), EventKind::StateChanged);
        assert_eq!(
            EventType::new("historic_state_changed").kind(),
            EventKind::HistoricStateChanged
        );
        assert_eq!(EventType::new("call_service").kind(), EventKind::Other);
        assert!(!EventKind::Other.carries_state());
    }

    #[test]
    fn test_map_data_keeps_envelope() {
        let event = Event::new(EventKind::HistoricStateChanged, 1u8, Context::new());
        let fired = event.time_fired;
        let mapped = event.map_data(|n| n.to_string());
        assert_eq!(mapped.data, "1");
        assert_eq!(mapped.time_fired, fired);
        assert_eq!(mapped.kind(), EventKind::HistoricStateChanged);
    }
}
