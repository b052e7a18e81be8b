//! Row models for the events and states tables

use chrono::{DateTime, Utc};
use retro_core::events::StateChangedData;
use retro_core::{Context, EntityId, Event, EventKind, EventOrigin};

use crate::error::StoreError;
use crate::policy::WriteAction;

/// An event as persisted in the `events` table
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Unique per enqueued event; commits are idempotent on it
    pub event_uid: String,
    pub event_type: String,
    /// JSON payload; `{}` when the payload lives in the linked state row
    pub event_data: String,
    pub origin: EventOrigin,
    pub time_fired: DateTime<Utc>,
    pub context: Context,
    pub state: Option<StateRecord>,
}

/// A state as persisted in the `states` table, linked to its event
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    pub domain: String,
    pub entity_id: String,
    pub state: String,
    /// JSON object of attributes
    pub attributes: String,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Set for `historic_state_changed` rows
    pub historic: bool,
}

impl LogRecord {
    /// Build the rows for an event
    ///
    /// Fails with a serialization error when the payload cannot be encoded, or
    /// when a state event's payload is not state-change data.
    pub fn from_event(
        event_uid: impl Into<String>,
        event: &Event,
        action: WriteAction,
    ) -> Result<Self, StoreError> {
        let state = match action {
            WriteAction::EventWithState if event.kind().carries_state() => {
                let data: StateChangedData = serde_json::from_value(event.data.clone())?;
                Some(StateRecord::from_data(
                    &data,
                    event.time_fired,
                    event.kind() == EventKind::HistoricStateChanged,
                )?)
            }
            _ => None,
        };

        let event_data = if state.is_some() {
            "{}".to_string()
        } else {
            serde_json::to_string(&event.data)?
        };

        Ok(Self {
            event_uid: event_uid.into(),
            event_type: event.event_type.to_string(),
            event_data,
            origin: event.origin,
            time_fired: event.time_fired,
            context: event.context.clone(),
            state,
        })
    }
}

impl StateRecord {
    /// A removed entity (no new state) is stored as an empty state at fire time
    fn from_data(
        data: &StateChangedData,
        time_fired: DateTime<Utc>,
        historic: bool,
    ) -> Result<Self, StoreError> {
        let entity_id: &EntityId = &data.entity_id;
        match &data.new_state {
            Some(state) => Ok(Self {
                domain: entity_id.domain().to_string(),
                entity_id: entity_id.to_string(),
                state: state.state.clone(),
                attributes: serde_json::to_string(&state.attributes)?,
                last_changed: state.last_changed,
                last_updated: state.last_updated,
                historic,
            }),
            None => Ok(Self {
                domain: entity_id.domain().to_string(),
                entity_id: entity_id.to_string(),
                state: String::new(),
                attributes: "{}".to_string(),
                last_changed: time_fired,
                last_updated: time_fired,
                historic,
            }),
        }
    }
}
