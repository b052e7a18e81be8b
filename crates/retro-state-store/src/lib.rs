//! Entity state storage with historic write support
//!
//! This crate provides the StateStore, which tracks the live state of every
//! entity and is the only place that state is written. Every write goes
//! through [`StateStore::write`], which decides whether the write replaces the
//! live state or is a historic fact (see [`historic::decide`]) and publishes
//! exactly one event for it.

pub mod historic;

pub use historic::{decide, HistoricReason, StateWrite, WriteOutcome};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use retro_core::events::StateChangedData;
use retro_core::{Attributes, Context, EntityId, EntityIdError, Event, State};
use retro_event_bus::EventBus;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, trace};

/// Errors returned by state writes
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// The caller passed a missing or malformed entity id
    #[error("invalid entity_id: {0}")]
    InvalidEntityId(#[from] EntityIdError),
}

/// The state store tracks all entity states
///
/// The StateStore is responsible for:
/// - Storing the live state of all entities
/// - Maintaining a domain index for efficient domain-based queries
/// - Routing writes with old explicit timestamps to `historic_state_changed`
/// - Firing exactly one event per write
pub struct StateStore {
    /// All entity states keyed by entity_id string
    states: DashMap<String, State>,
    /// Index of entity_ids by domain
    domain_index: DashMap<String, Vec<String>>,
    /// Event bus for firing state change events
    event_bus: Arc<EventBus>,
}

impl StateStore {
    /// Create a new state store with the given event bus
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            event_bus,
        }
    }

    /// Write a state, honouring explicit timestamps
    ///
    /// The entity id is lower-cased before parsing. A write whose explicit
    /// `last_updated` (or else `last_changed`) is older than the live state
    /// leaves the live state untouched and fires `historic_state_changed`;
    /// every other write replaces it and fires `state_changed`. The fired
    /// event is returned.
    #[instrument(skip(self, write), fields(entity_id = %entity_id))]
    pub fn write(
        &self,
        entity_id: &str,
        write: StateWrite,
    ) -> Result<Event<StateChangedData>, StateStoreError> {
        let entity_id = EntityId::normalize(entity_id)?;
        Ok(self.apply(entity_id, write).0)
    }

    fn apply(&self, entity_id: EntityId, write: StateWrite) -> (Event<StateChangedData>, State) {
        let key = entity_id.to_string();
        let context = write.context.unwrap_or_default();

        // The shard lock is held from the read to the insert so concurrent
        // writers of one entity are serialized
        let (old_state, new_state, outcome) = match self.states.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let old_state = entry.get().clone();
                let outcome = decide(Some(&old_state), write.last_changed, write.last_updated);
                // A historic state stands alone; its last_changed never comes
                // from the newer live state
                let previous = (!outcome.is_historic()).then_some(&old_state);
                let new_state = State::resolve(
                    entity_id.clone(),
                    write.value,
                    write.attributes,
                    context.clone(),
                    previous,
                    write.last_changed,
                    write.last_updated,
                );
                if !outcome.is_historic() {
                    entry.insert(new_state.clone());
                }
                (Some(old_state), new_state, outcome)
            }
            Entry::Vacant(entry) => {
                let new_state = State::resolve(
                    entity_id.clone(),
                    write.value,
                    write.attributes,
                    context.clone(),
                    None,
                    write.last_changed,
                    write.last_updated,
                );
                entry.insert(new_state.clone());
                (None, new_state, WriteOutcome::Current)
            }
        };

        if old_state.is_none() {
            self.domain_index
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(key);
        }

        match outcome {
            WriteOutcome::Current => debug!(
                state = %new_state.state,
                changed = old_state.as_ref().map(|s| s.state != new_state.state).unwrap_or(true),
                "Setting entity state"
            ),
            WriteOutcome::Historic(reason) => debug!(
                state = %new_state.state,
                last_updated = %new_state.last_updated,
                ?reason,
                "Timestamp is older than the live state, recording as historic"
            ),
        }

        let event = Event::new(
            outcome.event_kind(),
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );
        self.event_bus.fire_event(&event);

        (event, new_state)
    }

    /// Set the live state of an entity stamped with the current time
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: Attributes,
        context: Context,
    ) -> State {
        let write = StateWrite::new(state.into())
            .attributes(attributes)
            .context(context);
        self.apply(entity_id, write).1
    }

    /// Get the current state of an entity
    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Get the state value as a string, or None if entity doesn't exist
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    /// Check if an entity is in a specific state
    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// Get all entity IDs for a domain
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Get all states for a domain
    pub fn domain_states(&self, domain: &str) -> Vec<State> {
        self.entity_ids(domain)
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Get all states
    pub fn all(&self) -> Vec<State> {
        self.states.iter().map(|r| r.value().clone()).collect()
    }

    /// Get all unique domains
    pub fn domains(&self) -> Vec<String> {
        self.domain_index.iter().map(|r| r.key().clone()).collect()
    }

    /// Remove an entity's state
    ///
    /// Fires a STATE_CHANGED event with the old state and None for new_state.
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let key = entity_id.to_string();
        let old_state = self.states.remove(&key).map(|(_, s)| s)?;

        trace!("Removing entity state");
        if let Some(mut ids) = self.domain_index.get_mut(entity_id.domain()) {
            ids.retain(|id| id != &key);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id: entity_id.clone(),
                old_state: Some(old_state.clone()),
                new_state: None,
            },
            context,
        );

        Some(old_state)
    }

    /// Get the total number of entities
    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

/// Thread-safe wrapper for StateStore
pub type SharedStateStore = Arc<StateStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use retro_core::events::{HISTORIC_STATE_CHANGED, STATE_CHANGED};
    use retro_core::EventKind;
    use serde_json::json;
    use std::sync::Mutex;

    fn make_test_setup() -> (Arc<EventBus>, StateStore) {
        let event_bus = Arc::new(EventBus::new());
        let store = StateStore::new(event_bus.clone());
        (event_bus, store)
    }

    #[test]
    fn test_set_and_get_state() {
        let (_, store) = make_test_setup();
        let attrs = Attributes::from([("brightness".to_string(), json!(255))]);

        let state = store.set(
            EntityId::new("light", "living_room").unwrap(),
            "on",
            attrs.clone(),
            Context::new(),
        );

        assert_eq!(state.state, "on");
        assert_eq!(state.attributes, attrs);
        assert!(store.is_state("light.living_room", "on"));
        assert_eq!(store.entity_ids("light"), vec!["light.living_room"]);
    }

    #[test]
    fn test_write_normalizes_entity_id_and_value() {
        let (_, store) = make_test_setup();
        let event = store.write("Sensor.Temp", StateWrite::new(21.5)).unwrap();

        assert_eq!(event.data.entity_id.to_string(), "sensor.temp");
        assert_eq!(store.get_state("sensor.temp").as_deref(), Some("21.5"));
    }

    #[test]
    fn test_write_without_entity_id_fails() {
        let (bus, store) = make_test_setup();
        let fired = Arc::new(Mutex::new(0));
        let f = fired.clone();
        bus.listen_all(move |_| *f.lock().unwrap() += 1);

        assert!(matches!(
            store.write("", StateWrite::new("on")),
            Err(StateStoreError::InvalidEntityId(EntityIdError::Missing))
        ));
        assert!(store.write("not an id", StateWrite::new("on")).is_err());
        assert_eq!(*fired.lock().unwrap(), 0);
    }

    #[test]
    fn test_increasing_last_updated_always_current() {
        let (bus, store) = make_test_setup();
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let k = kinds.clone();
        bus.listen_all(move |e| k.lock().unwrap().push(e.event_type.to_string()));

        let t0 = Utc::now() - Duration::hours(5);
        for n in 0..5 {
            let ts = t0 + Duration::minutes(n);
            store
                .write("sensor.temp", StateWrite::new(n).last_updated(ts))
                .unwrap();
            let live = store.get("sensor.temp").unwrap();
            assert_eq!(live.state, n.to_string());
            assert_eq!(live.last_updated, ts);
        }
        assert_eq!(*kinds.lock().unwrap(), vec![STATE_CHANGED; 5]);
    }

    #[test]
    fn test_older_write_does_not_touch_live_state() {
        let (bus, store) = make_test_setup();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f = fired.clone();
        bus.listen_all(move |e| f.lock().unwrap().push(e.clone()));

        let t0 = Utc::now();
        store
            .write("sensor.temp", StateWrite::new("20.0").last_updated(t0))
            .unwrap();
        let event = store
            .write(
                "sensor.temp",
                StateWrite::new("19.0").last_updated(t0 - Duration::hours(1)),
            )
            .unwrap();

        let live = store.get("sensor.temp").unwrap();
        assert_eq!(live.state, "20.0");
        assert_eq!(live.last_updated, t0);

        assert_eq!(event.kind(), EventKind::HistoricStateChanged);
        let new_state = event.data.new_state.unwrap();
        assert_eq!(new_state.state, "19.0");
        assert_eq!(new_state.last_updated, t0 - Duration::hours(1));
        let old_state = event.data.old_state.unwrap();
        assert_eq!(old_state.state, "20.0");

        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[1].event_type.as_str(), HISTORIC_STATE_CHANGED);
        assert_eq!(fired[1].data["new_state"]["state"], "19.0");
    }

    #[test]
    fn test_historic_write_of_same_value_keeps_own_last_changed() {
        let (_, store) = make_test_setup();
        let t0 = Utc::now();
        store
            .write("sensor.temp", StateWrite::new("20.0").last_updated(t0))
            .unwrap();
        let earlier = t0 - Duration::hours(1);
        let event = store
            .write("sensor.temp", StateWrite::new("20.0").last_updated(earlier))
            .unwrap();

        assert_eq!(event.kind(), EventKind::HistoricStateChanged);
        let new_state = event.data.new_state.unwrap();
        assert_eq!(new_state.last_updated, earlier);
        assert_eq!(new_state.last_changed, earlier);
        assert!(new_state.last_changed <= new_state.last_updated);
        assert_eq!(store.get("sensor.temp").unwrap().last_changed, t0);
    }

    #[test]
    fn test_first_write_keeps_explicit_timestamps() {
        let (_, store) = make_test_setup();
        let changed = Utc::now() - Duration::days(2);
        let updated = changed + Duration::hours(1);

        let event = store
            .write(
                "sensor.temp",
                StateWrite::new("18").last_changed(changed).last_updated(updated),
            )
            .unwrap();

        assert_eq!(event.kind(), EventKind::StateChanged);
        let live = store.get("sensor.temp").unwrap();
        assert_eq!(live.last_changed, changed);
        assert_eq!(live.last_updated, updated);
    }

    #[test]
    fn test_state_update_preserves_last_changed() {
        let (_, store) = make_test_setup();
        let entity_id = EntityId::new("sensor", "temp").unwrap();

        let state1 = store.set(entity_id.clone(), "20", Attributes::new(), Context::new());
        std::thread::sleep(std::time::Duration::from_millis(10));
        let state2 = store.set(entity_id.clone(), "20", Attributes::new(), Context::new());

        assert_eq!(state1.last_changed, state2.last_changed);
        assert!(state2.last_updated > state1.last_updated);

        let state3 = store.set(entity_id, "21", Attributes::new(), Context::new());
        assert!(state3.last_changed > state2.last_changed);
    }

    #[test]
    fn test_missing_context_is_synthesized() {
        let (_, store) = make_test_setup();
        let a = store.write("switch.a", StateWrite::new("on")).unwrap();
        let b = store.write("switch.a", StateWrite::new("off")).unwrap();
        assert!(!a.context.id.is_empty());
        assert_ne!(a.context.id, b.context.id);

        let ctx = Context::with_id("fixed");
        let c = store
            .write("switch.a", StateWrite::new("on").context(ctx.clone()))
            .unwrap();
        assert_eq!(c.context, ctx);
        assert_eq!(store.get("switch.a").unwrap().context, ctx);
    }

    #[test]
    fn test_remove_state() {
        let (_, store) = make_test_setup();
        let entity_id = EntityId::new("light", "test").unwrap();
        store.set(entity_id.clone(), "on", Attributes::new(), Context::new());

        let removed = store.remove(&entity_id, Context::new());
        assert_eq!(removed.unwrap().state, "on");
        assert!(store.get("light.test").is_none());
        assert!(store.entity_ids("light").is_empty());
        assert!(store.remove(&entity_id, Context::new()).is_none());
    }

    #[tokio::test]
    async fn test_state_changed_event_broadcast() {
        let event_bus = Arc::new(EventBus::new());
        let store = StateStore::new(event_bus.clone());
        let mut rx = event_bus.subscribe_typed::<StateChangedData>();

        store.write("light.test", StateWrite::new("on")).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.entity_id.to_string(), "light.test");
        assert!(event.data.old_state.is_none());
        assert_eq!(event.data.new_state.unwrap().state, "on");
    }
}
