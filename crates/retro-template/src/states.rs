//! The `states` object and state helpers exposed to templates

use std::fmt;
use std::sync::Arc;

use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind};
use retro_core::{State, STATE_UNKNOWN};
use retro_state_store::StateStore;

use crate::functions::DateTimeWrapper;

/// Entity states as seen by templates
///
/// - `states('sensor.temp')` gives the state value, `unknown` when missing
/// - `states.sensor.temp` gives the full state, undefined when missing
/// - `states.sensor` gives a proxy for the domain
#[derive(Clone)]
pub struct StatesObject {
    store: Arc<StateStore>,
}

impl fmt::Debug for StatesObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatesObject").finish_non_exhaustive()
    }
}

impl StatesObject {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    pub fn state(&self, entity_id: &str) -> String {
        self.store
            .get_state(entity_id)
            .unwrap_or_else(|| STATE_UNKNOWN.to_string())
    }

    pub fn is_state(&self, entity_id: &str, state: &Value) -> bool {
        match state.as_str() {
            Some(expected) => self.store.is_state(entity_id, expected),
            // is_state('light.x', ['on', 'dim'])
            None => match (self.store.get_state(entity_id), state.try_iter()) {
                (Some(current), Ok(options)) => {
                    options.into_iter().any(|v| v.as_str() == Some(current.as_str()))
                }
                _ => false,
            },
        }
    }

    /// Attribute of an entity, undefined when the entity or attribute is missing
    pub fn state_attr(&self, entity_id: &str, attribute: &str) -> Value {
        self.store
            .get(entity_id)
            .and_then(|s| s.attributes.get(attribute).map(Value::from_serialize))
            .unwrap_or(Value::UNDEFINED)
    }

    /// True when the entity exists and is neither unknown nor unavailable
    pub fn has_value(&self, entity_id: &str) -> bool {
        self.store
            .get(entity_id)
            .map(|s| !s.is_unknown() && !s.is_unavailable())
            .unwrap_or(false)
    }
}

impl Object for StatesObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;
        if key.contains('.') {
            return self.store.get(key).map(state_to_value);
        }
        Some(Value::from_object(DomainProxy {
            domain: key.to_string(),
            store: self.store.clone(),
        }))
    }

    fn call(self: &Arc<Self>, _state: &minijinja::State, args: &[Value]) -> Result<Value, Error> {
        let entity_id = args.first().and_then(|v| v.as_str()).ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "states() requires an entity_id")
        })?;
        Ok(Value::from(self.state(entity_id)))
    }
}

/// `states.<domain>`
#[derive(Clone)]
struct DomainProxy {
    domain: String,
    store: Arc<StateStore>,
}

impl fmt::Debug for DomainProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainProxy")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl Object for DomainProxy {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let object_id = key.as_str()?;
        self.store
            .get(&format!("{}.{}", self.domain, object_id))
            .map(state_to_value)
    }
}

fn state_to_value(state: State) -> Value {
    Value::from_object(StateWrapper(state))
}

/// A full state as seen by templates; renders as its value
#[derive(Debug, Clone)]
pub struct StateWrapper(pub State);

impl Object for StateWrapper {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let state = &self.0;
        match key.as_str()? {
            "state" => Some(Value::from(state.state.as_str())),
            "entity_id" => Some(Value::from(state.entity_id.to_string())),
            "domain" => Some(Value::from(state.domain())),
            "object_id" => Some(Value::from(state.object_id())),
            "name" => Some(Value::from(
                state
                    .attribute::<String>(retro_core::ATTR_FRIENDLY_NAME)
                    .unwrap_or_else(|| state.object_id().replace('_', " ")),
            )),
            "attributes" => Some(Value::from_serialize(&state.attributes)),
            "last_changed" => Some(DateTimeWrapper::utc(state.last_changed)),
            "last_updated" => Some(DateTimeWrapper::utc(state.last_updated)),
            _ => None,
        }
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.state)
    }
}
