//! Mapping of state events to measurement points

use regex::Regex;
use retro_core::events::StateChangedData;
use retro_core::{
    EntityId, Event, EventKind, ATTR_UNIT_OF_MEASUREMENT, STATE_UNAVAILABLE, STATE_UNKNOWN,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{trace, warn};

use crate::config::{ComponentConfig, InfluxConfig};
use crate::point::{FieldValue, MeasurementPoint};

/// Strings like `"12.5 kWh"` or `"v2"` that still carry one number
const DIGIT_TAIL: &str = r"^[^.]*\d+\.?\d+[^.]*$";
/// Everything that is not part of a decimal number
const NON_DECIMAL: &str = r"[^\d.]+";

/// Numeric meaning of well-known binary states
pub fn state_as_number(state: &str) -> Option<f64> {
    match state {
        "on" | "open" | "home" | "locked" | "above_horizon" => Some(1.0),
        "off" | "closed" | "not_home" | "unlocked" | "below_horizon" => Some(0.0),
        _ => None,
    }
}

/// Converts state events into points according to an [`InfluxConfig`]
#[derive(Debug, Clone)]
pub struct PointMapper {
    config: InfluxConfig,
    globs: Vec<(Regex, ComponentConfig)>,
    digit_tail: Regex,
    non_decimal: Regex,
}

impl PointMapper {
    pub fn new(config: InfluxConfig) -> Result<Self, regex::Error> {
        let globs = config
            .component_config_glob
            .iter()
            .map(|(glob, component)| Ok((glob_to_regex(glob)?, component.clone())))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self {
            config,
            globs,
            digit_tail: Regex::new(DIGIT_TAIL)?,
            non_decimal: Regex::new(NON_DECIMAL)?,
        })
    }

    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }

    /// Component override for an entity: entity id, then glob, then domain
    ///
    /// Among globs the last matching pattern (in sorted order) wins.
    pub fn measurement_override(&self, entity_id: &EntityId) -> Option<&str> {
        let id = entity_id.to_string();
        self.config
            .component_config
            .get(&id)
            .and_then(override_of)
            .or_else(|| {
                self.globs
                    .iter()
                    .rev()
                    .filter(|(pattern, _)| pattern.is_match(&id))
                    .find_map(|(_, component)| override_of(component))
            })
            .or_else(|| {
                self.config
                    .component_config_domain
                    .get(entity_id.domain())
                    .and_then(override_of)
            })
    }

    /// Build the point for a state event, or `None` when it is not exported
    pub fn event_to_point(&self, event: &Event) -> Option<MeasurementPoint> {
        if !event.kind().carries_state() {
            return None;
        }
        let data = match StateChangedData::deserialize(&event.data) {
            Ok(data) => data,
            Err(err) => {
                trace!(%err, "Ignoring malformed state event");
                return None;
            }
        };
        let state = data.new_state?;
        if matches!(state.state.as_str(), "" | STATE_UNKNOWN | STATE_UNAVAILABLE) {
            return None;
        }
        if !self.config.filter.accepts(&state.entity_id) {
            return None;
        }

        let (value, include_state) = match parse_finite(&state.state) {
            Some(number) => (Some(number), false),
            None => (state_as_number(&state.state), true),
        };

        let mut include_unit = true;
        let measurement = match self.measurement_override(&state.entity_id).or(self
            .config
            .override_measurement
            .as_deref()
            .filter(|m| !m.is_empty()))
        {
            Some(measurement) => measurement.to_string(),
            None => match state
                .attributes
                .get(ATTR_UNIT_OF_MEASUREMENT)
                .and_then(Value::as_str)
                .filter(|unit| !unit.is_empty())
            {
                Some(unit) => {
                    include_unit = false;
                    unit.to_string()
                }
                None => self
                    .config
                    .default_measurement
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| state.entity_id.to_string()),
            },
        };

        let time = if event.kind() == EventKind::HistoricStateChanged {
            state.last_updated
        } else {
            event.time_fired
        };
        if time.timestamp_nanos_opt().is_none() {
            warn!(
                entity_id = %state.entity_id,
                %time,
                "State time cannot be written in nanoseconds, dropping point"
            );
            return None;
        }

        let mut point = MeasurementPoint::new(measurement, time);
        point
            .tags
            .insert("domain".to_string(), state.entity_id.domain().to_string());
        point
            .tags
            .insert("entity_id".to_string(), state.entity_id.object_id().to_string());
        if include_state {
            point.set_field("state", FieldValue::Str(state.state.clone()));
        }
        if let Some(value) = value {
            point.set_field("value", FieldValue::Float(value));
        }

        let mut keys: Vec<&String> = state.attributes.keys().collect();
        keys.sort();
        for key in keys {
            let value = &state.attributes[key];
            if self.config.tags_attributes.contains(key) {
                point.tags.insert(key.clone(), attribute_text(value));
                continue;
            }
            if key == ATTR_UNIT_OF_MEASUREMENT && !include_unit {
                continue;
            }
            let mut key = key.clone();
            if point.fields.contains_key(&key) {
                key.push('_');
            }
            self.add_attribute_field(&mut point, key, value);
        }

        for (key, value) in &self.config.tags {
            point.tags.insert(key.clone(), value.clone());
        }
        Some(point)
    }

    fn add_attribute_field(&self, point: &mut MeasurementPoint, key: String, value: &Value) {
        if let Some(number) = coerce_float(value) {
            point.set_field(key, FieldValue::Float(number));
            return;
        }
        let text = attribute_text(value);
        if self.digit_tail.is_match(&text) {
            if let Ok(number) = self.non_decimal.replace_all(&text, "").parse::<f64>() {
                point.set_field(key.clone(), FieldValue::Float(number));
            }
        }
        point.set_field(format!("{key}_str"), FieldValue::Str(text));
    }
}

fn override_of(component: &ComponentConfig) -> Option<&str> {
    component
        .override_measurement
        .as_deref()
        .filter(|measurement| !measurement.is_empty())
}

fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn attribute_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use retro_core::{Attributes, Context, State};
    use serde_json::json;

    fn state_event(kind: EventKind, entity_id: &str, value: &str, attributes: Value) -> Event {
        let entity_id: EntityId = entity_id.parse().unwrap();
        let attributes: Attributes = serde_json::from_value(attributes).unwrap();
        let new_state = State::resolve(
            entity_id.clone(),
            value,
            attributes,
            Context::new(),
            None,
            None,
            Some(Utc::now() - Duration::hours(3)),
        );
        Event::new(
            kind,
            StateChangedData {
                entity_id,
                old_state: None,
                new_state: Some(new_state),
            },
            Context::new(),
        )
        .to_json_event()
        .unwrap()
    }

    fn mapper(config: Value) -> PointMapper {
        PointMapper::new(serde_json::from_value(config).unwrap()).unwrap()
    }

    #[test]
    fn test_numeric_state_uses_unit_as_measurement() {
        let event = state_event(
            EventKind::StateChanged,
            "sensor.temp",
            "20.5",
            json!({"unit_of_measurement": "°C", "friendly_name": "Temperature"}),
        );
        let point = mapper(json!({})).event_to_point(&event).unwrap();

        assert_eq!(point.measurement, "°C");
        assert_eq!(point.tags["domain"], "sensor");
        assert_eq!(point.tags["entity_id"], "temp");
        assert_eq!(point.field("value"), Some(&FieldValue::Float(20.5)));
        assert!(point.field("state").is_none());
        assert!(point.field("unit_of_measurement_str").is_none());
        assert_eq!(
            point.field("friendly_name_str"),
            Some(&FieldValue::Str("Temperature".into()))
        );
        assert_eq!(point.time, event.time_fired);
    }

    #[test]
    fn test_historic_event_uses_last_updated() {
        let event = state_event(EventKind::HistoricStateChanged, "sensor.temp", "19.0", json!({}));
        let point = mapper(json!({})).event_to_point(&event).unwrap();
        let expected = event.data["new_state"]["last_updated"].clone();
        let expected: chrono::DateTime<Utc> = serde_json::from_value(expected).unwrap();
        assert_eq!(point.time, expected);
        assert_ne!(point.time, event.time_fired);
    }

    #[test]
    fn test_historic_time_outside_nanosecond_range_is_dropped() {
        let entity_id: EntityId = "sensor.temp".parse().unwrap();
        let ancient = "1600-01-01T00:00:00Z".parse::<chrono::DateTime<Utc>>().unwrap();
        let new_state = State::resolve(
            entity_id.clone(),
            "19.0",
            Attributes::new(),
            Context::new(),
            None,
            None,
            Some(ancient),
        );
        let event = Event::new(
            EventKind::HistoricStateChanged,
            StateChangedData {
                entity_id,
                old_state: None,
                new_state: Some(new_state),
            },
            Context::new(),
        )
        .to_json_event()
        .unwrap();
        assert!(mapper(json!({})).event_to_point(&event).is_none());
    }

    #[test]
    fn test_binary_state_keeps_text_and_number() {
        let event = state_event(EventKind::StateChanged, "light.porch", "on", json!({}));
        let point = mapper(json!({})).event_to_point(&event).unwrap();
        assert_eq!(point.measurement, "light.porch");
        assert_eq!(point.field("value"), Some(&FieldValue::Float(1.0)));
        assert_eq!(point.field("state"), Some(&FieldValue::Str("on".into())));
    }

    #[test]
    fn test_text_state_only() {
        let event = state_event(EventKind::StateChanged, "sensor.mode", "eco", json!({}));
        let point = mapper(json!({"default_measurement": "state"}))
            .event_to_point(&event)
            .unwrap();
        assert_eq!(point.measurement, "state");
        assert!(point.field("value").is_none());
        assert_eq!(point.field("state"), Some(&FieldValue::Str("eco".into())));
    }

    #[test]
    fn test_unusable_states_are_dropped() {
        let m = mapper(json!({}));
        for value in ["", "unknown", "unavailable"] {
            let event = state_event(EventKind::StateChanged, "sensor.temp", value, json!({}));
            assert!(m.event_to_point(&event).is_none(), "{value:?} should be dropped");
        }
        let other = Event::new("call_service", json!({}), Context::new());
        assert!(m.event_to_point(&other).is_none());
    }

    #[test]
    fn test_excluded_domain_produces_no_points() {
        let m = mapper(json!({"exclude": {"domains": ["sensor"]}}));
        for n in 0..5 {
            let event = state_event(
                EventKind::StateChanged,
                &format!("sensor.probe_{n}"),
                "1",
                json!({}),
            );
            assert!(m.event_to_point(&event).is_none());
        }
        let light = state_event(EventKind::StateChanged, "light.porch", "on", json!({}));
        assert!(m.event_to_point(&light).is_some());
    }

    #[test]
    fn test_include_list_limits_entities() {
        let m = mapper(json!({"include": {"entities": ["sensor.temp"]}}));
        let included = state_event(EventKind::StateChanged, "sensor.temp", "1", json!({}));
        let other = state_event(EventKind::StateChanged, "sensor.humidity", "1", json!({}));
        assert!(m.event_to_point(&included).is_some());
        assert!(m.event_to_point(&other).is_none());
    }

    #[test]
    fn test_measurement_priority() {
        let m = mapper(json!({
            "override_measurement": "global",
            "component_config": {"sensor.a": {"override_measurement": "entity"}},
            "component_config_domain": {"sensor": {"override_measurement": "domain"}},
            "component_config_glob": {
                "binary_sensor.*_door": {"override_measurement": "doors"},
                "sensor.*_power": {"override_measurement": "power"},
                "sensor.a*": {"override_measurement": "a_glob"},
            },
        }));
        let unit = json!({"unit_of_measurement": "W"});
        let measure = |entity: &str| {
            let event = state_event(EventKind::StateChanged, entity, "1", unit.clone());
            m.event_to_point(&event).unwrap()
        };

        assert_eq!(measure("sensor.a").measurement, "entity");
        assert_eq!(measure("sensor.b").measurement, "domain");
        assert_eq!(measure("binary_sensor.front_door").measurement, "doors");
        // A glob beats the domain override
        assert_eq!(measure("sensor.kitchen_power").measurement, "power");
        let global = measure("switch.fan");
        assert_eq!(global.measurement, "global");
        // The unit was not used as measurement, so it stays a field
        assert_eq!(
            global.field("unit_of_measurement_str"),
            Some(&FieldValue::Str("W".into()))
        );
    }

    #[test]
    fn test_attribute_fields() {
        let event = state_event(
            EventKind::StateChanged,
            "sensor.meter",
            "42",
            json!({
                "power": 12,
                "energy": "3.5 kWh",
                "enabled": true,
                "value": "duplicate",
                "bad": "inf",
                "room": "attic",
                "tags": ["a", "b"],
            }),
        );
        let point = mapper(json!({"tags_attributes": ["room"], "tags": {"site": "home"}}))
            .event_to_point(&event)
            .unwrap();

        assert_eq!(point.field("power"), Some(&FieldValue::Float(12.0)));
        assert_eq!(point.field("energy"), Some(&FieldValue::Float(3.5)));
        assert_eq!(
            point.field("energy_str"),
            Some(&FieldValue::Str("3.5 kWh".into()))
        );
        assert_eq!(point.field("enabled"), Some(&FieldValue::Float(1.0)));
        assert_eq!(point.field("value"), Some(&FieldValue::Float(42.0)));
        assert_eq!(
            point.field("value__str"),
            Some(&FieldValue::Str("duplicate".into()))
        );
        assert!(point.field("bad").is_none());
        assert!(point.field("bad_str").is_none());
        assert_eq!(
            point.field("tags_str"),
            Some(&FieldValue::Str(r#"["a","b"]"#.into()))
        );
        assert_eq!(point.tags["room"], "attic");
        assert_eq!(point.tags["site"], "home");
        assert!(point.field("room").is_none());
    }

    #[test]
    fn test_every_attribute_survives_as_number_or_text() {
        let attributes = json!({
            "a": 1.25,
            "b": "text",
            "c": "v12",
            "d": false,
            "e": {"nested": 1},
            "f": "-7",
        });
        let event = state_event(EventKind::StateChanged, "sensor.any", "ok", attributes.clone());
        let point = mapper(json!({})).event_to_point(&event).unwrap();

        for (key, value) in attributes.as_object().unwrap() {
            let numeric = point.field(key).and_then(FieldValue::as_f64);
            let text = point
                .field(&format!("{key}_str"))
                .and_then(FieldValue::as_str);
            assert!(
                numeric.is_some() || text.is_some(),
                "attribute {key} = {value} was lost"
            );
            if let Some(text) = text {
                assert_eq!(text, attribute_text(value));
            }
        }
        assert_eq!(point.field("c"), Some(&FieldValue::Float(12.0)));
    }

    #[test]
    fn test_glob_translation() {
        let re = glob_to_regex("sensor.kitchen_?.*").unwrap();
        assert!(re.is_match("sensor.kitchen_1.x"));
        assert!(!re.is_match("sensor.kitchen_12"));
        assert!(!re.is_match("xsensor.kitchen_1.x"));
    }
}
