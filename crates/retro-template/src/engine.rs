//! Template engine backed by the state store

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use minijinja::{Environment, Value};
use regex::Regex;
use retro_state_store::StateStore;
use tracing::trace;

use crate::error::TemplateResult;
use crate::functions;
use crate::states::StatesObject;

/// Entity references a template can make
fn entity_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?:states\.|(?:states|is_state|state_attr|has_value)\(\s*['"])([a-z0-9_]+\.[a-z0-9_]+)"#,
        )
        .expect("entity reference pattern is valid")
    })
}

/// Jinja template engine with state access
///
/// Templates can use:
/// - `states('sensor.temp')`, `states.sensor.temp.attributes.x`
/// - `is_state()`, `state_attr()`, `has_value()`
/// - `now()`, `utcnow()`, `as_timestamp()`
/// - the `float` and `int` filters
pub struct TemplateEngine {
    env: Environment<'static>,
    states: Arc<StatesObject>,
}

impl TemplateEngine {
    pub fn new(store: Arc<StateStore>) -> Self {
        let states = Arc::new(StatesObject::new(store));
        let mut env = Environment::new();

        env.add_filter("float", functions::to_float);
        env.add_filter("int", functions::to_int);

        env.add_global("states", Value::from_object((*states).clone()));
        env.add_function("now", functions::now);
        env.add_function("utcnow", functions::utcnow);
        env.add_function("as_timestamp", functions::as_timestamp);

        let s = states.clone();
        env.add_function("is_state", move |entity_id: &str, state: Value| {
            s.is_state(entity_id, &state)
        });
        let s = states.clone();
        env.add_function("state_attr", move |entity_id: &str, attribute: &str| {
            s.state_attr(entity_id, attribute)
        });
        let s = states.clone();
        env.add_function("has_value", move |entity_id: &str| s.has_value(entity_id));

        Self { env, states }
    }

    /// Render a template string
    pub fn render(&self, template: &str) -> TemplateResult<String> {
        trace!(template, "Rendering template");
        let tmpl = self.env.template_from_str(template)?;
        Ok(tmpl.render(())?)
    }

    /// Render a template with extra variables
    pub fn render_with_context(
        &self,
        template: &str,
        context: impl serde::Serialize,
    ) -> TemplateResult<String> {
        let tmpl = self.env.template_from_str(template)?;
        Ok(tmpl.render(context)?)
    }

    /// Compile a template without rendering it
    pub fn check(&self, template: &str) -> TemplateResult<()> {
        self.env.template_from_str(template)?;
        Ok(())
    }

    pub fn states(&self) -> &StatesObject {
        &self.states
    }

    /// Check if a string contains template syntax
    pub fn is_template(template: &str) -> bool {
        template.contains("{{") || template.contains("{%") || template.contains("{#")
    }

    /// Entity ids a template reads, or `None` when none can be found
    pub fn extract_entities(template: &str) -> Option<BTreeSet<String>> {
        let found: BTreeSet<String> = entity_reference()
            .captures_iter(template)
            .map(|c| c[1].to_string())
            .collect();
        (!found.is_empty()).then_some(found)
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retro_event_bus::EventBus;
    use retro_state_store::StateWrite;

    fn make_test_engine() -> TemplateEngine {
        let store = Arc::new(StateStore::new(Arc::new(EventBus::new())));
        store
            .write(
                "light.living_room",
                StateWrite::new("on")
                    .attribute("brightness", 255)
                    .attribute("friendly_name", "Living Room"),
            )
            .unwrap();
        store
            .write(
                "sensor.outside",
                StateWrite::new("12.5")
                    .attribute("unit_of_measurement", "°C")
                    .attribute("measured_at", "2019-05-01T12:30:00+00:00"),
            )
            .unwrap();
        store
            .write("sensor.battery", StateWrite::new("unavailable"))
            .unwrap();
        TemplateEngine::new(store)
    }

    #[test]
    fn test_states_function_and_object() {
        let engine = make_test_engine();
        assert_eq!(engine.render("{{ states('light.living_room') }}").unwrap(), "on");
        assert_eq!(engine.render("{{ states('light.missing') }}").unwrap(), "unknown");
        assert_eq!(engine.render("{{ states.light.living_room.state }}").unwrap(), "on");
        assert_eq!(engine.render("{{ states.sensor.outside }}").unwrap(), "12.5");
        assert_eq!(
            engine.render("{{ states.light.living_room.name }}").unwrap(),
            "Living Room"
        );
    }

    #[test]
    fn test_state_helpers() {
        let engine = make_test_engine();
        assert_eq!(engine.render("{{ is_state('light.living_room', 'on') }}").unwrap(), "true");
        assert_eq!(
            engine.render("{{ is_state('light.living_room', ['off', 'on']) }}").unwrap(),
            "true"
        );
        assert_eq!(
            engine.render("{{ state_attr('light.living_room', 'brightness') }}").unwrap(),
            "255"
        );
        assert_eq!(engine.render("{{ has_value('sensor.outside') }}").unwrap(), "true");
        assert_eq!(engine.render("{{ has_value('sensor.battery') }}").unwrap(), "false");
    }

    #[test]
    fn test_filters_and_time() {
        let engine = make_test_engine();
        assert_eq!(
            engine.render("{{ states('sensor.outside') | float * 2 }}").unwrap(),
            "25.0"
        );
        assert_eq!(engine.render("{{ states('sensor.outside') | int }}").unwrap(), "12");
        assert_eq!(
            engine
                .render("{{ as_timestamp(state_attr('sensor.outside', 'measured_at')) | int }}")
                .unwrap(),
            "1556713800"
        );
        let year: i32 = engine.render("{{ utcnow().year }}").unwrap().parse().unwrap();
        assert!(year >= 2024);
    }

    #[test]
    fn test_missing_entity_attribute_is_undefined_error() {
        let engine = make_test_engine();
        let err = engine.render("{{ states.sensor.missing.state }}").unwrap_err();
        assert!(err.is_undefined(), "{err}");

        let err = engine.render("{{ states('sensor.outside') | nope }}").unwrap_err();
        assert!(!err.is_undefined());
    }

    #[test]
    fn test_extract_entities() {
        let found = TemplateEngine::extract_entities(
            "{{ states('sensor.a') | float + states.sensor.b.state | float }}\
             {% if is_state(\"light.c\", 'on') %}{{ state_attr('sensor.a', 'x') }}{% endif %}",
        )
        .unwrap();
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec!["light.c", "sensor.a", "sensor.b"]
        );
        assert_eq!(TemplateEngine::extract_entities("{{ now() }}"), None);
    }

    #[test]
    fn test_is_template() {
        assert!(TemplateEngine::is_template("{{ 1 }}"));
        assert!(!TemplateEngine::is_template("21.5"));
    }
}
