//! Historic sensors: state producers that may carry their own timestamps

use chrono::{DateTime, Utc};
use retro_core::{
    Attributes, EntityId, ATTR_DEVICE_CLASS, ATTR_ENTITY_PICTURE, ATTR_FRIENDLY_NAME, ATTR_ICON,
    ATTR_UNIT_OF_MEASUREMENT, STATE_UNKNOWN,
};
use retro_state_store::StateWrite;
use tracing::{error, warn};

use crate::config::TemplateSensorConfig;
use crate::engine::TemplateEngine;
use crate::error::{TemplateError, TemplateResult};
use crate::functions::parse_datetime;

/// Who a sensor is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorIdentity {
    /// Configuration key
    pub slug: String,
    pub entity_id: EntityId,
}

/// Value and timestamps to write
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedState {
    pub value: String,
    pub last_changed: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// A sensor whose properties come from templates
#[derive(Debug, Clone)]
pub struct TemplateSensor {
    config: TemplateSensorConfig,
    state: Option<String>,
    last_changed: Option<DateTime<Utc>>,
    last_updated: Option<DateTime<Utc>>,
    icon: Option<String>,
    entity_picture: Option<String>,
    name: String,
}

/// A sensor configured with literal values only
#[derive(Debug, Clone)]
pub struct StaticSensor {
    value: String,
    last_changed: Option<DateTime<Utc>>,
    last_updated: Option<DateTime<Utc>>,
    icon: Option<String>,
    entity_picture: Option<String>,
    name: String,
}

#[derive(Debug, Clone)]
pub enum SensorVariant {
    Template(TemplateSensor),
    Static(StaticSensor),
}

/// A configured historic sensor
#[derive(Debug, Clone)]
pub struct HistoricSensor {
    identity: SensorIdentity,
    unit_of_measurement: Option<String>,
    device_class: Option<String>,
    variant: SensorVariant,
}

impl HistoricSensor {
    /// Build `sensor.<slug>` from its configuration
    ///
    /// Templates are compiled here so syntax errors surface at setup.
    pub fn from_config(
        slug: &str,
        config: &TemplateSensorConfig,
        engine: &TemplateEngine,
    ) -> TemplateResult<Self> {
        let entity_id = EntityId::new("sensor", slug).map_err(|err| TemplateError::Render {
            message: err.to_string(),
        })?;
        let name = config.friendly_name.clone().unwrap_or_else(|| slug.to_string());

        let is_static = config
            .templates()
            .all(|(_, template)| !TemplateEngine::is_template(template));
        let variant = if is_static {
            SensorVariant::Static(StaticSensor {
                value: config.value_template.clone(),
                last_changed: literal_time(config.last_changed_template.as_deref())?,
                last_updated: literal_time(config.last_updated_template.as_deref())?,
                icon: config.icon_template.clone(),
                entity_picture: config.entity_picture_template.clone(),
                name: config.friendly_name_template.clone().unwrap_or(name),
            })
        } else {
            for (_, template) in config.templates() {
                engine.check(template)?;
            }
            SensorVariant::Template(TemplateSensor {
                config: config.clone(),
                state: None,
                last_changed: None,
                last_updated: None,
                icon: None,
                entity_picture: None,
                name,
            })
        };

        Ok(Self {
            identity: SensorIdentity {
                slug: slug.to_string(),
                entity_id,
            },
            unit_of_measurement: config.unit_of_measurement.clone(),
            device_class: config.device_class.clone(),
            variant,
        })
    }

    pub fn identity(&self) -> &SensorIdentity {
        &self.identity
    }

    pub(crate) fn set_entity_id(&mut self, entity_id: EntityId) {
        self.identity.entity_id = entity_id;
    }

    pub fn variant(&self) -> &SensorVariant {
        &self.variant
    }

    pub fn name(&self) -> &str {
        match &self.variant {
            SensorVariant::Template(sensor) => &sensor.name,
            SensorVariant::Static(sensor) => &sensor.name,
        }
    }

    /// Re-render every template; static sensors have nothing to do
    pub fn update(&mut self, engine: &TemplateEngine) {
        if let SensorVariant::Template(sensor) = &mut self.variant {
            sensor.update(engine);
        }
    }

    /// Value and explicit timestamps from the last update
    pub fn render_state(&self) -> RenderedState {
        match &self.variant {
            SensorVariant::Template(sensor) => RenderedState {
                value: sensor
                    .state
                    .clone()
                    .unwrap_or_else(|| STATE_UNKNOWN.to_string()),
                last_changed: sensor.last_changed,
                last_updated: sensor.last_updated,
            },
            SensorVariant::Static(sensor) => RenderedState {
                value: sensor.value.clone(),
                last_changed: sensor.last_changed,
                last_updated: sensor.last_updated,
            },
        }
    }

    pub fn render_attributes(&self) -> Attributes {
        let (icon, entity_picture) = match &self.variant {
            SensorVariant::Template(sensor) => (&sensor.icon, &sensor.entity_picture),
            SensorVariant::Static(sensor) => (&sensor.icon, &sensor.entity_picture),
        };

        let mut attributes = Attributes::new();
        attributes.insert(ATTR_FRIENDLY_NAME.into(), self.name().into());
        let optional = [
            (ATTR_UNIT_OF_MEASUREMENT, &self.unit_of_measurement),
            (ATTR_ICON, icon),
            (ATTR_ENTITY_PICTURE, entity_picture),
            (ATTR_DEVICE_CLASS, &self.device_class),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                attributes.insert(key.into(), value.clone().into());
            }
        }
        attributes
    }

    /// The write this sensor hands to the state store
    pub fn to_write(&self) -> StateWrite {
        let rendered = self.render_state();
        let mut write = StateWrite::new(rendered.value).attributes(self.render_attributes());
        if let Some(ts) = rendered.last_changed {
            write = write.last_changed(ts);
        }
        if let Some(ts) = rendered.last_updated {
            write = write.last_updated(ts);
        }
        write
    }
}

impl TemplateSensor {
    /// Configured templates with their property names
    pub fn templates(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.config.templates()
    }

    fn update(&mut self, engine: &TemplateEngine) {
        match engine.render(&self.config.value_template) {
            Ok(value) => self.state = Some(value),
            Err(err) if err.is_undefined() => {
                warn!(sensor = %self.name, "Could not render template, the state is unknown");
            }
            Err(err) => {
                self.state = None;
                error!(sensor = %self.name, %err, "Could not render template");
            }
        }

        if let Some(template) = &self.config.last_changed_template {
            let rendered = render_time(engine, template);
            self.last_changed = self.resolve("last changed", rendered, self.last_changed, None);
        }
        if let Some(template) = &self.config.last_updated_template {
            let rendered = render_time(engine, template);
            self.last_updated = self.resolve("last updated", rendered, self.last_updated, None);
        }
        if let Some(template) = &self.config.icon_template {
            let rendered = engine.render(template);
            self.icon = self.resolve("icon", rendered.map(Some), self.icon.clone(), None);
        }
        if let Some(template) = &self.config.entity_picture_template {
            let rendered = engine.render(template);
            self.entity_picture =
                self.resolve("entity picture", rendered.map(Some), self.entity_picture.clone(), None);
        }
        if let Some(template) = &self.config.friendly_name_template {
            let rendered = engine.render(template);
            let fallback = self.config.friendly_name.clone();
            if let Some(name) = self.resolve("name", rendered.map(Some), Some(self.name.clone()), fallback) {
                self.name = name;
            }
        }
    }

    /// Pick a property value after a render
    ///
    /// An undefined value keeps the previous value; any other failure falls
    /// back to `reset`.
    fn resolve<T>(
        &self,
        property: &str,
        rendered: TemplateResult<Option<T>>,
        previous: Option<T>,
        reset: Option<T>,
    ) -> Option<T> {
        match rendered {
            Ok(value) => value,
            Err(err) if err.is_undefined() => {
                warn!(sensor = %self.name, property, "Could not render template, the state is unknown");
                previous
            }
            Err(err) => {
                error!(sensor = %self.name, property, %err, "Could not render template");
                reset
            }
        }
    }
}

/// Render a timestamp template; empty or `none` means no timestamp
fn render_time(engine: &TemplateEngine, template: &str) -> TemplateResult<Option<DateTime<Utc>>> {
    let rendered = engine.render(template)?;
    parse_time(&rendered)
}

fn parse_time(rendered: &str) -> TemplateResult<Option<DateTime<Utc>>> {
    let text = rendered.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    parse_datetime(text)
        .map(Some)
        .ok_or_else(|| TemplateError::InvalidTimestamp {
            value: text.to_string(),
        })
}

fn literal_time(literal: Option<&str>) -> TemplateResult<Option<DateTime<Utc>>> {
    match literal {
        Some(text) => parse_time(text),
        None => Ok(None),
    }
}
