//! Configuration for the `historic_template:` section

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Sensors keyed by slug; each becomes `sensor.<slug>`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoricTemplateConfig {
    #[serde(default)]
    pub sensors: BTreeMap<String, TemplateSensorConfig>,
}

/// One historic template sensor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateSensorConfig {
    pub value_template: String,
    #[serde(default)]
    pub last_changed_template: Option<String>,
    #[serde(default)]
    pub last_updated_template: Option<String>,
    #[serde(default)]
    pub icon_template: Option<String>,
    #[serde(default)]
    pub entity_picture_template: Option<String>,
    #[serde(default)]
    pub friendly_name_template: Option<String>,
    /// Defaults to the slug
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub unit_of_measurement: Option<String>,
    #[serde(default)]
    pub device_class: Option<String>,
    /// Entities to track instead of the ones found in the templates
    #[serde(default)]
    pub entity_id: Option<Vec<String>>,
}

impl TemplateSensorConfig {
    pub fn new(value_template: impl Into<String>) -> Self {
        Self {
            value_template: value_template.into(),
            last_changed_template: None,
            last_updated_template: None,
            icon_template: None,
            entity_picture_template: None,
            friendly_name_template: None,
            friendly_name: None,
            unit_of_measurement: None,
            device_class: None,
            entity_id: None,
        }
    }

    /// Every configured template with its property name
    pub fn templates(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("value", Some(&self.value_template)),
            ("last_changed", self.last_changed_template.as_ref()),
            ("last_updated", self.last_updated_template.as_ref()),
            ("icon", self.icon_template.as_ref()),
            ("entity_picture", self.entity_picture_template.as_ref()),
            ("friendly_name", self.friendly_name_template.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, template)| template.map(|t| (name, t.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_config_from_yaml() {
        let config: HistoricTemplateConfig = serde_yaml::from_str(
            r#"
sensors:
  outside_temp:
    value_template: "{{ states('sensor.probe') }}"
    last_updated_template: "{{ state_attr('sensor.probe', 'measured_at') }}"
    unit_of_measurement: "°C"
    entity_id:
      - sensor.probe
"#,
        )
        .unwrap();
        let sensor = &config.sensors["outside_temp"];
        assert_eq!(sensor.unit_of_measurement.as_deref(), Some("°C"));
        assert_eq!(sensor.entity_id.as_ref().map(Vec::len), Some(1));
        let names: Vec<_> = sensor.templates().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["value", "last_updated"]);
    }
}
