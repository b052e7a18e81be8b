//! Exporter configuration

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use retro_core::{duration_secs, EntityFilter};
use serde::{Deserialize, Serialize};

/// Per-entity, per-domain or per-glob settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Measurement name to use instead of the derived one
    #[serde(default)]
    pub override_measurement: Option<String>,
}

/// Configuration for the `influxdb:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub ssl: bool,

    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Write attempts per batch before it is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Wait between write attempts
    #[serde(default = "default_retry_delay", with = "duration_secs")]
    pub retry_delay: Duration,

    /// Wait before trying to reach an unreachable database again
    #[serde(default = "default_connect_retry_interval", with = "duration_secs")]
    pub connect_retry_interval: Duration,

    /// HTTP request timeout
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,

    /// Measurement for states without a unit
    #[serde(default)]
    pub default_measurement: Option<String>,

    /// Measurement for every state, unless a component override applies
    #[serde(default)]
    pub override_measurement: Option<String>,

    /// Static tags added to every point
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Attributes written as tags instead of fields
    #[serde(default)]
    pub tags_attributes: Vec<String>,

    /// Keyed by entity id
    #[serde(default)]
    pub component_config: HashMap<String, ComponentConfig>,

    /// Keyed by domain
    #[serde(default)]
    pub component_config_domain: HashMap<String, ComponentConfig>,

    /// Keyed by entity id glob (`*` and `?`)
    #[serde(default)]
    pub component_config_glob: BTreeMap<String, ComponentConfig>,

    #[serde(flatten)]
    pub filter: EntityFilter,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8086
}

fn default_database() -> String {
    "home_assistant".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(20)
}

fn default_connect_retry_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ssl: false,
            verify_ssl: true,
            database: default_database(),
            username: None,
            password: None,
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            connect_retry_interval: default_connect_retry_interval(),
            timeout: default_timeout(),
            default_measurement: None,
            override_measurement: None,
            tags: BTreeMap::new(),
            tags_attributes: Vec::new(),
            component_config: HashMap::new(),
            component_config_domain: HashMap::new(),
            component_config_glob: BTreeMap::new(),
            filter: EntityFilter::default(),
        }
    }
}

impl InfluxConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: InfluxConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.base_url(), "http://localhost:8086");
        assert_eq!(config.database, "home_assistant");
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.connect_retry_interval, Duration::from_secs(60));
        assert!(config.filter.include.is_empty());
    }

    #[test]
    fn test_component_config_sections() {
        let config: InfluxConfig = serde_json::from_value(serde_json::json!({
            "host": "influx.lan",
            "ssl": true,
            "component_config": {"sensor.outside": {"override_measurement": "weather"}},
            "component_config_glob": {"sensor.*_power": {"override_measurement": "power"}},
            "exclude": {"domains": ["automation"]},
        }))
        .unwrap();
        assert_eq!(config.base_url(), "https://influx.lan:8086");
        assert_eq!(
            config.component_config["sensor.outside"]
                .override_measurement
                .as_deref(),
            Some("weather")
        );
        assert!(config.component_config_glob.contains_key("sensor.*_power"));
        assert!(config.filter.exclude.domains.contains("automation"));
    }
}
