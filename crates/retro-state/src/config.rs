//! Top-level YAML configuration
//!
//! ```yaml
//! recorder:
//!   db_path: /config/home-assistant_v2.db
//!   purge_keep_days: 10
//! influxdb:
//!   host: influx.lan
//!   database: home_assistant
//! historic_template:
//!   sensors:
//!     rain:
//!       value_template: "{{ states('sensor.rain_gauge') }}"
//! ```
//!
//! Each section enables its integration; a section present with no body
//! enables it with defaults.

use std::fs;
use std::path::Path;

use retro_influxdb::InfluxConfig;
use retro_recorder::RecorderConfig;
use retro_template::HistoricTemplateConfig;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetroStateConfig {
    #[serde(default, deserialize_with = "section")]
    pub recorder: Option<RecorderConfig>,

    #[serde(default, deserialize_with = "section")]
    pub influxdb: Option<InfluxConfig>,

    #[serde(default, deserialize_with = "section")]
    pub historic_template: Option<HistoricTemplateConfig>,
}

/// A present but empty section means "enabled with defaults"
fn section<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?.unwrap_or_default()))
}

impl RetroStateConfig {
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        Self::parse(content, Path::new("<string>"))
    }

    pub fn load_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> ConfigResult<Self> {
        // An empty file is a null document
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Names of the enabled integrations
    pub fn enabled(&self) -> Vec<&'static str> {
        [
            ("recorder", self.recorder.is_some()),
            ("influxdb", self.influxdb.is_some()),
            ("historic_template", self.historic_template.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, on)| on.then_some(name))
        .collect()
    }
}
