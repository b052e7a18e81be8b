//! Error types for the supervisor

use std::path::PathBuf;

use retro_influxdb::ExportError;
use retro_recorder::RecorderError;
use thiserror::Error;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors from starting or stopping the integrations
#[derive(Debug, Error)]
pub enum RetroStateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("recorder: {0}")]
    Recorder(#[from] RecorderError),

    #[error("influxdb: {0}")]
    Export(#[from] ExportError),

    #[error("historic template task failed: {0}")]
    Sensors(#[from] tokio::task::JoinError),
}
