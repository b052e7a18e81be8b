//! InfluxDB exporter for retro_state
//!
//! Every `state_changed` and `historic_state_changed` event is turned into a
//! [`MeasurementPoint`] and written to InfluxDB in batches. Historic events
//! are stamped with the state's own `last_updated`, so late facts land at the
//! right place in the series instead of at the time they were reported.

mod config;
mod exporter;
mod mapping;
mod point;
mod sink;

pub use config::{ComponentConfig, InfluxConfig};
pub use exporter::{ExportTask, Exporter, ExporterStats};
pub use mapping::{state_as_number, PointMapper};
pub use point::{to_line_protocol, FieldValue, MeasurementPoint};
pub use sink::{HttpSink, SinkError, TimeSeriesSink};

use thiserror::Error;

/// Result type for exporter setup and shutdown
pub type ExportResult<T> = Result<T, ExportError>;

/// Errors surfaced by the exporter handle
#[derive(Debug, Error)]
pub enum ExportError {
    /// A `component_config_glob` pattern could not be compiled
    #[error("invalid component glob: {0}")]
    Glob(#[source] regex::Error),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("exporter task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Map an event with a fresh mapper; prefer [`PointMapper`] when mapping many
pub fn event_to_point(
    event: &retro_core::Event,
    config: &InfluxConfig,
) -> ExportResult<Option<MeasurementPoint>> {
    let mapper = PointMapper::new(config.clone()).map_err(ExportError::Glob)?;
    Ok(mapper.event_to_point(event))
}
