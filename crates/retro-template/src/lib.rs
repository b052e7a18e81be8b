//! Historic template sensors
//!
//! Sensors whose value and timestamps come from Jinja templates. A sensor
//! that renders a `last_updated` older than its live state is written as a
//! historic fact, so it can backfill readings reported late by its source.

pub mod config;
pub mod engine;
pub mod error;
pub mod functions;
pub mod platform;
pub mod sensor;
pub mod states;

pub use config::{HistoricTemplateConfig, TemplateSensorConfig};
pub use engine::TemplateEngine;
pub use error::{TemplateError, TemplateResult};
pub use platform::{TemplateSensorPlatform, Tracking};
pub use sensor::{HistoricSensor, RenderedState, SensorIdentity, SensorVariant};
