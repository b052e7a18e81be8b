//! retro_state supervisor
//!
//! Owns the event bus, the state store and every enabled integration:
//! the recorder, the InfluxDB exporter and the historic template sensors.
//!
//! ```text
//! RetroState::init(config)   build the bus and store, start the integrations
//!     .start().await         wait for the recorder, fire homeassistant_start
//!     .shutdown().await      fire homeassistant_stop, drain and stop
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use config::RetroStateConfig;
pub use error::{ConfigError, ConfigResult, RetroStateError};
pub use logging::init_logging;

use std::sync::Arc;

use retro_core::events::{NotificationData, HOMEASSISTANT_START, HOMEASSISTANT_STOP};
use retro_core::{Context, Event};
use retro_event_bus::EventBus;
use retro_influxdb::Exporter;
use retro_recorder::{Recorder, RecorderStatus};
use retro_state_store::StateStore;
use retro_template::TemplateSensorPlatform;
use tracing::{error, info, warn};

pub const DOMAIN: &str = "retro_state";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ISSUE_URL: &str = "https://gitlab.com/jbeckman/retro_state/issues";

/// Message shown when the recorder cannot reach its database
pub const RECORDER_FAILED_MESSAGE: &str = "The recorder could not start, please check the log";

/// Startup banner logged once per process
pub fn startup_banner() -> String {
    format!(
        "\n-------------------------------------------------------------------\n\
         {DOMAIN}\n\
         Version: {VERSION}\n\
         This is a custom component\n\
         If you have any issues with this you need to open an issue here:\n\
         {ISSUE_URL}\n\
         -------------------------------------------------------------------"
    )
}

/// The running set of integrations
pub struct RetroState {
    bus: Arc<EventBus>,
    store: Arc<StateStore>,
    recorder: Option<Recorder>,
    exporter: Option<Exporter>,
    sensors: Option<TemplateSensorPlatform>,
}

impl RetroState {
    /// Build the bus and store and start every configured integration
    ///
    /// Must be called inside a tokio runtime.
    pub fn init(config: RetroStateConfig) -> Result<Self, RetroStateError> {
        info!("{}", startup_banner());
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(StateStore::new(bus.clone()));
        Self::init_with(config, bus, store)
    }

    /// Start the integrations on an existing bus and store
    pub fn init_with(
        config: RetroStateConfig,
        bus: Arc<EventBus>,
        store: Arc<StateStore>,
    ) -> Result<Self, RetroStateError> {
        let enabled = config.enabled();
        if enabled.is_empty() {
            warn!("You have enabled {DOMAIN}, but not any integrations");
        }
        for name in &enabled {
            info!("The {name} integration for {DOMAIN} is enabled. Setting it up");
        }

        let recorder = config
            .recorder
            .map(|c| Recorder::start(c, &bus))
            .transpose()?;
        let exporter = config
            .influxdb
            .map(|c| Exporter::start(c, &bus))
            .transpose()?;
        let sensors = config
            .historic_template
            .and_then(|c| TemplateSensorPlatform::setup(&c, store.clone(), &bus));

        Ok(Self {
            bus,
            store,
            recorder,
            exporter,
            sensors,
        })
    }

    /// Wait for the recorder to connect, then fire `homeassistant_start`
    ///
    /// A recorder that cannot connect does not stop the others; the failure
    /// is logged and announced with a notification event.
    pub async fn start(&self) {
        if let Some(recorder) = &self.recorder {
            if recorder.wait_ready().await == RecorderStatus::Failed {
                error!("{RECORDER_FAILED_MESSAGE}");
                self.bus.fire_typed(
                    NotificationData {
                        title: "Recorder".to_string(),
                        message: RECORDER_FAILED_MESSAGE.to_string(),
                    },
                    Context::new(),
                );
            }
        }
        self.bus.fire(Event::new(
            HOMEASSISTANT_START,
            serde_json::Value::Object(Default::default()),
            Context::new(),
        ));
        info!("{DOMAIN} started");
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn recorder(&self) -> Option<&Recorder> {
        self.recorder.as_ref()
    }

    pub fn exporter(&self) -> Option<&Exporter> {
        self.exporter.as_ref()
    }

    pub fn sensors(&self) -> Option<&TemplateSensorPlatform> {
        self.sensors.as_ref()
    }

    /// Wait until every integration has processed what is queued
    pub async fn block_till_done(&self) {
        if let Some(sensors) = &self.sensors {
            sensors.block_till_done().await;
        }
        if let Some(exporter) = &self.exporter {
            exporter.block_till_done().await;
        }
        if let Some(recorder) = &self.recorder {
            recorder.block_till_done().await;
        }
    }

    /// Fire `homeassistant_stop` and stop every integration
    ///
    /// Producers stop first so the recorder sees everything they wrote.
    pub async fn shutdown(mut self) -> Result<(), RetroStateError> {
        self.bus.fire(Event::new(
            HOMEASSISTANT_STOP,
            serde_json::Value::Object(Default::default()),
            Context::new(),
        ));
        if let Some(sensors) = self.sensors.take() {
            sensors.shutdown().await?;
        }
        if let Some(exporter) = self.exporter.take() {
            exporter.shutdown().await?;
        }
        if let Some(recorder) = self.recorder.take() {
            recorder.shutdown().await?;
        }
        info!("{DOMAIN} stopped");
        Ok(())
    }
}

impl std::fmt::Debug for RetroState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetroState")
            .field("recorder", &self.recorder)
            .field("exporter", &self.exporter)
            .field("sensors", &self.sensors)
            .finish_non_exhaustive()
    }
}
