//! The historic template sensor platform
//!
//! Sensors are rendered on `homeassistant_start` and again whenever one of
//! the entities they read fires `state_changed`. Every render is written
//! through [`StateStore::write`], so a sensor whose timestamp template
//! yields a time older than its live state produces a historic event.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use retro_core::events::{HOMEASSISTANT_START, STATE_CHANGED};
use retro_core::EntityId;
use retro_event_bus::{work_queue, EventBus, ListenerId, WorkQueue, WorkReceiver};
use retro_state_store::StateStore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::HistoricTemplateConfig;
use crate::engine::TemplateEngine;
use crate::sensor::{HistoricSensor, SensorVariant};

/// Items processed by the sensor task
#[derive(Debug, Clone, PartialEq, Eq)]
enum SensorTask {
    /// Render every sensor
    UpdateAll,
    /// A tracked entity changed
    Changed(String),
    Stop,
}

/// Which state changes re-render a sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tracking {
    Entities(BTreeSet<String>),
    /// Nothing to track; rendered on start and on request only
    StartOnly,
}

impl Tracking {
    fn tracks(&self, entity_id: &str) -> bool {
        match self {
            Tracking::Entities(ids) => ids.contains(entity_id),
            Tracking::StartOnly => false,
        }
    }
}

struct TrackedSensor {
    sensor: HistoricSensor,
    tracking: Tracking,
}

/// Handle to the running sensor platform
pub struct TemplateSensorPlatform {
    bus: Arc<EventBus>,
    queue: WorkQueue<SensorTask>,
    listeners: Vec<ListenerId>,
    entity_ids: Vec<EntityId>,
    task: Option<JoinHandle<()>>,
}

impl TemplateSensorPlatform {
    /// Build the configured sensors and start tracking
    ///
    /// Sensors with bad templates are logged and skipped. Returns `None`
    /// when no sensor could be added. Must be called inside a tokio runtime.
    pub fn setup(
        config: &HistoricTemplateConfig,
        store: Arc<StateStore>,
        bus: &Arc<EventBus>,
    ) -> Option<Self> {
        let engine = TemplateEngine::new(store.clone());
        let mut taken: HashSet<String> = store.entity_ids("sensor").into_iter().collect();
        let mut sensors = Vec::new();

        for (slug, sensor_config) in &config.sensors {
            let mut sensor = match HistoricSensor::from_config(slug, sensor_config, &engine) {
                Ok(sensor) => sensor,
                Err(err) => {
                    error!(sensor = %slug, %err, "Invalid historic template sensor");
                    continue;
                }
            };
            let entity_id = unique_entity_id(sensor.identity().entity_id.clone(), &taken);
            taken.insert(entity_id.to_string());
            sensor.set_entity_id(entity_id);

            let tracking = tracking_for(&sensor, sensor_config.entity_id.as_deref());
            sensors.push(TrackedSensor { sensor, tracking });
        }

        if sensors.is_empty() {
            error!("No sensors added");
            return None;
        }

        let entity_ids: Vec<EntityId> = sensors
            .iter()
            .map(|t| t.sensor.identity().entity_id.clone())
            .collect();
        let tracked: Arc<BTreeSet<String>> = Arc::new(
            sensors
                .iter()
                .filter_map(|t| match &t.tracking {
                    Tracking::Entities(ids) => Some(ids.iter().cloned()),
                    Tracking::StartOnly => None,
                })
                .flatten()
                .collect(),
        );

        let (queue, rx) = work_queue();
        let mut listeners = Vec::new();

        let start_queue = queue.clone();
        let start_listener = bus.listen(HOMEASSISTANT_START, move |_| {
            start_queue.push(SensorTask::UpdateAll);
        });
        listeners.push(start_listener);

        if !tracked.is_empty() {
            let change_queue = queue.clone();
            listeners.push(bus.listen(STATE_CHANGED, move |event| {
                if let Some(entity_id) = event.data.get("entity_id").and_then(|v| v.as_str()) {
                    if tracked.contains(entity_id) {
                        change_queue.push(SensorTask::Changed(entity_id.to_string()));
                    }
                }
            }));
        }

        info!(sensors = sensors.len(), "Historic template sensors set up");
        let worker = SensorWorker {
            sensors,
            engine,
            store,
            bus: bus.clone(),
            rx,
            start_listener: Some(start_listener),
            started: false,
        };
        let task = tokio::spawn(worker.run());

        Some(Self {
            bus: bus.clone(),
            queue,
            listeners,
            entity_ids,
            task: Some(task),
        })
    }

    /// Entity ids of the sensors, in configuration order
    pub fn entity_ids(&self) -> &[EntityId] {
        &self.entity_ids
    }

    /// Render and write every sensor now
    pub fn update_all(&self) {
        self.queue.push(SensorTask::UpdateAll);
    }

    /// Wait until every queued render has been written
    pub async fn block_till_done(&self) {
        self.queue.join().await;
    }

    /// Stop tracking and end the sensor task
    pub async fn shutdown(mut self) -> Result<(), JoinError> {
        for id in self.listeners.drain(..) {
            self.bus.remove_listener(id);
        }
        self.queue.push(SensorTask::Stop);
        if let Some(task) = self.task.take() {
            task.await?;
        }
        debug!("Historic template sensors shut down");
        Ok(())
    }
}

impl Drop for TemplateSensorPlatform {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.bus.remove_listener(id);
        }
        if self.task.is_some() {
            self.queue.push(SensorTask::Stop);
        }
    }
}

impl std::fmt::Debug for TemplateSensorPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateSensorPlatform")
            .field("entity_ids", &self.entity_ids)
            .field("outstanding", &self.queue.outstanding())
            .finish()
    }
}

/// Append `_2`, `_3`, ... until the id is free
fn unique_entity_id(entity_id: EntityId, taken: &HashSet<String>) -> EntityId {
    if !taken.contains(&entity_id.to_string()) {
        return entity_id;
    }
    let (domain, object_id) = (entity_id.domain().to_string(), entity_id.object_id().to_string());
    let free = (2..)
        .filter_map(|n| EntityId::new(domain.as_str(), format!("{object_id}_{n}")).ok())
        .find(|candidate| !taken.contains(&candidate.to_string()));
    free.unwrap_or(entity_id)
}

fn tracking_for(sensor: &HistoricSensor, manual: Option<&[String]>) -> Tracking {
    if let Some(ids) = manual {
        return Tracking::Entities(ids.iter().map(|id| id.trim().to_lowercase()).collect());
    }
    let SensorVariant::Template(template_sensor) = sensor.variant() else {
        return Tracking::Entities(BTreeSet::new());
    };

    let mut ids = BTreeSet::new();
    let mut untrackable = Vec::new();
    for (name, template) in template_sensor.templates() {
        if !TemplateEngine::is_template(template) {
            continue;
        }
        match TemplateEngine::extract_entities(template) {
            Some(found) => ids.extend(found),
            None => untrackable.push(name),
        }
    }
    if untrackable.is_empty() {
        return Tracking::Entities(ids);
    }
    warn!(
        sensor = %sensor.identity().slug,
        templates = %untrackable.join(", "),
        "Historic template sensor has no entity ids configured to track nor were we able \
         to extract the entities to track from its templates. This entity will only be \
         able to be updated manually"
    );
    Tracking::StartOnly
}

struct SensorWorker {
    sensors: Vec<TrackedSensor>,
    engine: TemplateEngine,
    store: Arc<StateStore>,
    bus: Arc<EventBus>,
    rx: WorkReceiver<SensorTask>,
    start_listener: Option<ListenerId>,
    /// State changes are ignored until the first full update
    started: bool,
}

impl SensorWorker {
    async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            match task {
                SensorTask::UpdateAll => {
                    if let Some(id) = self.start_listener.take() {
                        self.bus.remove_listener(id);
                    }
                    self.started = true;
                    for index in 0..self.sensors.len() {
                        self.update(index);
                    }
                }
                SensorTask::Changed(entity_id) if self.started => {
                    for index in 0..self.sensors.len() {
                        let tracked = &self.sensors[index];
                        if tracked.tracking.tracks(&entity_id)
                            && tracked.sensor.identity().entity_id.to_string() != entity_id
                        {
                            self.update(index);
                        }
                    }
                }
                SensorTask::Changed(_) => {}
                SensorTask::Stop => {
                    self.rx.task_done();
                    break;
                }
            }
            self.rx.task_done();
        }

        while self.rx.try_recv().is_some() {
            self.rx.task_done();
        }
        debug!("Historic template sensor task finished");
    }

    fn update(&mut self, index: usize) {
        let sensor = &mut self.sensors[index].sensor;
        sensor.update(&self.engine);
        let entity_id = sensor.identity().entity_id.to_string();
        match self.store.write(&entity_id, sensor.to_write()) {
            Ok(event) => debug!(
                entity_id = %entity_id,
                event_type = %event.event_type,
                "Wrote historic template sensor"
            ),
            Err(err) => error!(entity_id = %entity_id, %err, "Could not write sensor state"),
        }
    }
}
