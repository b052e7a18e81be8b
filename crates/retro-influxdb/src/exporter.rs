//! The exporter task: connect, listen, batch and write

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use retro_core::events::{HISTORIC_STATE_CHANGED, STATE_CHANGED};
use retro_core::Event;
use retro_event_bus::{work_queue, EventBus, ListenerId, WorkQueue, WorkReceiver};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::InfluxConfig;
use crate::mapping::PointMapper;
use crate::point::MeasurementPoint;
use crate::sink::{HttpSink, TimeSeriesSink};
use crate::{ExportError, ExportResult};

/// Points per write
const BATCH_BUFFER_SIZE: usize = 100;
/// How long a batch waits for more items once it has one
const BATCH_TIMEOUT: Duration = Duration::from_secs(1);
/// Queued events older than this (plus the retry budget) are skipped
const QUEUE_BACKLOG: Duration = Duration::from_secs(30);

/// Items processed by the exporter task
#[derive(Debug)]
pub enum ExportTask {
    Event { queued_at: Instant, event: Event },
    Stop,
}

/// Counters updated by the exporter task
#[derive(Debug, Default)]
pub struct ExporterStats {
    written: AtomicU64,
    dropped: AtomicU64,
}

impl ExporterStats {
    /// Points written to the sink
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Points lost to write failures or backlog
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle to the running exporter
pub struct Exporter {
    queue: WorkQueue<ExportTask>,
    stats: Arc<ExporterStats>,
    task: Option<JoinHandle<()>>,
}

impl Exporter {
    /// Start exporting to the InfluxDB HTTP API described by `config`
    pub fn start(config: InfluxConfig, bus: &Arc<EventBus>) -> ExportResult<Self> {
        let sink = HttpSink::new(&config)?;
        Self::start_with(config, bus, Arc::new(sink))
    }

    /// Start exporting to any sink; must be called inside a tokio runtime
    pub fn start_with(
        config: InfluxConfig,
        bus: &Arc<EventBus>,
        sink: Arc<dyn TimeSeriesSink>,
    ) -> ExportResult<Self> {
        let mapper = PointMapper::new(config).map_err(ExportError::Glob)?;
        let (queue, rx) = work_queue();
        let stats = Arc::new(ExporterStats::default());

        let worker = ExportWorker {
            mapper,
            sink,
            bus: bus.clone(),
            queue: queue.clone(),
            rx,
            stats: stats.clone(),
            listeners: Vec::new(),
            lost: 0,
        };
        let task = tokio::spawn(worker.run());

        Ok(Self {
            queue,
            stats,
            task: Some(task),
        })
    }

    pub fn stats(&self) -> &ExporterStats {
        &self.stats
    }

    /// Wait until every queued event has been written or dropped
    pub async fn block_till_done(&self) {
        self.queue.join().await;
    }

    /// Finish the batch in hand and end the exporter task
    pub async fn shutdown(mut self) -> ExportResult<()> {
        self.queue.push(ExportTask::Stop);
        if let Some(task) = self.task.take() {
            task.await?;
        }
        info!("Exporter shut down");
        Ok(())
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.queue.push(ExportTask::Stop);
        }
    }
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("outstanding", &self.queue.outstanding())
            .field("written", &self.stats.written())
            .finish()
    }
}

struct ExportWorker {
    mapper: PointMapper,
    sink: Arc<dyn TimeSeriesSink>,
    bus: Arc<EventBus>,
    queue: WorkQueue<ExportTask>,
    rx: WorkReceiver<ExportTask>,
    stats: Arc<ExporterStats>,
    listeners: Vec<ListenerId>,
    /// Points lost since the last successful write
    lost: usize,
}

/// One drained batch
struct Batch {
    /// Items popped, all acknowledged after the write
    items: usize,
    points: Vec<MeasurementPoint>,
    stop: bool,
}

impl ExportWorker {
    async fn run(mut self) {
        if !self.connect().await {
            self.discard_pending();
            return;
        }
        self.listen();

        loop {
            let batch = self.next_batch().await;
            if !batch.points.is_empty() {
                self.write(&batch.points).await;
            }
            for _ in 0..batch.items {
                self.rx.task_done();
            }
            if batch.stop {
                break;
            }
        }

        self.stop_listening();
        self.discard_pending();
        debug!("Exporter task finished");
    }

    /// Ping until the sink answers; false when Stop arrived first
    async fn connect(&mut self) -> bool {
        let interval = self.mapper.config().connect_retry_interval;
        loop {
            match self.sink.ping().await {
                Ok(()) => {
                    info!(url = %self.mapper.config().base_url(), "Connected to time-series database");
                    return true;
                }
                Err(err) => warn!(
                    %err,
                    retry_in = ?interval,
                    "Time-series database is not accessible, please check the host, port \
                     and database settings"
                ),
            }
            tokio::select! {
                _ = sleep(interval) => {}
                task = self.rx.recv() => {
                    // Only Stop can be queued before the listener exists
                    if task.is_some() {
                        self.rx.task_done();
                    }
                    debug!("Exporter stopped before connecting");
                    return false;
                }
            }
        }
    }

    fn listen(&mut self) {
        for event_type in [STATE_CHANGED, HISTORIC_STATE_CHANGED] {
            let queue = self.queue.clone();
            let id = self.bus.listen(event_type, move |event| {
                queue.push(ExportTask::Event {
                    queued_at: Instant::now(),
                    event: event.clone(),
                });
            });
            self.listeners.push(id);
        }
    }

    fn stop_listening(&mut self) {
        for id in self.listeners.drain(..) {
            self.bus.remove_listener(id);
        }
    }

    fn backlog_limit(&self) -> Duration {
        let config = self.mapper.config();
        QUEUE_BACKLOG + config.retry_delay * config.max_retries
    }

    async fn next_batch(&mut self) -> Batch {
        let mut batch = Batch {
            items: 0,
            points: Vec::new(),
            stop: false,
        };
        let backlog_limit = self.backlog_limit();
        let mut too_old = 0usize;

        while batch.points.len() < BATCH_BUFFER_SIZE {
            let task = if batch.items == 0 {
                self.rx.recv().await
            } else {
                match timeout(BATCH_TIMEOUT, self.rx.recv()).await {
                    Ok(task) => task,
                    Err(_) => break,
                }
            };
            let Some(task) = task else {
                batch.stop = true;
                break;
            };
            batch.items += 1;
            match task {
                ExportTask::Stop => {
                    batch.stop = true;
                    break;
                }
                ExportTask::Event { queued_at, event } => {
                    if queued_at.elapsed() >= backlog_limit {
                        too_old += 1;
                    } else if let Some(point) = self.mapper.event_to_point(&event) {
                        batch.points.push(point);
                    }
                }
            }
        }

        if too_old > 0 {
            self.stats.dropped.fetch_add(too_old as u64, Ordering::Relaxed);
            warn!(dropped = too_old, "Catching up, dropped old events");
        }
        batch
    }

    async fn write(&mut self, points: &[MeasurementPoint]) {
        let config = self.mapper.config();
        let max_retries = config.max_retries.max(1);
        let retry_delay = config.retry_delay;

        for attempt in 1..=max_retries {
            match self.sink.write_points(points).await {
                Ok(()) => {
                    if self.lost > 0 {
                        error!(lost = self.lost, "Resumed writing, points were lost");
                        self.lost = 0;
                    }
                    self.stats
                        .written
                        .fetch_add(points.len() as u64, Ordering::Relaxed);
                    return;
                }
                Err(err) if err.is_permanent() => {
                    error!(%err, points = points.len(), "Write rejected, dropping batch");
                    break;
                }
                Err(err) if attempt < max_retries => {
                    debug!(%err, attempt, retry_in = ?retry_delay, "Write failed, retrying");
                    sleep(retry_delay).await;
                }
                Err(err) => {
                    if self.lost == 0 {
                        error!(%err, attempts = attempt, "Write error, giving up on batch");
                    }
                }
            }
        }
        self.lost += points.len();
        self.stats
            .dropped
            .fetch_add(points.len() as u64, Ordering::Relaxed);
    }

    fn discard_pending(&mut self) {
        while self.rx.try_recv().is_some() {
            self.rx.task_done();
        }
    }
}
