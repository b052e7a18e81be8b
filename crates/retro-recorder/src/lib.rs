//! Durable event and state log for retro_state
//!
//! The [`Recorder`] listens to every event on the bus and persists it to
//! SQLite from a dedicated `recorder` thread. Historic state changes are
//! stored as state rows flagged `historic`, so history queries can merge them
//! with live changes by their own timestamps.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting -> Ready -> Draining -> Stopped
//!      \
//!       -> Failed (items are acknowledged and discarded until Stop)
//! ```

mod config;
mod error;
mod models;
mod policy;
mod purge;
mod schema;
mod store;
mod worker;

pub use config::{RecorderConfig, DEFAULT_DB_FILE};
pub use error::{RecorderError, RecorderResult, StoreError};
pub use models::{LogRecord, StateRecord};
pub use policy::{HistoricWritePolicy, LiveOnlyPolicy, WriteAction, WritePolicy};
pub use purge::{first_purge_at, purge_cutoff};
pub use schema::SCHEMA_VERSION;
pub use store::{Connector, LogStore, PurgeCounts, SqliteConnector, SqliteStore};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use retro_core::Event;
use retro_event_bus::{work_queue, EventBus, ListenerId, WorkQueue};
use tokio::sync::watch;
use tracing::{error, info};
use ulid::Ulid;

use crate::worker::Worker;

/// Items processed by the recorder thread
#[derive(Debug)]
pub enum RecorderTask {
    /// Persist an event; `uid` is minted when the event is enqueued
    Event { uid: String, event: Event },
    /// Delete records fired more than `keep_days` ago
    Purge { keep_days: u32 },
    /// Close the run and end the worker
    Stop,
}

/// Recorder lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderStatus {
    Connecting,
    Ready,
    Draining,
    Stopped,
    /// The database could not be opened
    Failed,
}

/// Counters updated by the recorder thread
#[derive(Debug, Default)]
pub struct RecorderStats {
    committed: AtomicU64,
    dropped: AtomicU64,
    filtered: AtomicU64,
    purged: AtomicU64,
}

/// Point-in-time copy of [`RecorderStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStatsSnapshot {
    /// Events written
    pub committed: u64,
    /// Events lost to permanent errors, exhausted retries or a failed connection
    pub dropped: u64,
    /// Events excluded by configuration
    pub filtered: u64,
    /// Event rows deleted by purges
    pub purged: u64,
}

impl RecorderStats {
    pub(crate) fn add_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_purged(&self, events: usize) {
        self.purged.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RecorderStatsSnapshot {
        RecorderStatsSnapshot {
            committed: self.committed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the running recorder
pub struct Recorder {
    bus: Arc<EventBus>,
    queue: WorkQueue<RecorderTask>,
    status: watch::Receiver<RecorderStatus>,
    stats: Arc<RecorderStats>,
    listener: Option<ListenerId>,
    thread: Option<JoinHandle<()>>,
}

impl Recorder {
    /// Start recording to the configured SQLite database
    pub fn start(config: RecorderConfig, bus: &Arc<EventBus>) -> RecorderResult<Self> {
        let connector = SqliteConnector::new(config.db_path.clone());
        let policy: Arc<dyn WritePolicy> = if config.historic_states {
            Arc::new(HistoricWritePolicy)
        } else {
            Arc::new(LiveOnlyPolicy)
        };
        Self::start_with(config, bus, connector, policy)
    }

    /// Start with an explicit storage connector and write policy
    pub fn start_with(
        config: RecorderConfig,
        bus: &Arc<EventBus>,
        connector: impl Connector + 'static,
        policy: Arc<dyn WritePolicy>,
    ) -> RecorderResult<Self> {
        let (queue, rx) = work_queue();
        let (status_tx, status) = watch::channel(RecorderStatus::Connecting);
        let stats = Arc::new(RecorderStats::default());

        let mut worker = Worker {
            config,
            connector: Box::new(connector),
            policy,
            queue: queue.clone(),
            rx,
            status: status_tx,
            stats: stats.clone(),
        };

        let thread = std::thread::Builder::new()
            .name("recorder".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(worker.run()),
                    Err(err) => {
                        error!(%err, "Could not build recorder runtime");
                        worker.status.send_replace(RecorderStatus::Failed);
                        worker.discard_pending();
                    }
                }
            })
            .map_err(RecorderError::Spawn)?;

        let listener_queue = queue.clone();
        let listener = bus.listen_all(move |event| {
            listener_queue.push(RecorderTask::Event {
                uid: Ulid::new().to_string(),
                event: event.clone(),
            });
        });
        info!("Recorder started");

        Ok(Self {
            bus: bus.clone(),
            queue,
            status,
            stats,
            listener: Some(listener),
            thread: Some(thread),
        })
    }

    pub fn status(&self) -> RecorderStatus {
        *self.status.borrow()
    }

    /// Wait until the connection attempt has finished
    ///
    /// Returns the status it settled on: `Ready`, `Failed`, or a later state.
    pub async fn wait_ready(&self) -> RecorderStatus {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(|s| *s != RecorderStatus::Connecting)
            .await
            .map(|s| *s);
        match settled {
            Ok(settled) => settled,
            // Sender dropped: the thread has exited
            Err(_) => *status.borrow(),
        }
    }

    pub fn stats(&self) -> RecorderStatsSnapshot {
        self.stats.snapshot()
    }

    /// Queue a purge of everything older than `keep_days`
    pub fn purge_now(&self, keep_days: u32) -> bool {
        self.queue.push(RecorderTask::Purge { keep_days })
    }

    /// Wait until every queued item has been processed
    pub async fn block_till_done(&self) {
        self.queue.join().await;
    }

    /// Stop listening, drain the queue and join the recorder thread
    pub async fn shutdown(mut self) -> RecorderResult<()> {
        self.stop_listening();
        self.queue.push(RecorderTask::Stop);
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || thread.join())
            .await?
            .map_err(|_| RecorderError::WorkerPanicked)?;
        info!("Recorder shut down");
        Ok(())
    }

    fn stop_listening(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.bus.remove_listener(listener);
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop_listening();
        if self.thread.is_some() {
            self.queue.push(RecorderTask::Stop);
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("status", &self.status())
            .field("outstanding", &self.queue.outstanding())
            .finish()
    }
}
