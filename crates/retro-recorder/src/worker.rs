//! The recorder loop, run on the dedicated recorder thread

use std::sync::Arc;

use chrono::Utc;
use retro_core::{EntityId, Event};
use retro_event_bus::{WorkQueue, WorkReceiver};
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::RecorderConfig;
use crate::models::LogRecord;
use crate::policy::{WriteAction, WritePolicy};
use crate::purge::{first_purge_at, purge_old_data};
use crate::store::{Connector, LogStore};
use crate::{RecorderStats, RecorderStatus, RecorderTask};

const SECONDS_PER_DAY: u64 = 86_400;

pub(crate) struct Worker {
    pub(crate) config: RecorderConfig,
    pub(crate) connector: Box<dyn Connector>,
    pub(crate) policy: Arc<dyn WritePolicy>,
    /// Used to enqueue scheduled purges behind pending events
    pub(crate) queue: WorkQueue<RecorderTask>,
    pub(crate) rx: WorkReceiver<RecorderTask>,
    pub(crate) status: watch::Sender<RecorderStatus>,
    pub(crate) stats: Arc<RecorderStats>,
}

impl Worker {
    pub(crate) async fn run(mut self) {
        let Some(mut store) = self.connect().await else {
            error!(
                tries = self.config.connect_max_tries,
                "Could not connect to the recorder database, recorder disabled"
            );
            self.status.send_replace(RecorderStatus::Failed);
            self.discard_until_stop().await;
            return;
        };
        self.status.send_replace(RecorderStatus::Ready);
        info!("Recorder ready");

        let mut next_purge = self.first_purge(store.as_mut());

        loop {
            let task = tokio::select! {
                task = self.rx.recv() => task,
                _ = sleep_until(next_purge.unwrap_or_else(Instant::now)), if next_purge.is_some() => {
                    next_purge = None;
                    if let Some(keep_days) = self.config.auto_purge_keep_days() {
                        self.queue.push(RecorderTask::Purge { keep_days });
                    }
                    continue;
                }
            };

            let Some(task) = task else {
                break;
            };
            match task {
                RecorderTask::Event { uid, event } => {
                    self.record(store.as_mut(), &uid, &event).await;
                    self.rx.task_done();
                }
                RecorderTask::Purge { keep_days } => {
                    match purge_old_data(store.as_mut(), keep_days) {
                        Ok(counts) => self.stats.add_purged(counts.events),
                        Err(err) => error!(%err, "Error purging recorder data"),
                    }
                    if self.config.auto_purge_keep_days().is_some() {
                        next_purge = Instant::now().checked_add(purge_interval(&self.config));
                    }
                    self.rx.task_done();
                }
                RecorderTask::Stop => {
                    self.status.send_replace(RecorderStatus::Draining);
                    if let Err(err) = store.close() {
                        error!(%err, "Error closing recorder run");
                    }
                    self.rx.task_done();
                    break;
                }
            }
        }

        self.discard_pending();
        drop(store);
        self.status.send_replace(RecorderStatus::Stopped);
        info!("Recorder stopped");
    }

    async fn connect(&mut self) -> Option<Box<dyn LogStore>> {
        let max_tries = self.config.connect_max_tries.max(1);
        for attempt in 1..=max_tries {
            match self.connector.connect() {
                Ok(store) => return Some(store),
                Err(err) => {
                    error!(
                        %err,
                        attempt,
                        max_tries,
                        retry_in = ?self.config.connect_retry_wait,
                        "Error during connection setup"
                    );
                    if attempt < max_tries {
                        sleep(self.config.connect_retry_wait).await;
                    }
                }
            }
        }
        None
    }

    fn first_purge(&self, store: &mut dyn LogStore) -> Option<Instant> {
        let keep_days = self.config.auto_purge_keep_days()?;
        let oldest = match store.oldest_time_fired() {
            Ok(oldest) => oldest,
            Err(err) => {
                warn!(%err, "Could not read oldest event, scheduling purge from now");
                None
            }
        };
        let now = Utc::now();
        let at = first_purge_at(now, oldest, keep_days, self.config.purge_interval);
        let deadline = Instant::now().checked_add((at - now).to_std().unwrap_or_default());
        match deadline {
            Some(_) => debug!(purge_at = %at, "Scheduled first purge"),
            None => warn!(purge_at = %at, "First purge is too far away, not scheduled"),
        }
        deadline
    }

    fn should_record(&self, event: &Event) -> bool {
        if self
            .config
            .exclude_event_types
            .contains(event.event_type.as_str())
        {
            return false;
        }
        if !event.kind().carries_state() {
            return true;
        }
        // Malformed ids fall through so the commit path reports them
        match event
            .data
            .get("entity_id")
            .and_then(|id| id.as_str())
            .and_then(|id| id.parse::<EntityId>().ok())
        {
            Some(entity_id) => self.config.filter.accepts(&entity_id),
            None => true,
        }
    }

    async fn record(&self, store: &mut dyn LogStore, uid: &str, event: &Event) {
        if !self.should_record(event) {
            trace!(event_type = %event.event_type, "Event filtered out");
            self.stats.add_filtered();
            return;
        }
        let action = self.policy.action_for(event);
        if action == WriteAction::Skip {
            self.stats.add_filtered();
            return;
        }

        let record = match LogRecord::from_event(uid, event, action) {
            Ok(record) => record,
            Err(err) => {
                error!(%err, event_type = %event.event_type, "Event is not recordable, dropping");
                self.stats.add_dropped();
                return;
            }
        };

        let max_retries = self.config.db_max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match store.commit(&record) {
                Ok(event_id) => {
                    trace!(event_id, event_uid = %uid, "Recorded event");
                    self.stats.add_committed();
                    return;
                }
                Err(err) if err.is_transient() && attempt < max_retries => {
                    warn!(
                        %err,
                        attempt,
                        retry_in = ?self.config.db_retry_wait,
                        "Error saving event, retrying"
                    );
                    sleep(self.config.db_retry_wait).await;
                }
                Err(err) if err.is_transient() => {
                    error!(%err, attempts = attempt, event_uid = %uid, "Error saving event, giving up");
                    self.stats.add_dropped();
                    return;
                }
                Err(err) => {
                    error!(%err, event_uid = %uid, "Invalid data for event, dropping");
                    self.stats.add_dropped();
                    return;
                }
            }
        }
    }

    /// Acknowledge and drop every item until Stop arrives
    async fn discard_until_stop(&mut self) {
        while let Some(task) = self.rx.recv().await {
            let stop = matches!(task, RecorderTask::Stop);
            if !stop {
                self.stats.add_dropped();
            }
            self.rx.task_done();
            if stop {
                break;
            }
        }
        self.discard_pending();
    }

    /// Acknowledge anything left behind Stop
    pub(crate) fn discard_pending(&mut self) {
        let mut discarded = 0usize;
        while self.rx.try_recv().is_some() {
            self.rx.task_done();
            discarded += 1;
        }
        if discarded > 0 {
            debug!(discarded, "Discarded items queued after stop");
        }
    }
}

fn purge_interval(config: &RecorderConfig) -> std::time::Duration {
    std::time::Duration::from_secs(u64::from(config.purge_interval) * SECONDS_PER_DAY)
}
