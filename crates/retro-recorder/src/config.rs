//! Recorder configuration

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use retro_core::{duration_secs, EntityFilter};
use serde::{Deserialize, Serialize};

/// Default SQLite database file name
pub const DEFAULT_DB_FILE: &str = "home-assistant_v2.db";

/// Configuration for the `recorder:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Path of the SQLite database; `:memory:` for an in-memory database
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Days of history to keep; `None` disables purging
    #[serde(default = "default_keep_days")]
    pub purge_keep_days: Option<u32>,

    /// Days between automatic purges; 0 disables automatic purging
    #[serde(default = "default_purge_interval")]
    pub purge_interval: u32,

    /// Commit attempts per event before giving up
    #[serde(default = "default_max_retries")]
    pub db_max_retries: u32,

    /// Wait between commit attempts
    #[serde(default = "default_retry_wait", with = "duration_secs")]
    pub db_retry_wait: Duration,

    /// Connection attempts at startup before giving up
    #[serde(default = "default_max_retries")]
    pub connect_max_tries: u32,

    /// Wait between connection attempts
    #[serde(default = "default_retry_wait", with = "duration_secs")]
    pub connect_retry_wait: Duration,

    /// Entities to record
    #[serde(flatten)]
    pub filter: EntityFilter,

    /// Event types never recorded
    #[serde(default)]
    pub exclude_event_types: HashSet<String>,

    /// Record historic states as state rows (flagged historic)
    #[serde(default = "default_true")]
    pub historic_states: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_FILE)
}

fn default_keep_days() -> Option<u32> {
    Some(10)
}

fn default_purge_interval() -> u32 {
    1
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_wait() -> Duration {
    Duration::from_secs(3)
}

fn default_true() -> bool {
    true
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            purge_keep_days: default_keep_days(),
            purge_interval: default_purge_interval(),
            db_max_retries: default_max_retries(),
            db_retry_wait: default_retry_wait(),
            connect_max_tries: default_max_retries(),
            connect_retry_wait: default_retry_wait(),
            filter: EntityFilter::default(),
            exclude_event_types: HashSet::new(),
            historic_states: true,
        }
    }
}

impl RecorderConfig {
    /// Keep-days when automatic purging is enabled
    pub fn auto_purge_keep_days(&self) -> Option<u32> {
        self.purge_keep_days.filter(|_| self.purge_interval > 0)
    }
}
