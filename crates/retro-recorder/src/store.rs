//! Storage backend of the recorder

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::LogRecord;
use crate::schema::{self, from_micros, to_micros};

/// Rows removed by one purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    pub events: usize,
    pub states: usize,
}

/// A connected log store, owned by the recorder thread
pub trait LogStore: Send {
    /// Persist an event (and its state row) in one transaction
    ///
    /// Returns the event id. Committing a record whose `event_uid` is already
    /// stored writes nothing and returns the existing id.
    fn commit(&mut self, record: &LogRecord) -> Result<i64, StoreError>;

    /// Fire time of the oldest stored event
    fn oldest_time_fired(&mut self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Delete events and states fired strictly before `cutoff`
    fn purge_before(&mut self, cutoff: DateTime<Utc>) -> Result<PurgeCounts, StoreError>;

    /// Close the recorder run
    fn close(&mut self) -> Result<(), StoreError>;
}

/// Opens log stores; called again on every connection attempt
pub trait Connector: Send {
    fn connect(&mut self) -> Result<Box<dyn LogStore>, StoreError>;
}

impl<F> Connector for F
where
    F: FnMut() -> Result<Box<dyn LogStore>, StoreError> + Send,
{
    fn connect(&mut self) -> Result<Box<dyn LogStore>, StoreError> {
        self()
    }
}

/// Connector for a SQLite file (or `:memory:`)
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Connector for SqliteConnector {
    fn connect(&mut self) -> Result<Box<dyn LogStore>, StoreError> {
        Ok(Box::new(SqliteStore::open(&self.path)?))
    }
}

/// SQLite-backed log store
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    run_id: i64,
}

impl SqliteStore {
    /// Open the database, migrate it and start a recorder run
    ///
    /// Runs left open by a previous session are marked `closed_incorrect`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut conn = Connection::open(path)?;
        if path != Path::new(":memory:") {
            let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            debug!(journal_mode = %mode, "Configured SQLite journal");
        }
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::migrate(&mut conn)?;

        let now = to_micros(Utc::now());
        let unclosed = conn.execute(
            "UPDATE recorder_runs SET end = ?1, closed_incorrect = 1 WHERE end IS NULL",
            params![now],
        )?;
        if unclosed > 0 {
            warn!(runs = unclosed, "Found unfinished recorder runs, marked as closed incorrectly");
        }
        conn.execute(
            "INSERT INTO recorder_runs (start, created) VALUES (?1, ?1)",
            params![now],
        )?;
        let run_id = conn.last_insert_rowid();
        info!(path = %path.display(), run_id, "Connected to recorder database");

        Ok(Self { conn, run_id })
    }

    /// The underlying connection, for queries outside the write path
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }
}

impl LogStore for SqliteStore {
    fn commit(&mut self, record: &LogRecord) -> Result<i64, StoreError> {
        let tx = self.conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO events (event_uid, event_type, event_data, origin, \
             time_fired, created, context_id, context_user_id, context_parent_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.event_uid,
                record.event_type,
                record.event_data,
                record.origin.as_str(),
                to_micros(record.time_fired),
                to_micros(Utc::now()),
                record.context.id,
                record.context.user_id,
                record.context.parent_id,
            ],
        )?;
        let event_id: i64 = tx.query_row(
            "SELECT event_id FROM events WHERE event_uid = ?1",
            params![record.event_uid],
            |row| row.get(0),
        )?;

        if inserted == 0 {
            debug!(event_uid = %record.event_uid, event_id, "Event already recorded");
        } else if let Some(state) = &record.state {
            tx.execute(
                "INSERT INTO states (domain, entity_id, state, attributes, event_id, \
                 last_changed, last_updated, created, historic) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    state.domain,
                    state.entity_id,
                    state.state,
                    state.attributes,
                    event_id,
                    to_micros(state.last_changed),
                    to_micros(state.last_updated),
                    to_micros(record.time_fired),
                    state.historic,
                ],
            )?;
        }
        tx.commit()?;
        Ok(event_id)
    }

    fn oldest_time_fired(&mut self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let oldest: Option<i64> = self
            .conn
            .query_row("SELECT MIN(time_fired) FROM events", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(oldest.and_then(from_micros))
    }

    fn purge_before(&mut self, cutoff: DateTime<Utc>) -> Result<PurgeCounts, StoreError> {
        let cutoff = to_micros(cutoff);
        let tx = self.conn.transaction()?;
        let states = tx.execute("DELETE FROM states WHERE created < ?1", params![cutoff])?;
        let events = tx.execute("DELETE FROM events WHERE time_fired < ?1", params![cutoff])?;
        tx.execute(
            "DELETE FROM recorder_runs WHERE end IS NOT NULL AND end < ?1 AND run_id != ?2",
            params![cutoff, self.run_id],
        )?;
        tx.commit()?;
        Ok(PurgeCounts { events, states })
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE recorder_runs SET end = ?1 WHERE run_id = ?2",
            params![to_micros(Utc::now()), self.run_id],
        )?;
        info!(run_id = self.run_id, "Closed recorder run");
        Ok(())
    }
}
