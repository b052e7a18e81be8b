//! SQLite schema and migrations
//!
//! The schema version lives in `PRAGMA user_version`. Each entry of
//! [`MIGRATIONS`] moves the database one version forward; a fresh database
//! runs all of them.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;

const MIGRATIONS: &[&str] = &[
    // 1: events, states and recorder runs
    "CREATE TABLE events (
        event_id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_uid TEXT NOT NULL UNIQUE,
        event_type TEXT NOT NULL,
        event_data TEXT NOT NULL,
        origin TEXT NOT NULL,
        time_fired INTEGER NOT NULL,
        created INTEGER NOT NULL,
        context_id TEXT,
        context_user_id TEXT,
        context_parent_id TEXT
    );
    CREATE INDEX ix_events_time_fired ON events (time_fired);
    CREATE INDEX ix_events_event_type ON events (event_type);
    CREATE TABLE states (
        state_id INTEGER PRIMARY KEY AUTOINCREMENT,
        domain TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        state TEXT NOT NULL,
        attributes TEXT NOT NULL,
        event_id INTEGER NOT NULL REFERENCES events (event_id) ON DELETE CASCADE,
        last_changed INTEGER NOT NULL,
        last_updated INTEGER NOT NULL,
        created INTEGER NOT NULL
    );
    CREATE INDEX ix_states_entity_id_last_updated ON states (entity_id, last_updated);
    CREATE INDEX ix_states_created ON states (created);
    CREATE TABLE recorder_runs (
        run_id INTEGER PRIMARY KEY AUTOINCREMENT,
        start INTEGER NOT NULL,
        end INTEGER,
        closed_incorrect INTEGER NOT NULL DEFAULT 0,
        created INTEGER NOT NULL
    );",
    // 2: historic flag on state rows
    "ALTER TABLE states ADD COLUMN historic INTEGER NOT NULL DEFAULT 0;",
];

/// Schema version a fully migrated database reports
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the database up to [`SCHEMA_VERSION`]
pub fn migrate(conn: &mut Connection) -> Result<u32, StoreError> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current >= SCHEMA_VERSION {
        return Ok(current);
    }

    let tx = conn.transaction()?;
    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index + 1;
        info!(version, "Upgrading recorder schema");
        tx.execute_batch(sql)?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(SCHEMA_VERSION)
}

/// Timestamps are stored as microseconds since the epoch
pub fn to_micros(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}
