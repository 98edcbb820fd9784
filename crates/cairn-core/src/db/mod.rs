//! SQLite activity store.
//!
//! Runtime defaults:
//! - `journal_mode = WAL` so the feed can read while mutations append
//! - `busy_timeout = 5s` so overlapping notify passes wait instead of failing
//! - `foreign_keys = ON`

pub mod entities;
pub mod migrations;
pub mod schema;
pub mod store;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

pub use entities::SqliteEntityResolver;
pub use store::{ActivityFilter, ActivityPatch, ActivityStore, SqliteActivityStore};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the activity store, apply runtime pragmas, and migrate
/// schema to the latest version.
///
/// # Errors
///
/// Returns an error if opening/configuring/migrating the database fails.
pub fn open_store(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create store directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("open activity store {}", path.display()))?;

    configure_connection(&conn).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply store migrations")?;

    Ok(conn)
}

/// Open another connection to a store that is already migrated.
pub(crate) fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open activity store {}", path.display()))?;
    configure_connection(&conn).context("configure sqlite pragmas")?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Timestamps are stored as microseconds since the Unix epoch.
#[must_use]
pub fn to_us(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// Inverse of [`to_us`]. Out-of-range values clamp to the epoch.
#[must_use]
pub fn from_us(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}
