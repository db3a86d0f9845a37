//! SQLite counter store
//!
//! Every increment runs in a `BEGIN IMMEDIATE` transaction, which takes the
//! database write lock before the read. Two writers on the same file (same
//! process or not) therefore never both observe the pre-increment count.
//! The transaction rolls back when dropped uncommitted, so every early return
//! leaves the row untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::quota::{CounterKey, CounterStore, Window};
use crate::types::{GateError, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rate_limits (
    identifier    TEXT    NOT NULL,
    type          TEXT    NOT NULL,
    window_start  INTEGER NOT NULL,
    request_count INTEGER NOT NULL,
    UNIQUE (identifier, type, window_start)
);
CREATE INDEX IF NOT EXISTS rate_limits_window_start ON rate_limits (window_start);

CREATE TABLE IF NOT EXISTS monthly_link_limits (
    identifier   TEXT    NOT NULL,
    type         TEXT    NOT NULL,
    window_start INTEGER NOT NULL,
    link_count   INTEGER NOT NULL,
    UNIQUE (identifier, type, window_start)
);
CREATE INDEX IF NOT EXISTS monthly_link_limits_window_start ON monthly_link_limits (window_start);
";

/// Table and count column for a window
fn table_for(window: Window) -> (&'static str, &'static str) {
    match window {
        Window::Hourly => ("rate_limits", "request_count"),
        Window::Monthly => ("monthly_link_limits", "link_count"),
    }
}

/// Counter store on a SQLite database file
#[derive(Clone)]
pub struct SqliteCounterStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCounterStore {
    /// Open or create the counter database
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening SQLite counter database at {:?}", path);

        let conn = Connection::open(path)
            .map_err(|e| GateError::Storage(format!("Failed to open SQLite: {}", e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL lets readers proceed while a writer holds the lock
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| GateError::Storage(format!("Failed to set PRAGMA: {}", e)))?;

        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite counter database");

        let conn = Connection::open_in_memory()
            .map_err(|e| GateError::Storage(format!("Failed to open in-memory SQLite: {}", e)))?;

        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| GateError::Storage(format!("Failed to create schema: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| GateError::Storage(format!("Lock poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await?
    }
}

fn increment_in_tx(conn: &mut Connection, key: &CounterKey) -> Result<u64> {
    let (table, column) = table_for(key.window);
    let window_start = key.window_start.timestamp();
    let subject_type = key.subject_type.as_str();

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current: Option<i64> = tx
        .query_row(
            &format!(
                "SELECT {column} FROM {table} WHERE identifier = ?1 AND type = ?2 AND window_start = ?3"
            ),
            params![key.identifier, subject_type, window_start],
            |row| row.get(0),
        )
        .optional()?;

    let count = match current {
        None => {
            tx.execute(
                &format!(
                    "INSERT INTO {table} (identifier, type, window_start, {column}) VALUES (?1, ?2, ?3, 1)"
                ),
                params![key.identifier, subject_type, window_start],
            )?;
            1
        }
        Some(n) => {
            let next = n + 1;
            tx.execute(
                &format!(
                    "UPDATE {table} SET {column} = ?4 WHERE identifier = ?1 AND type = ?2 AND window_start = ?3"
                ),
                params![key.identifier, subject_type, window_start, next],
            )?;
            next
        }
    };

    tx.commit()?;

    u64::try_from(count).map_err(|_| GateError::Storage(format!("Negative counter: {count}")))
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn increment(&self, key: &CounterKey) -> Result<u64> {
        let key = key.clone();
        self.with_conn(move |conn| increment_in_tx(conn, &key)).await
    }

    async fn peek(&self, key: &CounterKey) -> Result<u64> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let (table, column) = table_for(key.window);
            let count: Option<i64> = conn
                .query_row(
                    &format!(
                        "SELECT {column} FROM {table} WHERE identifier = ?1 AND type = ?2 AND window_start = ?3"
                    ),
                    params![
                        key.identifier,
                        key.subject_type.as_str(),
                        key.window_start.timestamp()
                    ],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(count.map(|c| c.max(0) as u64).unwrap_or(0))
        })
        .await
    }

    async fn delete_before(&self, window: Window, cutoff: DateTime<Utc>) -> Result<u64> {
        self.with_conn(move |conn| {
            let (table, _) = table_for(window);
            let removed = conn.execute(
                &format!("DELETE FROM {table} WHERE window_start < ?1"),
                params![cutoff.timestamp()],
            )?;
            debug!(%window, removed, "expired counters removed");
            Ok(removed as u64)
        })
        .await
    }
}
