//! History storage backends
//!
//! ## Schema
//! ```sql
//! CREATE TABLE robot_state_history (
//!     id                 INTEGER PRIMARY KEY AUTOINCREMENT,
//!     robot_name         TEXT    NOT NULL,
//!     source             TEXT    NOT NULL,   -- "real" | "sim"
//!     timestamp          TEXT    NOT NULL,   -- RFC 3339, UTC
//!     pos_x              REAL,
//!     pos_y              REAL,
//!     linear_velocity    REAL,
//!     angular_velocity   REAL,
//!     battery_percentage REAL,
//!     scan_json          TEXT
//! );
//! ```
//!
//! Each row fills only the columns of its event type.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::SecondsFormat;
use rusqlite::{params, Connection};

use super::record::{HistoryFields, HistoryRecord};
use crate::error::StorageError;

/// Durable sink for history records
///
/// `append` blocks; callers run it on the blocking thread pool.
pub trait HistoryStore: Send + Sync {
    /// Write one record in its own transaction
    fn append(&self, record: &HistoryRecord) -> Result<(), StorageError>;
}

/// A row read back from the history table
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: i64,
    pub robot_name: String,
    pub source: String,
    pub timestamp: String,
    pub pos_x: Option<f64>,
    pub pos_y: Option<f64>,
    pub linear_velocity: Option<f64>,
    pub angular_velocity: Option<f64>,
    pub battery_percentage: Option<f64>,
    pub scan: Option<Vec<f64>>,
}

/// SQLite-backed history store
///
/// Thread-safe via an internal `Arc<Mutex<Connection>>`; WAL mode is
/// enabled so readers do not block the writer.
#[derive(Clone)]
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Open (or create) a history database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS robot_state_history (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                robot_name         TEXT    NOT NULL,
                source             TEXT    NOT NULL,
                timestamp          TEXT    NOT NULL,
                pos_x              REAL,
                pos_y              REAL,
                linear_velocity    REAL,
                angular_velocity   REAL,
                battery_percentage REAL,
                scan_json          TEXT
            );
            CREATE INDEX IF NOT EXISTS robot_state_history_robot
                ON robot_state_history (robot_name, timestamp);",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store (useful for tests)
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::open(":memory:")
    }

    /// Lock the connection
    ///
    /// A panic during an earlier append leaves the mutex poisoned, but its
    /// transaction was rolled back when it unwound, so the connection is
    /// still usable.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Most recent rows of a producer, newest first
    pub fn recent(&self, robot_name: &str, limit: usize) -> Result<Vec<StoredRow>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, robot_name, source, timestamp, pos_x, pos_y, linear_velocity,
                    angular_velocity, battery_percentage, scan_json
             FROM robot_state_history
             WHERE robot_name = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![robot_name, limit as i64], |row| {
            Ok((
                StoredRow {
                    id: row.get(0)?,
                    robot_name: row.get(1)?,
                    source: row.get(2)?,
                    timestamp: row.get(3)?,
                    pos_x: row.get(4)?,
                    pos_y: row.get(5)?,
                    linear_velocity: row.get(6)?,
                    angular_velocity: row.get(7)?,
                    battery_percentage: row.get(8)?,
                    scan: None,
                },
                row.get::<_, Option<String>>(9)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (mut stored, scan_json) = row?;
            if let Some(json) = scan_json {
                stored.scan = Some(serde_json::from_str(&json)?);
            }
            out.push(stored);
        }
        Ok(out)
    }

    /// Total number of rows
    pub fn count(&self) -> Result<u64, StorageError> {
        let conn = self.conn();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM robot_state_history", [], |row| {
            row.get(0)
        })?;
        Ok(n as u64)
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&self, record: &HistoryRecord) -> Result<(), StorageError> {
        let (pos_x, pos_y, linear, angular, battery, scan_json) = match &record.fields {
            HistoryFields::Odom {
                pos_x,
                pos_y,
                linear_velocity,
                angular_velocity,
            } => (
                Some(*pos_x),
                Some(*pos_y),
                Some(*linear_velocity),
                Some(*angular_velocity),
                None,
                None,
            ),
            HistoryFields::Battery { percentage } => {
                (None, None, None, None, Some(*percentage), None)
            }
            HistoryFields::Scan { ranges } => {
                (None, None, None, None, None, Some(serde_json::to_string(ranges)?))
            }
        };

        let mut conn = self.conn();
        // Rolled back on drop unless committed
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO robot_state_history
                (robot_name, source, timestamp, pos_x, pos_y, linear_velocity,
                 angular_velocity, battery_percentage, scan_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.producer_id,
                record.source.as_str(),
                record.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                pos_x,
                pos_y,
                linear,
                angular,
                battery,
                scan_json,
            ],
        )?;
        tx.commit()?;

        Ok(())
    }
}
