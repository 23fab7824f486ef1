use rusqlite::ffi::ErrorCode;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{Result, StoreError};
use crate::models::PersistedTimerState;

/// Subjects and sessions share one blob so a session and its total update land together.
pub const DATA_KEY: &str = "studyflow-data";
pub const EVENTS_KEY: &str = "studyflow-events";
pub const TIMER_STATE_KEY: &str = "studyflow-timer-state";
pub const ONBOARDING_KEY: &str = "studyflow-onboarding-completed";

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Does not change error propagation; the caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!(
                    "[DB] {}: Disk full. Free space on drive or check the data directory.",
                    context
                );
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[DB] {}: Permission denied or read-only. Check the data directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[DB] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

/// Durable store: every collection family lives as one JSON blob in `kv_store`.
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Lock the connection, mapping a poisoned mutex to a store error
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            StoreError::LockPoisoned(format!(
                "Database mutex poisoned: {}. A panic occurred while holding the lock.",
                e
            ))
        })
    }

    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Detect corruption before touching the schema
        let integrity: String = conn
            .query_row("PRAGMA integrity_check", [], |r| r.get(0))
            .map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase) => {
                    StoreError::Corrupted(e.to_string())
                }
                _ => StoreError::Storage(e),
            })?;
        if integrity.to_lowercase() != "ok" {
            return Err(StoreError::Corrupted(integrity));
        }

        Self::from_connection(conn)
    }

    /// In-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // WAL is unavailable for in-memory databases; not critical either way
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!(
                "[DB] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                e
            );
        }
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 2;

    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
                [],
            )?;
        }
        // Migration 2: updated_at (idempotent ALTER)
        if current < 2 {
            if let Err(e) = conn.execute(
                "ALTER TABLE kv_store ADD COLUMN updated_at INTEGER NOT NULL DEFAULT 0",
                [],
            ) {
                if !e.to_string().contains("duplicate column name") {
                    return Err(e.into());
                }
                debug!("[DB] kv_store.updated_at already present");
            }
        }

        if current < Self::SCHEMA_VERSION {
            info!(
                "[DB] Schema migrated from v{} to v{}",
                current,
                Self::SCHEMA_VERSION
            );
        }
        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }

    /// Run `f` inside `BEGIN IMMEDIATE`; commit on success, roll back otherwise.
    /// The read-modify-write of every mutation goes through here.
    pub(crate) fn with_transaction<T>(
        &self,
        context: &str,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let conn = self.lock_conn()?;

        conn.execute("BEGIN IMMEDIATE TRANSACTION", []).map_err(|e| {
            log_io_error_if_any(context, &e);
            error!("[DB] {}: failed to begin transaction: {}", context, e);
            e
        })?;

        match f(&conn) {
            Ok(value) => {
                if let Err(e) = conn.execute("COMMIT", []) {
                    log_io_error_if_any(context, &e);
                    error!("[DB] {}: failed to commit transaction: {}", context, e);
                    let _ = conn.execute("ROLLBACK", []);
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(e) => {
                if let StoreError::Storage(inner) = &e {
                    log_io_error_if_any(context, inner);
                }
                debug!("[DB] {}: rolling back ({})", context, e);
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    /// Run `f` with the connection locked, outside any explicit transaction.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock_conn()?;
        f(&conn)
    }

    /// Raw value stored under `key`
    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| Ok(read_value(conn, key)?))
    }

    /// Store a raw value under `key`
    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            write_value(conn, key, value).map_err(|e| {
                log_io_error_if_any("set_value", &e);
                e
            })?;
            Ok(())
        })
    }

    pub fn onboarding_completed(&self) -> Result<bool> {
        Ok(matches!(
            self.get_value(ONBOARDING_KEY)?.as_deref().map(str::trim),
            Some("true") | Some("1")
        ))
    }

    pub fn set_onboarding_completed(&self, completed: bool) -> Result<()> {
        self.set_value(ONBOARDING_KEY, if completed { "true" } else { "false" })
    }

    /// Save the timer mirror
    pub fn save_timer_state(&self, state: &PersistedTimerState) -> Result<()> {
        self.with_transaction("save_timer_state", |conn| {
            write_blob(conn, TIMER_STATE_KEY, state)
        })
    }

    /// Load the timer mirror; a corrupt mirror reads as absent
    pub fn load_timer_state(&self) -> Result<Option<PersistedTimerState>> {
        self.with_conn(|conn| read_blob(conn, TIMER_STATE_KEY))
    }

    /// Remove the timer mirror entirely (not zeroed)
    pub fn clear_timer_state(&self) -> Result<()> {
        self.with_conn(|conn| {
            delete_value(conn, TIMER_STATE_KEY)?;
            Ok(())
        })
    }
}

pub(crate) fn read_value(conn: &Connection, key: &str) -> SqliteResult<Option<String>> {
    conn.query_row(
        "SELECT value FROM kv_store WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub(crate) fn write_value(conn: &Connection, key: &str, value: &str) -> SqliteResult<()> {
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
        params![key, value, now],
    )?;
    Ok(())
}

pub(crate) fn delete_value(conn: &Connection, key: &str) -> SqliteResult<usize> {
    conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])
}

/// Decode the blob under `key`. Absent → `None`. Undecodable → quarantined, then `None`.
pub(crate) fn read_blob<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>> {
    let raw = match read_value(conn, key)? {
        Some(raw) => raw,
        None => return Ok(None),
    };
    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            quarantine_blob(conn, key, &raw, &e.to_string())?;
            Ok(None)
        }
    }
}

pub(crate) fn write_blob<T: Serialize + ?Sized>(
    conn: &Connection,
    key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(value)?;
    write_value(conn, key, &json)?;
    Ok(())
}

/// Move an unreadable payload aside so the next write cannot destroy it
pub(crate) fn quarantine_blob(conn: &Connection, key: &str, raw: &str, reason: &str) -> Result<()> {
    let backup_key = format!("{}.corrupted.{}", key, chrono::Utc::now().timestamp());
    error!(
        "[DB] Corrupt payload under '{}' ({}). Backed up to '{}', treating as empty.",
        key, reason, backup_key
    );
    write_value(conn, &backup_key, raw)?;
    delete_value(conn, key)?;
    Ok(())
}
