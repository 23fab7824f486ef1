use thiserror::Error;

/// Errors produced by the store and the timer engine.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Bad input: blank name, non-positive duration, zero interval.
    #[error("Validation error: {0}")]
    Validation(String),

    /// SQLite failure (disk full, read-only, I/O).
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A collection could not be encoded before writing.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error (e.g. creating the data directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// `PRAGMA integrity_check` did not return `ok`.
    #[error("Database corruption detected: {0}")]
    Corrupted(String),

    /// Timer transition not allowed from the current state.
    #[error("Cannot {action} timer while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    /// A panic occurred while a mutex was held.
    #[error("Mutex poisoned: {0}")]
    LockPoisoned(String),
}

impl StoreError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corrupted(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        StoreError::LockPoisoned(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
