use std::path::{Path, PathBuf};
use tracing::warn;

use crate::engine::DEFAULT_POMODORO_MINUTES;
use crate::error::{Result, StoreError};

pub const ENV_DATA_DIR: &str = "STUDYFLOW_DATA_DIR";
pub const ENV_POMODORO_MINUTES: &str = "STUDYFLOW_POMODORO_MINUTES";
pub const ENV_UPCOMING_DAYS: &str = "STUDYFLOW_UPCOMING_DAYS";
pub const ENV_LOG: &str = "STUDYFLOW_LOG";

/// Application configuration (data location, timer and view defaults)
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` resolves to the platform data directory on open
    pub data_dir: Option<PathBuf>,
    pub db_file_name: String,
    pub pomodoro_minutes: u32,
    pub upcoming_window_days: u32,
    /// Fallback filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            db_file_name: "studyflow.db".to_string(),
            pomodoro_minutes: DEFAULT_POMODORO_MINUTES,
            upcoming_window_days: 7,
            log_filter: "warn".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults overridden by `STUDYFLOW_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|d| !d.trim().is_empty()) {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(minutes) = parse_positive(&lookup, ENV_POMODORO_MINUTES) {
            config.pomodoro_minutes = minutes;
        }
        if let Some(days) = parse_positive(&lookup, ENV_UPCOMING_DAYS) {
            config.upcoming_window_days = days;
        }
        if let Some(filter) = lookup(ENV_LOG).filter(|f| !f.trim().is_empty()) {
            config.log_filter = filter;
        }
        config
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Explicit directory, else `<platform data dir>/studyflow`
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join("studyflow"))
                .ok_or(StoreError::NoDataDir),
        }
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        Ok(self.resolve_data_dir()?.join(&self.db_file_name))
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u32> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u32>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!(
                "[CONFIG] Ignoring {}='{}': expected a positive integer",
                key, raw
            );
            None
        }
    }
}
