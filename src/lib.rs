use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::{fs, io, panic};
use tracing::{error, info, warn};

pub mod calendar;
pub mod commands;
pub mod config;
mod database;
pub mod engine;
pub mod error;
mod events;
pub mod format;
pub mod models;
pub mod stats;
mod subjects;

pub use config::AppConfig;
pub use database::Database;
pub use engine::{Clock, SystemClock, TimerEngine, TimerSnapshot, TimerState, TimerStatus};
pub use error::{Result, StoreError};
pub use subjects::local_day_bounds;


/// Panic recovery: persist the timer mirror when a panic unwinds.
static PANIC_ENGINE: OnceLock<Arc<TimerEngine>> = OnceLock::new();

/// Install the fmt subscriber. `RUST_LOG` wins over `fallback_filter`.
/// Output goes to stderr so `--json` stdout stays machine-readable.
pub fn init_tracing(fallback_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback_filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    // try_init: a second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Register `engine` so a panic persists its state before unwinding
pub fn install_panic_hook(engine: Arc<TimerEngine>) {
    if PANIC_ENGINE.set(engine).is_err() {
        warn!("[PANIC_RECOVERY] Panic hook already installed");
        return;
    }
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if let Some(engine) = PANIC_ENGINE.get() {
            if let Err(e) = engine.save_state() {
                eprintln!("[PANIC_RECOVERY] Failed to persist timer state: {}", e);
            } else {
                eprintln!("[PANIC_RECOVERY] Timer state persisted before panic");
            }
        }
        default_hook(info);
    }));
}

/// Open (or create) the database described by `config`.
///
/// A database failing its integrity check is moved aside to
/// `<file>.corrupted.<unix ts>` and a fresh one is created in its place.
pub fn open_database(config: &AppConfig) -> Result<Arc<Database>> {
    let data_dir = config.resolve_data_dir()?;
    fs::create_dir_all(&data_dir).map_err(|e| {
        let hint = match e.kind() {
            io::ErrorKind::PermissionDenied => "Permission denied. Check data directory is writable.",
            io::ErrorKind::StorageFull => "Disk full. Free space on drive.",
            _ => "Failed to create data directory.",
        };
        error!("[DB] {} Path: {} ({})", hint, data_dir.display(), e);
        StoreError::Io(io::Error::new(
            e.kind(),
            format!("{} Path: {}: {}", hint, data_dir.display(), e),
        ))
    })?;

    let db_path = data_dir.join(&config.db_file_name);
    match Database::new(&db_path) {
        Ok(db) => Ok(Arc::new(db)),
        Err(e) if e.is_corruption() && db_path.exists() => {
            recover_corrupted(&db_path, &config.db_file_name)?;
            Ok(Arc::new(Database::new(&db_path)?))
        }
        Err(e) => {
            error!("[DB] Failed to initialize database at {:?}: {}", db_path, e);
            Err(e)
        }
    }
}

fn recover_corrupted(db_path: &Path, file_name: &str) -> Result<()> {
    let backup_path = db_path.with_file_name(format!(
        "{}.corrupted.{}",
        file_name,
        chrono::Utc::now().timestamp()
    ));
    fs::rename(db_path, &backup_path).map_err(|e| {
        warn!(
            "[DB] Failed to rename corrupted DB to {:?}: {}",
            backup_path, e
        );
        StoreError::Io(e)
    })?;
    // WAL side files belong to the corrupted database
    for suffix in ["-wal", "-shm"] {
        let side = db_path.with_file_name(format!("{}{}", file_name, suffix));
        if side.exists() {
            if let Err(e) = fs::remove_file(&side) {
                warn!("[DB] Failed to remove {:?}: {}", side, e);
            }
        }
    }
    info!(
        "[DB] Corrupted DB backed up to {:?}, starting fresh",
        backup_path
    );
    Ok(())
}
