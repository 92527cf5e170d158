//! # Tracing Setup
//!
//! One logging setup for every binary in the workspace: human-readable
//! console output plus JSON lines in a daily-rolling file, filtered by
//! `RUST_LOG` when set and by the configured level otherwise.

use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rolled files of one application kept on startup.
pub const DEFAULT_KEEP_LOGS: usize = 7;

/// # Init Tracing
///
/// Creates `log_dir`, prunes old files of `app`, and installs the global
/// subscriber. The returned guard flushes the file writer on drop and must
/// be held for the life of the process.
///
/// # Errors
/// Fails if the directory cannot be created, the level does not parse, or a
/// global subscriber is already installed.
pub fn init_tracing(app: &str, log_dir: &Path, level: &str) -> io::Result<WorkerGuard> {
    fs::create_dir_all(log_dir)?;
    let removed = cleanup_old_logs(log_dir, app, DEFAULT_KEEP_LOGS)?;

    let file_appender = rolling::daily(log_dir, app);
    let (writer, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer).json();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    info!(app, level, log_dir = %log_dir.display(), removed, "logging initialized");
    Ok(guard)
}

/// Deletes all but the newest `keep` files in `log_dir` whose name starts
/// with `app`. Returns how many were removed.
pub fn cleanup_old_logs(log_dir: &Path, app: &str, keep: usize) -> io::Result<usize> {
    let mut entries: Vec<(SystemTime, std::path::PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(app))
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            meta.is_file().then(|| (meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), e.path()))
        })
        .collect();

    // Newest first
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}
