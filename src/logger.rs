//! Session logger: routes `tracing` output to a single file in the OS data
//! directory.
//!
//! The file is **truncated at each launch**, so it only ever holds the most
//! recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\SeedCanvas\seed-canvas.log`
//!   Linux:    `~/.local/share/SeedCanvas/seed-canvas.log`
//!   macOS:    `~/Library/Application Support/SeedCanvas/seed-canvas.log`
//!
//! The level filter defaults to `info` and can be overridden with the
//! `SEED_CANVAS_LOG` environment variable (`EnvFilter` syntax).

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SEED_CANVAS_LOG";

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialise the session logger. Call once, before anything logs.
///
/// * Creates (or truncates) the log file; falls back to stderr if it cannot.
/// * Installs a panic hook that records the panic before running the
///   previous hook.
pub fn init() {
    init_at(&log_file_path());
}

/// Like [`init`], but logging to `path`.
pub fn init_at(path: &Path) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = OpenOptions::new().create(true).write(true).truncate(true).open(path);

    let installed = match file {
        Ok(f) => {
            let _ = LOG_PATH.set(path.to_path_buf());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_ansi(false)
                .with_writer(Mutex::new(f))
                .try_init()
        }
        Err(e) => {
            let installed = tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .try_init();
            tracing::warn!("failed to open log file {}: {e}", path.display());
            installed
        }
    };
    if installed.is_err() {
        // a subscriber is already installed (tests, embedding hosts)
        return;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "=== SeedCanvas session started ==="
    );
    if let Some(path) = log_path() {
        tracing::info!("log file: {}", path.display());
    }

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC: {info}");
        prev(info);
    }));
}

fn log_file_path() -> PathBuf {
    data_dir().join("SeedCanvas").join("seed-canvas.log")
}

/// Platform data directory (without the app sub-folder).
pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}
