use std::{
    fs::{self, File, OpenOptions},
    io,
    path::Path,
    sync::Mutex,
};

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const LOG_DIR: &str = "/var/log/omen-fan";
pub const LOG_FILE: &str = "omen-fan.log";

fn open_log_file(log_dir: &Path) -> io::Result<File> {
    fs::create_dir_all(log_dir)?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE))
}

// Log to stdout and, when the directory is writable, to a log file
pub fn init_logging(log_dir: Option<&Path>) {
    let level = if cfg!(debug_assertions) { "trace" } else { "info" };

    let (filter, filter_defaulted) = match EnvFilter::try_from_default_env() {
        Ok(f) => (f, false),
        Err(_) => (EnvFilter::new(level), true),
    };

    let (log_file, file_error) = match log_dir.map(open_log_file) {
        Some(Ok(file)) => (Some(file), None),
        Some(Err(err)) => (None, Some(err)),
        None => (None, None),
    };

    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(file_layer)
        .with(filter)
        .init();

    if filter_defaulted {
        info!("\"RUST_LOG\" variable not set, defaulting to {level}");
    }

    if let Some(err) = file_error {
        warn!("Logging to stdout only, failed to open log file: {err}");
    }
}
