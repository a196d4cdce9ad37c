//! Debug log setup.
//!
//! The renderer owns the terminal, so events go to a file instead, and only
//! when `--debug` is given. `RUST_LOG` refines the filter.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Debug log file path
pub const DEBUG_LOG_PATH: &str = "/tmp/ledgrid.log";
/// Owner read/write only
pub const DEBUG_LOG_MODE: u32 = 0o600;

/// Opens `path` for logging: exclusive create first, else truncate in place.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(DEBUG_LOG_MODE)
        .open(path)
        .or_else(|_| OpenOptions::new().write(true).truncate(true).open(path))
}

/// Installs the file subscriber. Without `debug` nothing is installed and
/// events are dropped.
pub fn init(debug: bool) -> io::Result<()> {
    if !debug {
        return Ok(());
    }
    let file = open_log_file(Path::new(DEBUG_LOG_PATH))?;
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::DEBUG.into())
        .from_env_lossy();
    let layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_filter(filter);
    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        // already installed, keep the first one
        return Ok(());
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "logging to {}", DEBUG_LOG_PATH);
    Ok(())
}
