//! Log to a file next to the profiles so output never lands on the TUI.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::profiles::config_dir;

pub const LOG_ENV: &str = "RACKTOP_LOG";
const DEFAULT_FILTER: &str = "info";

pub fn log_path() -> PathBuf {
    config_dir().join("racktop.log")
}

/// Install the global subscriber. Filter directives come from `RACKTOP_LOG`.
pub fn init() -> io::Result<PathBuf> {
    let path = log_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(io::Error::other)?;
    Ok(path)
}
