//! Logging setup.
//!
//! Console logging goes through `env_logger` and is controlled by the
//! `RUST_LOG` environment variable (default Info). A persistent log file
//! under the config directory additionally captures run-level messages and
//! is rotated when it grows past the size limit.

use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::config::ConfigManager;

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Initialize console and file logging. Safe to call more than once.
pub fn init_logger() -> Result<()> {
    ConfigManager::ensure_config_dir()?;

    let default_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:5}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(default_level)
        .target(env_logger::Target::Stdout)
        .try_init()
        .ok();

    rotate_log_if_needed()?;
    Ok(())
}

/// Append a line to the persistent log file.
pub fn log_to_file(message: &str) -> Result<()> {
    let log_path = ConfigManager::log_file_path()?;
    append_line(&log_path, message)
}

fn append_line(path: &Path, message: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file: {}", path.display()))?;

    writeln!(
        file,
        "[{}] {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        message
    )?;
    Ok(())
}

/// Rotate the log file to `.log.old` once it exceeds the size limit.
pub fn rotate_log_if_needed() -> Result<()> {
    let log_path = ConfigManager::log_file_path()?;
    if !log_path.exists() {
        return Ok(());
    }

    let metadata = std::fs::metadata(&log_path)?;
    if metadata.len() > MAX_LOG_SIZE {
        let old_log_path = log_path.with_extension("log.old");
        if old_log_path.exists() {
            std::fs::remove_file(&old_log_path)?;
        }
        std::fs::rename(&log_path, &old_log_path)?;
        log::info!("log file rotated to {}", old_log_path.display());
    }
    Ok(())
}
