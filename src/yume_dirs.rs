//! Centralized application directory paths for Yume.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | App data | `~/Library/Application Support/yume/` | `~/.local/share/yume/` |
//! | Config | `~/Library/Application Support/yume/` | `~/.config/yume/` |
//!
//! # Environment Overrides
//!
//! - `YUME_DATA_DIR` overrides [`data_dir`]
//! - `YUME_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds the scheduler run database and log files.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("YUME_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("yume"))
        .unwrap_or_else(|| PathBuf::from("/tmp/yume-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("YUME_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("yume"))
        .unwrap_or_else(|| PathBuf::from("/tmp/yume-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Scheduler run database (`data_dir()/scheduler.db`).
#[must_use]
pub fn scheduler_db_file() -> PathBuf {
    data_dir().join("scheduler.db")
}
