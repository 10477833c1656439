//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data | `~/Library/Application Support/vigil/` | `~/.local/share/vigil/` |
//! | Config | `~/Library/Application Support/vigil/` | `~/.config/vigil/` |
//!
//! Override with `VIGIL_DATA_DIR` / `VIGIL_CONFIG_DIR`.

use std::path::PathBuf;

/// Task database filename within the data directory.
const STORE_FILENAME: &str = "tasks.db";

/// Application data root directory.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("VIGIL_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("vigil"))
        .unwrap_or_else(|| PathBuf::from("/tmp/vigil-data"))
}

/// Application config directory (holds `config.toml`).
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("VIGIL_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("vigil"))
        .unwrap_or_else(|| PathBuf::from("/tmp/vigil-config"))
}

/// Default SQLite task store path (`data_dir()/tasks.db`).
#[must_use]
pub fn store_path() -> PathBuf {
    data_dir().join(STORE_FILENAME)
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}
