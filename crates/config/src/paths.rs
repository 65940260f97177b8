//! Path utilities

use std::path::{Path, PathBuf};

/// Root data directory (~/.omnigate)
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .expect("◆ FAILED TO LOCATE HOME DIRECTORY")
        .join(".omnigate")
}

/// Configuration file location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Event log location
pub fn log_path() -> PathBuf {
    data_dir().join("events.log")
}

/// Encrypted vault blob location
pub fn vault_path() -> PathBuf {
    data_dir().join("secrets.vault")
}

/// Vault salt location
pub fn salt_path() -> PathBuf {
    data_dir().join("secrets.salt")
}

/// Persisted task queue location
pub fn queue_path() -> PathBuf {
    data_dir().join("queue.json")
}

/// Ensure directory exists
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

/// Expand a leading `~` or `~/` to the home directory.
///
/// Paths without a tilde are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
