//! Configuration loading and resolution.

use std::path::PathBuf;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "SENSORCAST_DATA_DIR";

/// Environment variable overriding the listen address.
pub const ADDR_ENV: &str = "SENSORCAST_ADDR";

/// Listen address used when nothing else is configured.
pub const DEFAULT_ADDR: &str = "0.0.0.0:5000";

/// Resolve the directory holding history, forecast and capture documents.
pub fn resolve_data_dir(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var(DATA_DIR_ENV) {
        if !env_path.trim().is_empty() {
            return PathBuf::from(env_path);
        }
    }

    let cwd_data = PathBuf::from("DownloadData");
    if cwd_data.is_dir() {
        return cwd_data;
    }

    resolve_default_data_dir()
}

fn resolve_default_data_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(format!("{home}/.sensorcast/data"))
}

/// Resolve the HTTP listen address.
pub fn resolve_addr(explicit: Option<&str>) -> String {
    if let Some(addr) = explicit {
        return addr.to_string();
    }

    match std::env::var(ADDR_ENV) {
        Ok(addr) if !addr.trim().is_empty() => addr,
        _ => DEFAULT_ADDR.to_string(),
    }
}
