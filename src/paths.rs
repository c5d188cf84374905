//! XDG directory helpers for config/data locations.

use std::path::PathBuf;

use crate::core::NamespaceId;

/// Base directory for persistent data (replicant store, logs, socket).
///
/// Uses `STATECAST_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/statecast`
/// or `~/.local/share/statecast`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STATECAST_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("statecast")
}

/// Root of the replicant snapshot store.
pub fn replicants_dir() -> PathBuf {
    data_dir().join("db").join("replicants")
}

/// Per-namespace snapshot directory.
pub fn namespace_dir(root: &std::path::Path, namespace: &NamespaceId) -> PathBuf {
    root.join(namespace.as_str())
}

/// Daemon socket path. `STATECAST_SOCKET` overrides.
pub fn socket_path() -> PathBuf {
    if let Ok(path) = std::env::var("STATECAST_SOCKET")
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }
    data_dir().join("statecast.sock")
}

/// Directory for rolling log files.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Base directory for configuration files.
///
/// Uses `STATECAST_CONFIG_DIR` if set, otherwise
/// `$XDG_CONFIG_HOME/statecast` or `~/.config/statecast`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STATECAST_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("statecast")
}
