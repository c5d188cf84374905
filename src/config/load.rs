use std::fs;
use std::path::{Path, PathBuf};

use super::Config;

pub fn config_path() -> PathBuf {
    crate::paths::config_dir().join("config.toml")
}

pub fn load_user_config() -> Result<Option<Config>, String> {
    let path = config_path();
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|e| format!("failed to parse {}: {e}", path.display()))
}

/// Load the user config, falling back to defaults on any failure.
/// Config problems must never stop the daemon from starting.
pub fn load_or_default() -> Config {
    match load_user_config() {
        Ok(Some(config)) => config,
        Ok(None) => {
            // First run: materialize the defaults so users have a file
            // to edit.
            let config = Config::default();
            if let Err(e) = write_config(&config_path(), &config) {
                tracing::warn!("failed to write default config: {e}");
            }
            config
        }
        Err(e) => {
            tracing::warn!("config load failed, using defaults: {e}");
            Config::default()
        }
    }
}

pub fn write_config(path: &Path, config: &Config) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let contents = toml::to_string_pretty(config)
        .map_err(|e| std::io::Error::other(format!("failed to render config: {e}")))?;
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, contents.as_bytes())?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.persistence.default_interval_ms = 42;

        write_config(&path, &config).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        let loaded: Config = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.persistence.default_interval_ms, 42);
    }
}
