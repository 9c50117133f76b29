//! Initialize the configuration directory: create ~/.pulsar, a default config and the data directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

const DEFAULT_STORE_PATH: &str = "data/store.json";

/// Ensure the configuration directory has been initialized (config file exists, and the
/// store's directory exists when a snapshot path is configured).
pub fn require_initialized(config_path: &Path, config: &config::Config) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `pulsar init` first (config file not found: {})",
            config_path.display()
        );
    }
    if let Some(store_path) = config::resolve_store_path(config, config_path) {
        let data_dir = store_path.parent().unwrap_or_else(|| Path::new("."));
        if !data_dir.exists() {
            anyhow::bail!(
                "configuration not initialized; run `pulsar init` first (data directory not found: {})",
                data_dir.display()
            );
        }
    }
    Ok(())
}

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with defaults and `store.path = "data/store.json"` if missing.
/// - Creates the `data` subdirectory for the store snapshot.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let mut default_config = config::Config::default();
        default_config.store.path = Some(PathBuf::from(DEFAULT_STORE_PATH));
        let body = serde_json::to_string_pretty(&default_config)
            .context("serializing default config")?;
        std::fs::write(config_path, body)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let data_dir = config_dir.join("data");
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        log::info!("created data directory at {}", data_dir.display());
    } else {
        log::debug!("data directory already exists at {}, skipping", data_dir.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_require_succeeds() {
        let dir = std::env::temp_dir().join(format!("pulsar-init-{}", uuid::Uuid::new_v4()));
        let config_path = dir.join("config.json");
        let (missing, _) = config::load_config(Some(config_path.clone())).unwrap();
        assert!(require_initialized(&config_path, &missing).is_err());

        init_config_dir(&config_path).unwrap();
        let (loaded, _) = config::load_config(Some(config_path.clone())).unwrap();
        assert_eq!(loaded.store.path, Some(PathBuf::from(DEFAULT_STORE_PATH)));
        require_initialized(&config_path, &loaded).unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }
}
