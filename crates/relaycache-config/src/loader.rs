//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.relaycache/config.toml`
//! 2. Local config: `.relaycache/config.toml` (in the working directory)
//! 3. CLI overrides
//!
//! Later sources override earlier ones, key by key: a file only overrides
//! the keys it sets.

use crate::error::ConfigError;
use crate::layer::ConfigLayer;
use crate::{CacheConfig, ConfigOverrides};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Global configuration directory name.
const GLOBAL_CONFIG_DIR: &str = ".relaycache";

/// Local configuration directory name.
const LOCAL_CONFIG_DIR: &str = ".relaycache";

/// Configuration loader with caching and inheritance support.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.relaycache`)
    global_config_dir: Option<PathBuf>,

    /// Cached global config layer
    global_config: Option<ConfigLayer>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    ///
    /// Automatically detects the global config directory (`~/.relaycache`).
    pub fn new() -> Self {
        let global_config_dir = dirs::home_dir().map(|h| h.join(GLOBAL_CONFIG_DIR));

        Self {
            global_config_dir,
            global_config: None,
        }
    }

    /// Create a loader with a custom global config directory.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
            global_config: None,
        }
    }

    /// Get the global config file path.
    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Get the local config file path for a working directory.
    pub fn local_config_path(&self, root: &Path) -> PathBuf {
        root.join(LOCAL_CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Load configuration for a working directory with optional CLI overrides.
    ///
    /// Merges config in order: global → local → overrides, then validates.
    pub fn load(
        &mut self,
        root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<CacheConfig, ConfigError> {
        let mut config = CacheConfig::default();

        if let Some(global_layer) = self.load_global()? {
            global_layer.apply_to(&mut config);
        }

        if let Some(local_layer) = self.load_local(root)? {
            local_layer.apply_to(&mut config);
        }

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a single explicit config file over the defaults, skipping the
    /// global and local files.
    pub fn load_file(
        &self,
        path: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<CacheConfig, ConfigError> {
        debug!("Loading config from {:?}", path);
        let mut config = load_config_file(path)?.resolve();

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load the keys set by the global configuration file.
    pub fn load_global(&mut self) -> Result<Option<ConfigLayer>, ConfigError> {
        if let Some(ref config) = self.global_config {
            return Ok(Some(config.clone()));
        }

        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory found, skipping global config");
            return Ok(None);
        };

        if !global_path.exists() {
            trace!("Global config not found at {:?}", global_path);
            return Ok(None);
        }

        debug!("Loading global config from {:?}", global_path);
        let config = load_config_file(&global_path)?;
        self.global_config = Some(config.clone());

        Ok(Some(config))
    }

    /// Load the keys set by the local configuration file of a working directory.
    pub fn load_local(&self, root: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
        let local_path = self.local_config_path(root);

        if !local_path.exists() {
            trace!("Local config not found at {:?}", local_path);
            return Ok(None);
        }

        debug!("Loading local config from {:?}", local_path);
        load_config_file(&local_path).map(Some)
    }

    /// Save a layer to the local config file. Keys it does not set are left
    /// out of the file.
    pub fn save_local(&self, root: &Path, layer: &ConfigLayer) -> Result<(), ConfigError> {
        save_config_file(&self.local_config_path(root), layer)
    }

    /// Initialize global configuration.
    ///
    /// Creates `~/.relaycache/config.toml` with default configuration if it
    /// does not exist yet.
    pub fn init_global(&self) -> Result<PathBuf, ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };
        init_config_file(global_dir)
    }

    /// Initialize local configuration.
    ///
    /// Creates `.relaycache/config.toml` with default configuration if it
    /// does not exist yet.
    pub fn init_local(&self, root: &Path) -> Result<PathBuf, ConfigError> {
        init_config_file(&root.join(LOCAL_CONFIG_DIR))
    }

    /// Clear cached global configuration.
    pub fn clear_cache(&mut self) {
        self.global_config = None;
    }
}

fn init_config_file(dir: &Path) -> Result<PathBuf, ConfigError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::create_dir(dir, e))?;
    }

    let config_path = dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        save_config_file(&config_path, &CacheConfig::default())?;
    }

    Ok(config_path)
}

/// Load a configuration file from disk.
fn load_config_file(path: &Path) -> Result<ConfigLayer, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;

    toml::from_str(&content).map_err(|e| ConfigError::parse_toml(path, e))
}

/// Save a configuration file to disk.
fn save_config_file<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
}
