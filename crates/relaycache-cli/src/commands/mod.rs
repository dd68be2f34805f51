//! CLI command implementations
//!
//! This module contains all RelayCache CLI command implementations.

pub mod aggregates;
pub mod clear;
pub mod compact;
pub mod config;
pub mod get;
pub mod partitions;
pub mod put;
pub mod status;
pub mod sweep;
pub mod upgrade;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use relaycache_config::{CacheConfig, ConfigLoader, ExpirationConfig, TtlSetting};
use relaycache_core::{DatabaseOptions, ExpirationSweeper, RecordStore, Ttl};

use crate::GlobalOptions;

/// Resolve the working directory from options or the current directory.
pub fn resolve_root(global: &GlobalOptions) -> Result<PathBuf> {
    match global.dir {
        Some(ref dir) => Ok(dir.clone()),
        None => std::env::current_dir().context("Failed to get current directory"),
    }
}

/// Config loader honoring the global directory override.
pub fn config_loader(global: &GlobalOptions) -> ConfigLoader {
    match global.global_dir {
        Some(ref dir) => ConfigLoader::with_global_dir(dir),
        None => ConfigLoader::new(),
    }
}

/// Load configuration with optional config file override, then apply CLI
/// overrides.
pub fn load_config(global: &GlobalOptions, root: &Path) -> Result<CacheConfig> {
    let overrides = global.to_config_overrides();
    let mut loader = config_loader(global);

    // An explicit file replaces the global -> local merge
    if let Some(ref config_path) = global.config {
        return loader
            .load_file(config_path, Some(&overrides))
            .with_context(|| format!("Failed to load config file {}", config_path.display()));
    }

    loader
        .load(root, Some(&overrides))
        .context("Failed to load configuration")
}

/// Database options derived from the storage configuration.
pub fn database_options(config: &CacheConfig, root: &Path) -> DatabaseOptions {
    let storage = &config.storage;
    let mut options = DatabaseOptions::new(config.database_path(root))
        .with_ready_timeout(storage.ready_timeout())
        .with_auto_upgrade(storage.auto_upgrade);
    if let Some(version) = storage.schema_version {
        options = options.with_schema_version(version);
    }
    options
}

/// Load configuration and open the store it points at.
pub async fn open_store(global: &GlobalOptions) -> Result<(RecordStore, CacheConfig)> {
    let root = resolve_root(global)?;
    let config = load_config(global, &root)?;
    let options = database_options(&config, &root);
    let path = options.path.clone();

    let store = RecordStore::open(options)
        .await
        .with_context(|| format!("Failed to open cache database {}", path.display()))?;
    Ok((store, config))
}

/// Build a sweeper from the `[expiration.ttl]` table.
pub fn sweeper_from_config(config: &ExpirationConfig) -> ExpirationSweeper {
    ExpirationSweeper::new(
        config
            .ttl
            .iter()
            .map(|(name, ttl)| (name.clone(), to_ttl(*ttl))),
    )
}

fn to_ttl(setting: TtlSetting) -> Ttl {
    match setting.as_duration() {
        Some(duration) => Ttl::After(duration),
        None => Ttl::Never,
    }
}

/// Print a JSON value to stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print an info message (respects quiet flag).
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{}", message);
    }
}
