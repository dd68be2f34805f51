//! RelayCache Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.relaycache/config.toml`
//! - Local config: `.relaycache/config.toml` (in the working directory)
//! - CLI overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → CLI overrides.

mod error;
mod layer;
mod loader;

pub use error::ConfigError;
pub use layer::{ConfigLayer, ExpirationLayer, LoggingLayer, StorageLayer};
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default data directory, relative to the working directory.
pub const DEFAULT_DATA_DIR: &str = ".relaycache";

/// Default SQLite file name inside the data directory.
pub const DEFAULT_DATABASE_FILE: &str = "cache.db";

/// Root configuration for RelayCache.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Storage configuration
    pub storage: StorageConfig,

    /// Expiration sweep configuration
    pub expiration: ExpirationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage configuration for the cache database.
///
/// # Example TOML
///
/// ```toml
/// [storage]
/// data_dir = "/var/cache/relaycache"
/// database_file = "cache.db"
/// auto_upgrade = true
/// ready_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the database (default: `.relaycache`)
    pub data_dir: PathBuf,

    /// Database file name inside `data_dir`
    pub database_file: String,

    /// Schema version to open at (unset = newest supported)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,

    /// Force a schema upgrade when a write hits a missing partition
    pub auto_upgrade: bool,

    /// How long operations wait for the database to become ready
    pub ready_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            schema_version: None,
            auto_upgrade: true,
            ready_timeout_ms: 5_000,
        }
    }
}

impl StorageConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Time-to-live of one partition: seconds, or `"never"`.
///
/// `Never` is distinct from `Seconds(0)`: the former skips the partition,
/// the latter expires everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTtl", into = "RawTtl")]
pub enum TtlSetting {
    Never,
    Seconds(u64),
}

impl TtlSetting {
    /// The TTL as a duration, `None` for `Never`.
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Seconds(secs) => Some(Duration::from_secs(secs)),
        }
    }
}

impl std::fmt::Display for TtlSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => write!(f, "never"),
            Self::Seconds(secs) => write!(f, "{}s", secs),
        }
    }
}

impl std::str::FromStr for TtlSetting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("never") {
            return Ok(Self::Never);
        }
        s.trim_end_matches('s')
            .parse::<u64>()
            .map(Self::Seconds)
            .map_err(|_| ConfigError::invalid_ttl(s))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawTtl {
    Seconds(u64),
    Word(String),
}

impl TryFrom<RawTtl> for TtlSetting {
    type Error = ConfigError;

    fn try_from(raw: RawTtl) -> Result<Self, Self::Error> {
        match raw {
            RawTtl::Seconds(secs) => Ok(Self::Seconds(secs)),
            RawTtl::Word(word) => word.parse(),
        }
    }
}

impl From<TtlSetting> for RawTtl {
    fn from(ttl: TtlSetting) -> Self {
        match ttl {
            TtlSetting::Never => RawTtl::Word("never".to_string()),
            TtlSetting::Seconds(secs) => RawTtl::Seconds(secs),
        }
    }
}

/// Expiration sweep configuration.
///
/// # Example TOML
///
/// ```toml
/// [expiration]
/// startup_delay_secs = 10
///
/// [expiration.ttl]
/// notes = 604800
/// reactions = 86400
/// profiles = "never"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationConfig {
    /// Run one sweep shortly after startup
    pub sweep_on_startup: bool,

    /// Delay before the startup sweep
    pub startup_delay_secs: u64,

    /// Per-partition TTL; partitions not listed never expire
    pub ttl: BTreeMap<String, TtlSetting>,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        let day = 24 * 60 * 60;
        Self {
            sweep_on_startup: true,
            startup_delay_secs: 5,
            ttl: BTreeMap::from([
                ("notes".to_string(), TtlSetting::Seconds(7 * day)),
                ("reactions".to_string(), TtlSetting::Seconds(day)),
                ("misc_records".to_string(), TtlSetting::Seconds(day)),
            ]),
        }
    }
}

impl ExpirationConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    /// Validate partition names in the TTL table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in self.ttl.keys() {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(ConfigError::invalid_partition_name(name.as_str()));
            }
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    const LEVELS: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !Self::LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::invalid_value(
                "logging.level",
                format!(
                    "unknown level '{}'. Valid values: {}",
                    self.level,
                    Self::LEVELS.join(", ")
                ),
            ));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON structured logging
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::UnknownLogFormat(s.to_string())),
        }
    }
}

/// CLI overrides for configuration values.
///
/// Used to apply command-line arguments over file-based config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override data directory
    pub data_dir: Option<PathBuf>,

    /// Override database file name
    pub database_file: Option<String>,

    /// Override schema version
    pub schema_version: Option<u32>,

    /// Override automatic upgrades
    pub auto_upgrade: Option<bool>,

    /// Override log level
    pub log_level: Option<String>,

    /// Override log format
    pub log_format: Option<LogFormat>,
}

impl CacheConfig {
    /// Apply CLI overrides to this configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref dir) = overrides.data_dir {
            self.storage.data_dir = dir.clone();
        }

        if let Some(ref file) = overrides.database_file {
            self.storage.database_file = file.clone();
        }

        if let Some(version) = overrides.schema_version {
            self.storage.schema_version = Some(version);
        }

        if let Some(enabled) = overrides.auto_upgrade {
            self.storage.auto_upgrade = enabled;
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }

        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let file = &self.storage.database_file;
        if file.is_empty() || file.contains(['/', '\\']) {
            return Err(ConfigError::InvalidDatabaseFile { name: file.clone() });
        }
        if self.storage.ready_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "storage.ready_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.storage.schema_version == Some(0) {
            return Err(ConfigError::invalid_value(
                "storage.schema_version",
                "versions start at 1",
            ));
        }
        self.expiration.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Get the effective data directory for a working directory.
    pub fn data_dir(&self, root: &Path) -> PathBuf {
        if self.storage.data_dir.is_absolute() {
            self.storage.data_dir.clone()
        } else {
            root.join(&self.storage.data_dir)
        }
    }

    /// Get the database file path for a working directory.
    pub fn database_path(&self, root: &Path) -> PathBuf {
        self.data_dir(root).join(&self.storage.database_file)
    }
}
