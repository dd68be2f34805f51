//! Partial configuration read from a single file.
//!
//! A layer only holds the keys its file actually sets. Layers are applied in
//! order over the defaults, so a later file can both enable and disable a
//! flag, and a file that never mentions `[expiration.ttl]` leaves the TTL
//! table of earlier layers untouched.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{CacheConfig, LogFormat, TtlSetting};

/// Keys set by one configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageLayer>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<ExpirationLayer>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingLayer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_file: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_upgrade: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpirationLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_on_startup: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_delay_secs: Option<u64>,

    /// Per-partition entries; merged into the table below, never replacing it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<BTreeMap<String, TtlSetting>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormat>,
}

impl ConfigLayer {
    /// Write every key this layer sets into `config`.
    pub fn apply_to(&self, config: &mut CacheConfig) {
        if let Some(ref storage) = self.storage {
            let target = &mut config.storage;
            if let Some(ref dir) = storage.data_dir {
                target.data_dir = dir.clone();
            }
            if let Some(ref file) = storage.database_file {
                target.database_file = file.clone();
            }
            if let Some(version) = storage.schema_version {
                target.schema_version = Some(version);
            }
            if let Some(enabled) = storage.auto_upgrade {
                target.auto_upgrade = enabled;
            }
            if let Some(ms) = storage.ready_timeout_ms {
                target.ready_timeout_ms = ms;
            }
        }

        if let Some(ref expiration) = self.expiration {
            let target = &mut config.expiration;
            if let Some(enabled) = expiration.sweep_on_startup {
                target.sweep_on_startup = enabled;
            }
            if let Some(secs) = expiration.startup_delay_secs {
                target.startup_delay_secs = secs;
            }
            if let Some(ref ttl) = expiration.ttl {
                target
                    .ttl
                    .extend(ttl.iter().map(|(name, ttl)| (name.clone(), *ttl)));
            }
        }

        if let Some(ref logging) = self.logging {
            if let Some(ref level) = logging.level {
                config.logging.level = level.clone();
            }
            if let Some(format) = logging.format {
                config.logging.format = format;
            }
        }
    }

    /// The configuration this layer yields over the defaults.
    pub fn resolve(&self) -> CacheConfig {
        let mut config = CacheConfig::default();
        self.apply_to(&mut config);
        config
    }
}
