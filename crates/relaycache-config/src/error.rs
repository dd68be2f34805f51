//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, validating or saving cache configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file '{path}' is not valid TOML: {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot render config as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("cannot write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create config directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No home directory, so there is no global config location
    #[error("could not determine home directory for the global config")]
    NoHomeDir,

    /// A TTL that is neither a number of seconds nor `never`
    #[error("invalid ttl '{value}': expected seconds (e.g. 3600 or \"90s\") or \"never\"")]
    InvalidTtl { value: String },

    /// A key of `[expiration.ttl]` that cannot name a partition
    #[error("'{name}' in [expiration.ttl] is not a partition name: only letters, digits and underscores are allowed")]
    InvalidPartitionName { name: String },

    /// `storage.database_file` must stay inside the data directory
    #[error("storage.database_file '{name}' must be a plain file name")]
    InvalidDatabaseFile { name: String },

    #[error("unknown log format '{0}' (expected text or json)")]
    UnknownLogFormat(String),

    /// Any other out-of-range value, keyed by its dotted path
    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }

    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFile {
            path: path.into(),
            source,
        }
    }

    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CreateDir {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_ttl(value: impl Into<String>) -> Self {
        Self::InvalidTtl {
            value: value.into(),
        }
    }

    pub fn invalid_partition_name(name: impl Into<String>) -> Self {
        Self::InvalidPartitionName { name: name.into() }
    }

    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// The dotted config key the error is about, when it concerns one value.
    pub fn key(&self) -> Option<String> {
        match self {
            Self::InvalidPartitionName { name } => Some(format!("expiration.ttl.{}", name)),
            Self::InvalidDatabaseFile { .. } => Some("storage.database_file".to_string()),
            Self::UnknownLogFormat(_) => Some("logging.format".to_string()),
            Self::InvalidValue { key, .. } => Some(key.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_error_shows_accepted_forms() {
        let err = ConfigError::invalid_ttl("soon");
        let message = err.to_string();
        assert!(message.contains("'soon'"));
        assert!(message.contains("never"));
        assert_eq!(err.key(), None);
    }

    #[test]
    fn test_partition_name_error_points_at_ttl_table() {
        let err = ConfigError::invalid_partition_name("drop table");
        assert!(err.to_string().contains("[expiration.ttl]"));
        assert_eq!(err.key().as_deref(), Some("expiration.ttl.drop table"));
    }

    #[test]
    fn test_read_file_error_names_path() {
        let err = ConfigError::read_file(
            "/nowhere/config.toml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().contains("/nowhere/config.toml"));
        assert_eq!(err.key(), None);
    }
}
