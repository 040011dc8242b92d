//! Configuration
//!
//! ```yaml
//! version: 1
//! suspension_buffer_secs: 10
//! default_index_by: 1000
//! connections:
//!   default:
//!     index_name: "{doc_type}"
//!     engine: memory
//!   archive:
//!     index_name: "archive_{doc_type}"
//!     engine: tantivy
//!     path: /var/lib/indexsync/archive
//! ```
//!
//! `SyncConfig::from_env` reads the file named by `INDEXSYNC_CONFIG`; without
//! it, `SyncConfig::default()` applies (one in-memory `default` connection).

pub mod error;
pub mod io;

pub use error::{ConfigError, ConfigResult};
pub use io::{ConfigFileV1, ConnectionConfig, EngineKind};

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "INDEXSYNC_CONFIG";

pub const SUPPORTED_VERSIONS: &[u64] = &[1];

pub const DEFAULT_CONNECTION: &str = "default";
pub const DEFAULT_SUSPENSION_BUFFER_SECS: u64 = 10;
pub const DEFAULT_INDEX_BY: usize = 1000;

const MAX_SUSPENSION_BUFFER_SECS: u64 = 3600;
const MAX_INDEX_BY: usize = 100_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub connections: BTreeMap<String, ConnectionConfig>,
    pub suspension_buffer: Duration,
    pub default_index_by: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connections: BTreeMap::from([(
                DEFAULT_CONNECTION.to_string(),
                ConnectionConfig::default(),
            )]),
            suspension_buffer: Duration::from_secs(DEFAULT_SUSPENSION_BUFFER_SECS),
            default_index_by: DEFAULT_INDEX_BY,
        }
    }
}

impl SyncConfig {
    /// Load and validate a YAML file
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(content)?;
        let version = raw
            .get("version")
            .ok_or(ConfigError::MissingVersion)?
            .as_u64()
            .ok_or(ConfigError::MissingVersion)?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        let file: ConfigFileV1 = serde_yaml::from_value(raw)?;
        let config = Self::from_file(file);
        config.validate()?;
        Ok(config)
    }

    /// `INDEXSYNC_CONFIG` when set, defaults otherwise
    pub fn from_env() -> ConfigResult<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_yaml(path),
            None => Ok(Self::default()),
        }
    }

    fn from_file(file: ConfigFileV1) -> Self {
        let defaults = Self::default();
        Self {
            connections: file
                .connections
                .filter(|c| !c.is_empty())
                .unwrap_or(defaults.connections),
            suspension_buffer: file
                .suspension_buffer_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.suspension_buffer),
            default_index_by: file.default_index_by.unwrap_or(defaults.default_index_by),
        }
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: 1,
            connections: Some(self.connections.clone()),
            suspension_buffer_secs: Some(self.suspension_buffer.as_secs()),
            default_index_by: Some(self.default_index_by),
        };
        Ok(serde_yaml::to_string(&file)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let buffer = self.suspension_buffer.as_secs();
        if buffer > MAX_SUSPENSION_BUFFER_SECS {
            return Err(ConfigError::range_with_hint(
                "suspension_buffer_secs",
                buffer,
                0,
                MAX_SUSPENSION_BUFFER_SECS,
                "Replay windows longer than an hour are not supported",
            ));
        }
        if self.default_index_by == 0 || self.default_index_by > MAX_INDEX_BY {
            return Err(ConfigError::range_with_hint(
                "default_index_by",
                self.default_index_by,
                1,
                MAX_INDEX_BY,
                "Bulk chunks must hold at least one document",
            ));
        }
        Ok(())
    }

    pub fn connection(&self, name: &str) -> ConfigResult<&ConnectionConfig> {
        self.connections
            .get(name)
            .ok_or_else(|| ConfigError::UnknownConnection {
                name: name.to_string(),
                configured: self.connections.keys().cloned().collect(),
            })
    }
}
