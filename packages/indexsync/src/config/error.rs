//! Configuration error types

use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Range validation error
    #[error("Invalid range for field '{field}': {value} not in {min}..={max}. {hint}")]
    Range {
        field: String,
        value: String,
        min: String,
        max: String,
        hint: String,
    },

    /// Missing version field in YAML
    #[error("Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.")]
    MissingVersion,

    /// Unsupported version
    #[error("Unsupported configuration version {found}. Supported versions: {}", supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u64, supported: Vec<u64> },

    /// A declaration names a connection that is not configured
    #[error("Unknown connection '{name}'. Configured connections: {}", configured.join(", "))]
    UnknownConnection {
        name: String,
        configured: Vec<String>,
    },

    /// Two analysis contributions assign different values to the same setting
    #[error("Conflicting index settings at '{path}': {left} vs {right}")]
    SettingsConflict {
        path: String,
        left: String,
        right: String,
    },

    /// An index declaration cannot be compiled
    #[error("Invalid declaration for {index}: {reason}")]
    InvalidDeclaration { index: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    /// Create a range error with a hint
    pub fn range_with_hint(
        field: impl Into<String>,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
        hint: impl Into<String>,
    ) -> Self {
        Self::Range {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
            hint: hint.into(),
        }
    }

    pub fn invalid_declaration(index: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDeclaration {
            index: index.into(),
            reason: reason.into(),
        }
    }
}
