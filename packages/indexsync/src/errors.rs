//! Error types for indexsync
//!
//! Provides unified error handling across the crate.

use thiserror::Error;

use crate::config::ConfigError;
use crate::features::search_engine::EngineError;
use indexsync_storage::StorageError;

/// Main error type for indexsync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// Record store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Search engine failure
    #[error("Search engine error: {0}")]
    Engine(#[from] EngineError),

    /// Declaration, settings or configuration file problem
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Template rendering failed; fatal for the document being prepared
    #[error("Failed to render template '{template}': {message}")]
    Render { template: String, message: String },

    /// No registered index matches a key or selector
    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    /// Invalid command argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn render(template: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Render {
            template: template.into(),
            message: message.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        SyncError::InvalidArgument(msg.into())
    }
}

/// Result type alias for indexsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_display() {
        let err = SyncError::render("search/indexes/blog/post_search_body.html", "boom");
        let msg = err.to_string();
        assert!(msg.contains("post_search_body.html"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_storage_error_converts() {
        fn inner() -> Result<()> {
            Err(StorageError::record_type_not_found("shop.order"))?;
            Ok(())
        }

        let err = inner().unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
        assert!(err.to_string().contains("shop.order"));
    }

    #[test]
    fn test_config_error_converts() {
        let err: SyncError = ConfigError::MissingVersion.into();
        assert!(err.to_string().starts_with("Configuration error"));
    }
}
