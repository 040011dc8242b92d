//! Error types for indexsync-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Record not found
    RecordNotFound,
    /// Record type not registered with the store
    RecordTypeNotFound,
    /// Attribute not declared on the record type
    AttributeNotFound,
    /// A mutation observer failed (pre- or post-change hook)
    Observer,
    /// Configuration errors
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RecordNotFound => "record_not_found",
            ErrorKind::RecordTypeNotFound => "record_type_not_found",
            ErrorKind::AttributeNotFound => "attribute_not_found",
            ErrorKind::Observer => "observer",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an already boxed source (observer failures arrive boxed)
    pub fn with_boxed_source(mut self, source: Box<dyn std::error::Error + Send + Sync>) -> Self {
        self.source = Some(source);
        self
    }

    // Convenience constructors
    pub fn record_not_found(record_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::RecordNotFound,
            format!("Record not found: {}#{}", record_type, id),
        )
    }

    pub fn record_type_not_found(record_type: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::RecordTypeNotFound,
            format!("Record type not registered: {}", record_type.into()),
        )
    }

    pub fn attribute_not_found(record_type: &str, attribute: &str) -> Self {
        Self::new(
            ErrorKind::AttributeNotFound,
            format!("Attribute '{}' not declared on {}", attribute, record_type),
        )
    }

    pub fn observer(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Observer, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
