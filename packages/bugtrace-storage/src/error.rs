//! Error types for bugtrace-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Key is empty, absolute, or escapes the store root
    InvalidKey,
    /// Artifact not present in the store
    NotFound,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidKey => "invalid_key",
            ErrorKind::NotFound => "not_found",
            ErrorKind::IO => "io",
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

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn invalid_key(key: impl Into<String>, reason: &str) -> Self {
        Self::new(
            ErrorKind::InvalidKey,
            format!("Invalid artifact key '{}': {}", key.into(), reason),
        )
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("Artifact not found: {}", key.into()),
        )
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::new(ErrorKind::IO, message).with_source(source)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::io(format!("IO error: {}", err), err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
