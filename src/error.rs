//! Error handling for the provd kernel
//!
//! This module defines the crate error type and a Result alias used
//! throughout the daemon. Variants follow the failure classes the kernel
//! distinguishes: usage, collaborator, query and remote failures.

use thiserror::Error;

/// Main error type for kernel operations
#[derive(Error, Debug)]
pub enum KernelError {
    /// Malformed command or query; reported to the issuer with no state change
    #[error("Usage: {0}")]
    Usage(String),

    /// A reporter, storage, filter or sketch could not be created or started
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// A query failed and yields no result
    #[error("Query error: {0}")]
    Query(String),

    /// A remote leg failed (connection, peer, or protocol)
    #[error("Remote error: {0}")]
    Remote(String),

    /// Wire schema violations
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<KernelError>,
    },
}

impl KernelError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        KernelError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) is a usage error.
    pub fn is_usage(&self) -> bool {
        match self {
            KernelError::Usage(_) => true,
            KernelError::WithContext { source, .. } => source.is_usage(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(err: serde_json::Error) -> Self {
        KernelError::Serialization(err.to_string())
    }
}

/// Result type alias for kernel operations
pub type Result<T> = std::result::Result<T, KernelError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| KernelError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| KernelError::Io(e).with_context(f()))
    }
}
