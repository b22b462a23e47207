//! Common error types used throughout stillforged.
//!
//! This module provides a unified error type covering the failure classes the
//! conversion engine distinguishes: transient store I/O, invalid image data,
//! ledger durability problems, and configuration errors.

/// Common error type for stillforged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested object was not found.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// An object store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// The image bytes could not be decoded.
    #[error("Corrupted image: {0}")]
    Corrupted(String),

    /// The image format is not one the codec accepts.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A conversion ledger operation failed.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing or deserializing a record failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Store error.
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    /// Create a new Corrupted error.
    pub fn corrupted<S: Into<String>>(msg: S) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Create a new UnsupportedFormat error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    /// Create a new Ledger error.
    pub fn ledger<S: Into<String>>(msg: S) -> Self {
        Self::Ledger(msg.into())
    }

    /// Create a new Config error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns `true` for errors caused by the image data itself.
    ///
    /// These are terminal for the item and never worth retrying.
    pub fn is_data_error(&self) -> bool {
        matches!(self, Self::Corrupted(_) | Self::UnsupportedFormat(_))
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
