//! Error types for halyard-core.

use thiserror::Error;

/// Main error type for halyard operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed ADC line.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A search-type tag could not be resolved by the registry.
    #[error("unknown search type: {0}")]
    SearchTypeUnknown(String),

    /// An auto-search item with the same search string already exists.
    #[error("item name exists: {0}")]
    DuplicateItem(String),

    /// An auto-search item failed validation.
    #[error("invalid item: {message}")]
    InvalidItem { message: String },

    /// Failure reported by the download queue.
    #[error("queue error: {message}")]
    Queue { message: String },

    /// Failure while reading or writing the item store.
    #[error("persistence error: {message}")]
    Persistence { message: String },
}

impl Error {
    /// Shorthand for a [`Error::Parse`] with a formatted message.
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
        }
    }

    /// Returns true if this error only affects a single search result
    /// and the caller should continue with the remaining matches.
    pub fn is_per_result(&self) -> bool {
        matches!(self, Error::Queue { .. })
    }
}

/// Convenience result type for halyard operations.
pub type Result<T> = std::result::Result<T, Error>;
