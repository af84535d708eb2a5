//! Query construction errors.

use snapq_core::{CommitIdError, FilterError, SerializationError};

/// Errors raised before any query reaches the store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    /// Malformed filter or query parameters
    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),
    /// Property value could not be encoded
    #[error("serialization failure: {0}")]
    Serialization(#[from] SerializationError),
    /// Commit id has no exact numeric form
    #[error(transparent)]
    InvalidCommitId(#[from] CommitIdError),
    /// Schema or prefix is not a plain SQL identifier
    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),
    /// Property name cannot be expressed as a JSON path label
    #[error("unsupported property name: {0:?}")]
    UnsupportedPropertyName(String),
    /// Numeric argument exceeds the store's integer range
    #[error("{what} out of range: {value}")]
    ValueOutOfRange {
        /// Argument name
        what: &'static str,
        /// Rejected value
        value: u64,
    },
}
