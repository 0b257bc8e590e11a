use std::io;

use thiserror::Error;
use tracing::warn;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IavlError>;

/// Errors surfaced by the tree, the node pool, and the storage backends.
///
/// A missing key is never an error: lookups return `None` and removals
/// report `false`. [`IavlError::NotFound`] is reserved for ids, node keys,
/// and versions that the caller expected to exist.
#[derive(Debug, Error)]
pub enum IavlError {
    /// A node id, node key, or version could not be resolved.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The durable layer failed to read or write.
    #[error("storage I/O: {0}")]
    Io(#[from] io::Error),
    /// SQLite reported an error.
    #[error("storage sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A persisted record could not be decoded.
    #[error("corruption: {0}")]
    Corruption(String),
    /// A stored hash or a structural invariant failed verification.
    #[error("consistency: {0}")]
    Consistency(String),
    /// The caller violated an API contract.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Configuration could not be parsed or applied.
    #[error("config: {0}")]
    Config(String),
}

impl IavlError {
    /// Returns true for errors raised by the durable layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, IavlError::Io(_) | IavlError::Sqlite(_))
    }

    /// Returns true when the error reports a missing id, node, or version.
    pub fn is_not_found(&self) -> bool {
        matches!(self, IavlError::NotFound(_))
    }

    pub(crate) fn consistency(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        warn!(reason = %msg, "tree.consistency.failed");
        IavlError::Consistency(msg)
    }
}

impl From<toml::de::Error> for IavlError {
    fn from(err: toml::de::Error) -> Self {
        IavlError::Config(err.to_string())
    }
}
