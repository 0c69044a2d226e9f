//! Error types for the mount layer.

use thiserror::Error;

/// Errors that can occur when working with mounted containers.
#[derive(Debug, Error)]
pub enum Error {
    /// Container-level error.
    #[error(transparent)]
    Pak(#[from] ferropak_pak::Error),

    /// Common library error.
    #[error(transparent)]
    Common(#[from] ferropak_common::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No mounted container provides the path.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Bulk extraction was cancelled before the file was read.
    #[error("extraction cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` if supplying a (different) key could make the operation succeed.
    pub fn is_recoverable_by_key(&self) -> bool {
        matches!(self, Self::Pak(e) if e.is_recoverable_by_key())
    }
}

/// Result type for mount layer operations.
pub type Result<T> = std::result::Result<T, Error>;
