//! Error types for ferropak-common.

use thiserror::Error;

/// Common error type for ferropak operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A malformed or out-of-range field was encountered while reading an archive.
    ///
    /// Always fatal to the read that produced it.
    #[error("{archive} at offset {offset:#x}: {reason}")]
    Parse {
        /// Logical name of the archive being read.
        archive: String,
        /// Byte offset at which the failing read started.
        offset: u64,
        /// Human-readable description of the failure.
        reason: String,
    },

    /// Product tag that names no known title.
    #[error("unknown game tag \"{0}\"")]
    UnknownGame(String),

    /// Invalid GUID format.
    #[error("invalid GUID format: {0}")]
    InvalidGuid(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if this is a structured parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
