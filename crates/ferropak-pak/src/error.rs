//! Error types for the pak crate.

use ferropak_common::Guid;
use thiserror::Error;

/// Errors that can occur when working with pak containers.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error, including structured parse errors.
    #[error("{0}")]
    Common(#[from] ferropak_common::Error),

    /// No footer candidate carried the container magic.
    #[error("{archive}: corrupt footer: {reason}")]
    CorruptFooter { archive: String, reason: String },

    /// Sentinel or count mismatch inside an index.
    #[error("{archive}: corrupt index: {reason}")]
    CorruptIndex { archive: String, reason: String },

    /// The supplied key decrypts the index to garbage.
    #[error("{archive}: the provided encryption key doesn't work")]
    InvalidKey { archive: String },

    /// Encrypted data was encountered but no key was supplied.
    #[error("{archive}: missing encryption key for GUID {guid}")]
    MissingKey { archive: String, guid: Guid },

    /// Malformed key material.
    #[error("invalid AES key: {0}")]
    KeyFormat(String),

    /// Compression method tag with no known meaning.
    #[error("unknown compression method \"{0}\"")]
    UnknownCompressionMethod(String),

    /// Known compression method whose backend could not be provided.
    #[error("compression backend for {method} is unavailable: {reason}")]
    CodecUnavailable { method: String, reason: String },

    /// A codec backend rejected its input or overflowed its output.
    #[error("{method} decompression failed: {reason}")]
    Decompression { method: String, reason: String },

    /// A codec backend failed to compress.
    #[error("{method} compression failed: {reason}")]
    Compression { method: String, reason: String },

    /// Block cipher precondition violated.
    #[error("cipher error: {0}")]
    Cipher(String),

    /// Writer was configured with a combination the target version cannot express.
    #[error("unsupported writer configuration: {0}")]
    Unsupported(String),

    /// Entry not found.
    #[error("entry not found: {0}")]
    EntryNotFound(String),
}

impl Error {
    /// Returns `true` if the supplied key was rejected.
    pub fn is_invalid_key(&self) -> bool {
        matches!(self, Self::InvalidKey { .. })
    }

    /// Returns `true` if supplying a (different) key could make the operation succeed.
    pub fn is_recoverable_by_key(&self) -> bool {
        matches!(self, Self::InvalidKey { .. } | Self::MissingKey { .. })
    }

    pub(crate) fn corrupt_index(archive: &str, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            archive: archive.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for pak operations.
pub type Result<T> = std::result::Result<T, Error>;
