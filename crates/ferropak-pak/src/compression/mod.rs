//! Block compression for pak payloads.
//!
//! Entries name their compression method either by index into the footer's
//! method table or, in older containers, by legacy flag bits. The
//! [`CodecRegistry`] maps a [`CompressionMethod`] onto a backend.

mod codec;
mod registry;

use std::fmt;

pub use codec::{Codec, GzipCodec, Lz4Codec, ZlibCodec, ZstdCodec};
pub use registry::{CodecFactory, CodecRegistry};

/// Compression method of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum CompressionMethod {
    /// Stored as-is.
    #[default]
    None,
    Zlib,
    Gzip,
    /// Proprietary codec; needs an externally registered backend.
    Oodle,
    Lz4,
    Zstd,
    /// A tag with no known meaning, kept verbatim for diagnostics.
    Unknown(String),
}

impl CompressionMethod {
    /// Legacy flag bit for zlib.
    pub const FLAG_ZLIB: u32 = 0x01;
    /// Legacy flag bit for gzip.
    pub const FLAG_GZIP: u32 = 0x02;
    /// Legacy flag bit for the custom (Oodle) codec.
    pub const FLAG_CUSTOM: u32 = 0x04;

    /// Resolve a method name as stored in the footer's method table.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Self::None,
            "zlib" => Self::Zlib,
            "gzip" => Self::Gzip,
            "oodle" => Self::Oodle,
            "lz4" => Self::Lz4,
            "zstd" => Self::Zstd,
            _ => Self::Unknown(name.to_string()),
        }
    }

    /// Resolve the per-entry flag word used before method tables existed.
    pub fn from_legacy_flags(flags: u32) -> Self {
        match flags {
            0 => Self::None,
            Self::FLAG_ZLIB => Self::Zlib,
            Self::FLAG_GZIP => Self::Gzip,
            Self::FLAG_CUSTOM => Self::Oodle,
            other => Self::Unknown(format!("flags {other:#x}")),
        }
    }

    /// Inverse of [`from_legacy_flags`](Self::from_legacy_flags).
    pub fn legacy_flags(&self) -> Option<u32> {
        match self {
            Self::None => Some(0),
            Self::Zlib => Some(Self::FLAG_ZLIB),
            Self::Gzip => Some(Self::FLAG_GZIP),
            Self::Oodle => Some(Self::FLAG_CUSTOM),
            _ => None,
        }
    }

    /// Canonical name, as written into method tables.
    pub fn name(&self) -> &str {
        match self {
            Self::None => "None",
            Self::Zlib => "Zlib",
            Self::Gzip => "Gzip",
            Self::Oodle => "Oodle",
            Self::Lz4 => "LZ4",
            Self::Zstd => "Zstd",
            Self::Unknown(tag) => tag,
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Lookup key used by the registry.
    pub(crate) fn registry_key(&self) -> String {
        self.name().to_ascii_lowercase()
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
