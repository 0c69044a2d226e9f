//! Common utilities for ferropak.
//!
//! This crate provides foundational types used across all ferropak crates:
//!
//! - [`ByteArchive`] - bounds-checked, versioned binary reading over shared bytes
//! - [`ArchiveWriter`] - the matching little-endian writer
//! - [`ArchiveVersions`] / [`Game`] - version context selecting layout variants
//! - [`Guid`] - 128-bit key identifiers
//! - [`ShaHash`] - 20-byte SHA-1 digests

mod error;
mod guid;
mod hash;
mod reader;
mod versions;
mod writer;

pub use error::{Error, Result};
pub use guid::Guid;
pub use hash::ShaHash;
pub use reader::{ArchiveSource, ByteArchive};
pub use versions::{ArchiveVersions, Game};
pub use writer::ArchiveWriter;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
