//! Ferropak - pak container reading, writing and mounting.
//!
//! This crate provides a unified interface to the ferropak crates.
//!
//! # Crates
//!
//! - [`ferropak_common`] - Binary reading and writing, GUIDs, hashes, version context
//! - [`ferropak_pak`] - Single containers (footer, index encodings, AES, block compression, writer)
//! - [`ferropak_vfs`] - Mount layer with key management and read-order resolution
//!
//! # Example
//!
//! ```no_run
//! use ferropak::prelude::*;
//!
//! let mut provider = FileProvider::new(ProviderConfig::default());
//! provider.register_container("pakchunk0-Windows.pak")?;
//! provider.submit_key(
//!     "00000000000000000000000000000000".parse()?,
//!     "0".repeat(64).parse()?,
//! );
//!
//! if let Some(entry) = provider.lookup("Game/Config/DefaultGame.ini") {
//!     println!("{} bytes", entry.uncompressed_size);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export all sub-crates
pub use ferropak_common as common;
pub use ferropak_pak as pak;
pub use ferropak_vfs as vfs;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use ferropak_common::{ArchiveVersions, ByteArchive, Game, Guid};
    pub use ferropak_pak::{AesKey, CodecRegistry, CompressionMethod, PakConfig, PakEntry, PakFile, PakWriter, WriterOptions};
    pub use ferropak_vfs::{FileProvider, KeyRegistry, ProviderConfig};
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
