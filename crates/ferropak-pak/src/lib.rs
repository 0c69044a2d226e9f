//! Pak container reader and writer.
//!
//! A pak container is a flat concatenation of file payloads followed by an
//! index and a fixed-size footer. This crate supports:
//!
//! - Format versions 1 through 11 with version-gated footer and entry layouts
//! - Flat, path-hash and frozen (memory image) index encodings
//! - AES-256-ECB encrypted indices and payloads
//! - Per-block compression through pluggable codecs (zlib, gzip, zstd, LZ4)
//! - Re-serialization through the flat index writer
//!
//! # Example
//!
//! ```no_run
//! use ferropak_pak::{PakConfig, PakFile};
//!
//! let mut pak = PakFile::open("Game-WindowsNoEditor.pak", PakConfig::default())?;
//! pak.mount(None)?;
//!
//! for entry in pak.entries() {
//!     println!("{}: {} bytes", entry.path, entry.uncompressed_size);
//! }
//!
//! let data = pak.extract("Game/Config/DefaultGame.ini")?;
//! # Ok::<(), ferropak_pak::Error>(())
//! ```

pub mod compression;
mod crypto;
mod entry;
mod error;
mod extract;
mod footer;
mod frozen;
pub mod index;
mod pak;
mod writer;

pub use compression::{Codec, CodecRegistry, CompressionMethod};
pub use crypto::{align, align_buffer, AesKey, AES_BLOCK_SIZE};
pub use entry::{CompressedBlock, PakEntry};
pub use error::{Error, Result};
pub use footer::{PakFooter, PakVersion};
pub use frozen::{FrozenArchive, FrozenPtr};
pub use index::{IndexFormat, ParsedIndex, PathIndex};
pub use pak::{PakConfig, PakFile, MAX_MOUNT_POINT_TEST_LENGTH};
pub use writer::{PakWriter, WriterOptions, PLACEHOLDER_MARKER};
