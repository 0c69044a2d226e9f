//! Container footer ("pak info").
//!
//! The footer sits at the very end of the file. Its size depends on the
//! format version, so candidate layouts are tried largest first until one
//! has the container magic at the expected spot.

use std::fmt;
use std::io::Write;

use ferropak_common::{ArchiveWriter, ByteArchive, Guid, ShaHash};
use tracing::{trace, warn};

use crate::compression::CompressionMethod;
use crate::{Error, Result};

/// Container format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PakVersion(pub i32);

impl PakVersion {
    pub const INITIAL: Self = Self(1);
    pub const NO_TIMESTAMPS: Self = Self(2);
    pub const COMPRESSION_ENCRYPTION: Self = Self(3);
    pub const INDEX_ENCRYPTION: Self = Self(4);
    pub const RELATIVE_CHUNK_OFFSETS: Self = Self(5);
    pub const DELETE_RECORDS: Self = Self(6);
    pub const ENCRYPTION_KEY_GUID: Self = Self(7);
    pub const FNAME_BASED_COMPRESSION_METHOD: Self = Self(8);
    pub const FROZEN_INDEX: Self = Self(9);
    pub const PATH_HASH_INDEX: Self = Self(10);
    pub const FNV64_BUG_FIX: Self = Self(11);

    /// Newest version this crate understands.
    pub const LATEST: Self = Self::FNV64_BUG_FIX;
}

impl fmt::Display for PakVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One on-disk footer shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FooterLayout {
    size: usize,
    has_guid: bool,
    has_encrypted_flag: bool,
    has_frozen_flag: bool,
    method_slots: usize,
}

impl FooterLayout {
    /// Whether a footer of this shape can carry the given version.
    fn accepts(&self, version: PakVersion) -> bool {
        self.has_guid == (version >= PakVersion::ENCRYPTION_KEY_GUID)
            && self.has_encrypted_flag == (version >= PakVersion::INDEX_ENCRYPTION)
            && self.has_frozen_flag == (version == PakVersion::FROZEN_INDEX)
            && (self.method_slots > 0) == (version >= PakVersion::FNAME_BASED_COMPRESSION_METHOD)
            && (self.method_slots != 4 || version == PakVersion::FNAME_BASED_COMPRESSION_METHOD)
    }
}

/// Footer shapes, largest first.
const LAYOUTS: [FooterLayout; 6] = [
    // frozen index: frozen flag plus five method names
    FooterLayout { size: 222, has_guid: true, has_encrypted_flag: true, has_frozen_flag: true, method_slots: 5 },
    // method names, five slots
    FooterLayout { size: 221, has_guid: true, has_encrypted_flag: true, has_frozen_flag: false, method_slots: 5 },
    // method names, early four-slot layout
    FooterLayout { size: 189, has_guid: true, has_encrypted_flag: true, has_frozen_flag: false, method_slots: 4 },
    // encryption key GUID
    FooterLayout { size: 61, has_guid: true, has_encrypted_flag: true, has_frozen_flag: false, method_slots: 0 },
    // index encryption
    FooterLayout { size: 45, has_guid: false, has_encrypted_flag: true, has_frozen_flag: false, method_slots: 0 },
    FooterLayout { size: 44, has_guid: false, has_encrypted_flag: false, has_frozen_flag: false, method_slots: 0 },
];

/// Bytes per method name slot.
pub const METHOD_NAME_SIZE: usize = 32;

/// Parsed container footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PakFooter {
    /// GUID of the key protecting this container (empty for the default key).
    pub key_guid: Guid,
    /// Whether the index is encrypted.
    pub index_encrypted: bool,
    pub version: PakVersion,
    pub index_offset: i64,
    pub index_size: i64,
    /// SHA-1 of the plaintext index.
    pub index_hash: ShaHash,
    /// Whether the index is a frozen memory image.
    pub index_frozen: bool,
    /// Method table. Slot 0 is always [`CompressionMethod::None`].
    pub compression_methods: Vec<CompressionMethod>,
    /// Number of method name slots on disk.
    pub method_slots: usize,
}

impl PakFooter {
    /// Magic number preceding the version field.
    pub const MAGIC: u32 = 0x5A6F12E1;

    /// Read the footer from the end of the archive.
    pub fn read(ar: &mut ByteArchive) -> Result<Self> {
        let len = ar.len();

        for layout in LAYOUTS {
            if len < layout.size as u64 {
                continue;
            }
            let start = len - layout.size as u64;
            let magic_at = start
                + if layout.has_guid { Guid::SIZE as u64 } else { 0 }
                + u64::from(layout.has_encrypted_flag);
            ar.seek(magic_at);
            if ar.read_u32()? != Self::MAGIC {
                continue;
            }
            // A shorter footer can look like a longer one preceded by stray bytes.
            if !layout.accepts(PakVersion(ar.read_i32()?)) {
                continue;
            }

            trace!("{}: footer layout of {} bytes", ar.name(), layout.size);
            ar.seek(start);
            return Self::read_layout(ar, layout);
        }

        Err(Error::CorruptFooter {
            archive: ar.name().to_string(),
            reason: format!("no footer with magic {:#010x} found", Self::MAGIC),
        })
    }

    fn read_layout(ar: &mut ByteArchive, layout: FooterLayout) -> Result<Self> {
        let key_guid = if layout.has_guid {
            Guid::read(ar)?
        } else {
            Guid::EMPTY
        };
        let index_encrypted = layout.has_encrypted_flag && ar.read_u8()? != 0;
        let _magic = ar.read_u32()?;
        let version = PakVersion(ar.read_i32()?);
        let index_offset = ar.read_i64()?;
        let index_size = ar.read_i64()?;
        let index_hash = ShaHash::read(ar)?;
        let index_frozen = layout.has_frozen_flag && ar.read_u8()? != 0;

        if version > PakVersion::LATEST {
            warn!(
                "Pak file \"{}\" has unsupported version {}",
                ar.name(),
                version
            );
        }

        let mut compression_methods = vec![CompressionMethod::None];
        for _ in 0..layout.method_slots {
            let raw = ar.read_array_of::<METHOD_NAME_SIZE>()?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            let name = String::from_utf8_lossy(&raw[..end]);
            if !name.is_empty() {
                compression_methods.push(CompressionMethod::from_name(&name));
            }
        }

        let footer = Self {
            key_guid,
            index_encrypted,
            version,
            index_offset,
            index_size,
            index_hash,
            index_frozen,
            compression_methods,
            method_slots: layout.method_slots,
        };
        footer.validate(ar)?;
        Ok(footer)
    }

    fn validate(&self, ar: &ByteArchive) -> Result<()> {
        let corrupt = |reason: String| Error::CorruptFooter {
            archive: ar.name().to_string(),
            reason,
        };

        if self.version < PakVersion::INITIAL {
            return Err(corrupt(format!("invalid version {}", self.version)));
        }
        if self.index_offset < 0 || self.index_size < 0 {
            return Err(corrupt(format!(
                "negative index location ({}, {})",
                self.index_offset, self.index_size
            )));
        }
        let end = self.index_offset as u64 + self.index_size as u64;
        if end > ar.len() {
            return Err(corrupt(format!(
                "index range {:#x}..{:#x} exceeds file length {:#x}",
                self.index_offset,
                end,
                ar.len()
            )));
        }
        Ok(())
    }

    /// Serialized size of this footer.
    pub fn serialized_size(&self) -> usize {
        let mut size = 44;
        if self.version >= PakVersion::INDEX_ENCRYPTION {
            size += 1;
        }
        if self.version >= PakVersion::ENCRYPTION_KEY_GUID {
            size += Guid::SIZE;
        }
        if self.version == PakVersion::FROZEN_INDEX {
            size += 1;
        }
        size + self.method_slots * METHOD_NAME_SIZE
    }

    /// Resolve a method-table index.
    pub fn method(&self, index: u32) -> CompressionMethod {
        self.compression_methods
            .get(index as usize)
            .cloned()
            .unwrap_or_else(|| CompressionMethod::Unknown(format!("method index {index}")))
    }

    /// Write the footer in the layout implied by its version.
    pub fn write<W: Write>(&self, w: &mut ArchiveWriter<W>) -> Result<()> {
        if self.version >= PakVersion::ENCRYPTION_KEY_GUID {
            w.write_guid(&self.key_guid)?;
        }
        if self.version >= PakVersion::INDEX_ENCRYPTION {
            w.write_flag(self.index_encrypted)?;
        }
        w.write_u32(Self::MAGIC)?;
        w.write_i32(self.version.0)?;
        w.write_i64(self.index_offset)?;
        w.write_i64(self.index_size)?;
        w.write_hash(&self.index_hash)?;
        if self.version == PakVersion::FROZEN_INDEX {
            w.write_flag(self.index_frozen)?;
        }

        let names = self.compression_methods.iter().skip(1);
        if names.len() > self.method_slots {
            return Err(Error::Unsupported(format!(
                "{} compression methods do not fit {} footer slots",
                names.len(),
                self.method_slots
            )));
        }
        for slot in 0..self.method_slots {
            let mut raw = [0u8; METHOD_NAME_SIZE];
            if let Some(method) = self.compression_methods.get(slot + 1) {
                let name = method.name().as_bytes();
                let n = name.len().min(METHOD_NAME_SIZE - 1);
                raw[..n].copy_from_slice(&name[..n]);
            }
            w.write_bytes(&raw)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn footer(version: PakVersion, method_slots: usize) -> PakFooter {
        let mut compression_methods = vec![CompressionMethod::None];
        if method_slots > 0 {
            compression_methods.push(CompressionMethod::Zlib);
            compression_methods.push(CompressionMethod::Zstd);
        }
        PakFooter {
            key_guid: if version >= PakVersion::ENCRYPTION_KEY_GUID {
                Guid::new(1, 2, 3, 4)
            } else {
                Guid::EMPTY
            },
            index_encrypted: false,
            version,
            index_offset: 0,
            index_size: 16,
            index_hash: ShaHash::of(b"index"),
            index_frozen: version == PakVersion::FROZEN_INDEX,
            compression_methods,
            method_slots,
        }
    }

    fn with_padding(f: &PakFooter) -> ByteArchive {
        let mut w = ArchiveWriter::new(vec![0xCCu8; 16]);
        f.write(&mut w).unwrap();
        ByteArchive::from_bytes("footer.pak", w.into_inner())
    }

    #[test]
    fn test_footer_layouts_roundtrip() {
        for (version, slots) in [
            (PakVersion::INITIAL, 0),
            (PakVersion::INDEX_ENCRYPTION, 0),
            (PakVersion::ENCRYPTION_KEY_GUID, 0),
            (PakVersion::FNAME_BASED_COMPRESSION_METHOD, 4),
            (PakVersion::FNAME_BASED_COMPRESSION_METHOD, 5),
            (PakVersion::FROZEN_INDEX, 5),
            (PakVersion::FNV64_BUG_FIX, 5),
        ] {
            let expected = footer(version, slots);
            let mut ar = with_padding(&expected);
            assert_eq!(ar.len() as usize, 16 + expected.serialized_size());

            let parsed = PakFooter::read(&mut ar).unwrap();
            assert_eq!(parsed, expected, "version {version}, {slots} slots");
        }
    }

    #[test]
    fn test_method_lookup() {
        let f = footer(PakVersion::PATH_HASH_INDEX, 5);
        assert_eq!(f.method(0), CompressionMethod::None);
        assert_eq!(f.method(2), CompressionMethod::Zstd);
        assert!(matches!(f.method(9), CompressionMethod::Unknown(_)));
    }

    #[test]
    fn test_missing_magic() {
        let mut ar = ByteArchive::from_bytes("junk.pak", vec![0u8; 300]);
        assert!(matches!(
            PakFooter::read(&mut ar),
            Err(Error::CorruptFooter { .. })
        ));
    }

    #[test]
    fn test_index_out_of_range() {
        let mut f = footer(PakVersion::PATH_HASH_INDEX, 5);
        f.index_offset = 1_000_000;
        let mut ar = with_padding(&f);
        assert!(matches!(
            PakFooter::read(&mut ar),
            Err(Error::CorruptFooter { .. })
        ));
    }
}
