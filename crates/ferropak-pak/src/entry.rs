//! Pak entry metadata.
//!
//! An entry is stored in up to three shapes: the inline record used by flat
//! indices (and repeated in front of every payload), the bit-packed record of
//! the path-hash index, and the fixed-stride record of a frozen index. All of
//! them decode into [`PakEntry`] with absolute block offsets.

use std::io::Write;

use ferropak_common::{ArchiveWriter, ByteArchive, ShaHash};

use crate::compression::CompressionMethod;
use crate::crypto::{align, AES_BLOCK_SIZE};
use crate::footer::{PakFooter, PakVersion};
use crate::frozen::{FrozenArchive, ARRAY_HEADER_SIZE};
use crate::{Error, Result};

/// Entry flag: payload is encrypted.
pub const FLAG_ENCRYPTED: u8 = 0x01;
/// Entry flag: entry is a deletion record.
pub const FLAG_DELETED: u8 = 0x02;

/// Stride of one entry record in a frozen index.
pub const FROZEN_ENTRY_SIZE: u64 = 80;

/// One compressed block, in absolute file offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressedBlock {
    pub start: i64,
    pub size: i64,
}

impl CompressedBlock {
    #[inline]
    pub fn end(&self) -> i64 {
        self.start + self.size
    }
}

/// Metadata for one packaged file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PakEntry {
    /// Full path, mount point included.
    pub path: String,
    /// Offset of the in-data header that precedes the payload.
    pub offset: i64,
    /// Stored (compressed) size.
    pub size: i64,
    pub uncompressed_size: i64,
    pub compression_method: CompressionMethod,
    pub compression_blocks: Vec<CompressedBlock>,
    /// Nominal uncompressed size of every block but the last.
    pub compression_block_size: u32,
    pub is_encrypted: bool,
    pub is_deleted: bool,
    /// Size of the in-data header.
    pub struct_size: u32,
    /// SHA-1 of the stored bytes.
    pub hash: ShaHash,
}

impl PakEntry {
    /// Serialized size of an inline record.
    pub fn serialized_size(version: PakVersion, compressed: bool, block_count: usize) -> u32 {
        // offset, size, uncompressed size, method, hash
        let mut size = 8 * 3 + 4 + 20;
        if version < PakVersion::NO_TIMESTAMPS {
            size += 8;
        }
        if version >= PakVersion::COMPRESSION_ENCRYPTION {
            if compressed {
                size += 4 + 16 * block_count as u32;
            }
            // flags, block size
            size += 1 + 4;
        }
        size
    }

    /// Offset of the first payload byte.
    #[inline]
    pub fn data_offset(&self) -> i64 {
        self.offset.saturating_add(i64::from(self.struct_size))
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        !self.compression_method.is_none()
    }

    /// Whether the entry is a deletion record that carries no data.
    #[inline]
    pub fn is_deleted_stub(&self) -> bool {
        self.is_deleted && self.size == 0
    }

    /// Read an inline record.
    pub fn read_inline(ar: &mut ByteArchive, footer: &PakFooter) -> Result<Self> {
        let version = footer.version;

        let offset = ar.read_i64()?;
        let size = ar.read_i64()?;
        let uncompressed_size = ar.read_i64()?;

        let raw_method = ar.read_u32()?;
        let compression_method = if version < PakVersion::FNAME_BASED_COMPRESSION_METHOD {
            CompressionMethod::from_legacy_flags(raw_method)
        } else {
            footer.method(raw_method)
        };

        if version < PakVersion::NO_TIMESTAMPS {
            let _timestamp = ar.read_i64()?;
        }
        let hash = ShaHash::read(ar)?;

        let mut compression_blocks = Vec::new();
        let mut flags = 0;
        let mut compression_block_size = 0;
        if version >= PakVersion::COMPRESSION_ENCRYPTION {
            if !compression_method.is_none() {
                let base = if version >= PakVersion::RELATIVE_CHUNK_OFFSETS {
                    offset
                } else {
                    0
                };
                compression_blocks = ar.read_counted_array(|ar| {
                    let start = ar.read_i64()?;
                    let end = ar.read_i64()?;
                    match (base.checked_add(start), end.checked_sub(start)) {
                        (Some(start), Some(size)) => Ok(CompressedBlock { start, size }),
                        _ => Err(ar.error(format!("compression block ({start}, {end}) overflows"))),
                    }
                })?;
            }
            flags = ar.read_u8()?;
            compression_block_size = ar.read_u32()?;
        }

        let struct_size = Self::serialized_size(
            version,
            !compression_method.is_none(),
            compression_blocks.len(),
        );

        Ok(Self {
            path: String::new(),
            offset,
            size,
            uncompressed_size,
            compression_method,
            compression_blocks,
            compression_block_size,
            is_encrypted: flags & FLAG_ENCRYPTED != 0,
            is_deleted: flags & FLAG_DELETED != 0,
            struct_size,
            hash,
        })
    }

    /// Decode a bit-packed record from the path-hash index entry blob.
    pub fn decode_encoded(ar: &mut ByteArchive, footer: &PakFooter) -> Result<Self> {
        let bits = ar.read_u32()?;

        let method_index = (bits >> 23) & 0x3f;
        let compression_method = footer.method(method_index);

        let offset = if bits & (1 << 31) != 0 {
            i64::from(ar.read_u32()?)
        } else {
            ar.read_i64()?
        };
        let uncompressed_size = if bits & (1 << 30) != 0 {
            i64::from(ar.read_u32()?)
        } else {
            ar.read_i64()?
        };
        let size = if method_index != 0 {
            if bits & (1 << 29) != 0 {
                i64::from(ar.read_u32()?)
            } else {
                ar.read_i64()?
            }
        } else {
            uncompressed_size
        };

        let is_encrypted = bits & (1 << 22) != 0;
        let block_count = ((bits >> 6) & 0xffff) as usize;

        let mut compression_block_size = bits & 0x3f;
        if compression_block_size == 0x3f {
            compression_block_size = ar.read_u32()?;
        } else {
            compression_block_size <<= 11;
        }
        if uncompressed_size >= 0 && i64::from(compression_block_size) > uncompressed_size {
            compression_block_size = uncompressed_size as u32;
        }

        let struct_size = Self::serialized_size(footer.version, method_index != 0, block_count);

        let data_offset = offset
            .checked_add(i64::from(struct_size))
            .ok_or_else(|| ar.error(format!("entry offset {offset} overflows")))?;

        let mut compression_blocks = Vec::with_capacity(block_count.min(ar.remaining() / 4 + 1));
        if block_count == 1 && !is_encrypted {
            compression_blocks.push(CompressedBlock {
                start: data_offset,
                size,
            });
        } else if block_count > 0 {
            let alignment = if is_encrypted { AES_BLOCK_SIZE as u64 } else { 1 };
            let mut cursor = data_offset;
            for _ in 0..block_count {
                let block_size = ar.read_u32()?;
                compression_blocks.push(CompressedBlock {
                    start: cursor,
                    size: i64::from(block_size),
                });
                cursor = cursor
                    .checked_add(align(u64::from(block_size), alignment) as i64)
                    .ok_or_else(|| ar.error("compression blocks run past the addressable range"))?;
            }
        }

        Ok(Self {
            path: String::new(),
            offset,
            size,
            uncompressed_size,
            compression_method,
            compression_blocks,
            compression_block_size,
            is_encrypted,
            is_deleted: false,
            struct_size,
            hash: ShaHash::default(),
        })
    }

    /// Read one fixed-stride record of a frozen index.
    pub fn read_frozen(fa: &mut FrozenArchive, footer: &PakFooter) -> Result<Self> {
        let start = fa.position();
        let ar = fa.archive();
        let offset = ar.read_i64()?;
        let size = ar.read_i64()?;
        let uncompressed_size = ar.read_i64()?;
        let hash = ShaHash::read(ar)?;
        ar.advance(4);

        let compression_blocks = fa.read_array(16, |fa| {
            let ar = fa.archive();
            let block_start = ar.read_i64()?;
            let block_end = ar.read_i64()?;
            match (offset.checked_add(block_start), block_end.checked_sub(block_start)) {
                (Some(start), Some(size)) => Ok(CompressedBlock { start, size }),
                _ => Err(ar
                    .error(format!("compression block ({block_start}, {block_end}) overflows"))
                    .into()),
            }
        })?;

        let ar = fa.archive();
        let compression_block_size = ar.read_u32()?;
        let method_index = ar.read_u32()?;
        let flags = ar.read_u8()?;
        debug_assert_eq!(ar.position(), start + 48 + ARRAY_HEADER_SIZE + 9);
        fa.seek(start + FROZEN_ENTRY_SIZE);

        let compression_method = footer.method(method_index);
        let struct_size = Self::serialized_size(
            footer.version,
            !compression_method.is_none(),
            compression_blocks.len(),
        );

        Ok(Self {
            path: String::new(),
            offset,
            size,
            uncompressed_size,
            compression_method,
            compression_blocks,
            compression_block_size,
            is_encrypted: flags & FLAG_ENCRYPTED != 0,
            is_deleted: flags & FLAG_DELETED != 0,
            struct_size,
            hash,
        })
    }

    /// Write the inline record.
    ///
    /// `method_value` is the method-table index (or legacy flags for old
    /// versions). Block offsets are written relative to the entry offset when
    /// the version calls for it.
    pub fn write_inline<W: Write>(
        &self,
        w: &mut ArchiveWriter<W>,
        version: PakVersion,
        method_value: u32,
    ) -> Result<()> {
        w.write_i64(self.offset)?;
        w.write_i64(self.size)?;
        w.write_i64(self.uncompressed_size)?;
        w.write_u32(method_value)?;
        if version < PakVersion::NO_TIMESTAMPS {
            w.write_i64(0)?;
        }
        w.write_hash(&self.hash)?;

        if version >= PakVersion::COMPRESSION_ENCRYPTION {
            if self.is_compressed() {
                let base = if version >= PakVersion::RELATIVE_CHUNK_OFFSETS {
                    self.offset
                } else {
                    0
                };
                w.write_i32(self.compression_blocks.len() as i32)?;
                for block in &self.compression_blocks {
                    w.write_i64(block.start - base)?;
                    w.write_i64(block.end() - base)?;
                }
            }
            let mut flags = 0;
            if self.is_encrypted {
                flags |= FLAG_ENCRYPTED;
            }
            if self.is_deleted {
                flags |= FLAG_DELETED;
            }
            w.write_u8(flags)?;
            w.write_u32(self.compression_block_size)?;
        } else if self.is_encrypted || !self.compression_blocks.is_empty() {
            return Err(Error::Unsupported(format!(
                "version {version} cannot store compression blocks or encryption"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferropak_common::Guid;

    fn footer(version: PakVersion) -> PakFooter {
        PakFooter {
            key_guid: Guid::EMPTY,
            index_encrypted: false,
            version,
            index_offset: 0,
            index_size: 0,
            index_hash: ShaHash::default(),
            index_frozen: false,
            compression_methods: vec![
                CompressionMethod::None,
                CompressionMethod::Zlib,
                CompressionMethod::Zstd,
            ],
            method_slots: 5,
        }
    }

    fn compressed_entry() -> PakEntry {
        PakEntry {
            path: String::new(),
            offset: 0x1000,
            size: 300,
            uncompressed_size: 0x18000,
            compression_method: CompressionMethod::Zlib,
            compression_blocks: vec![
                CompressedBlock { start: 0x1000 + 89, size: 200 },
                CompressedBlock { start: 0x1000 + 289, size: 100 },
            ],
            compression_block_size: 0x10000,
            is_encrypted: false,
            is_deleted: false,
            struct_size: 89,
            hash: ShaHash::of(b"payload"),
        }
    }

    #[test]
    fn test_serialized_size() {
        assert_eq!(PakEntry::serialized_size(PakVersion::INITIAL, false, 0), 56);
        assert_eq!(PakEntry::serialized_size(PakVersion::NO_TIMESTAMPS, false, 0), 48);
        assert_eq!(PakEntry::serialized_size(PakVersion::PATH_HASH_INDEX, false, 0), 53);
        assert_eq!(PakEntry::serialized_size(PakVersion::PATH_HASH_INDEX, true, 2), 53 + 4 + 32);
    }

    #[test]
    fn test_inline_roundtrip_relative_blocks() {
        let f = footer(PakVersion::FNAME_BASED_COMPRESSION_METHOD);
        let entry = compressed_entry();

        let mut w = ArchiveWriter::new(Vec::new());
        entry.write_inline(&mut w, f.version, 1).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), entry.struct_size as usize);

        // first block start is stored relative to the entry offset
        let first_start = i64::from_le_bytes(bytes[52..60].try_into().unwrap());
        assert_eq!(first_start, 89);

        let mut ar = ByteArchive::from_bytes("entry", bytes);
        let parsed = PakEntry::read_inline(&mut ar, &f).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_inline_absolute_blocks_before_relative_offsets() {
        let f = footer(PakVersion::INDEX_ENCRYPTION);
        let entry = compressed_entry();

        let mut w = ArchiveWriter::new(Vec::new());
        entry.write_inline(&mut w, f.version, CompressionMethod::FLAG_ZLIB).unwrap();
        let mut ar = ByteArchive::from_bytes("entry", w.into_inner());
        let parsed = PakEntry::read_inline(&mut ar, &f).unwrap();
        assert_eq!(parsed.compression_blocks, entry.compression_blocks);
        assert_eq!(parsed.compression_method, CompressionMethod::Zlib);
    }

    #[test]
    fn test_deleted_flag() {
        let f = footer(PakVersion::DELETE_RECORDS);
        let entry = PakEntry {
            is_deleted: true,
            struct_size: 53,
            ..PakEntry::default()
        };
        let mut w = ArchiveWriter::new(Vec::new());
        entry.write_inline(&mut w, f.version, 0).unwrap();
        let mut ar = ByteArchive::from_bytes("entry", w.into_inner());
        let parsed = PakEntry::read_inline(&mut ar, &f).unwrap();
        assert!(parsed.is_deleted_stub());
    }

    #[test]
    fn test_decode_encoded_single_block() {
        let f = footer(PakVersion::FNV64_BUG_FIX);
        // 32-bit offset/uncompressed/size, method 1, one block, block size 64 KiB
        let bits: u32 = (1 << 31) | (1 << 30) | (1 << 29) | (1 << 23) | (1 << 6) | (0x10000 >> 11);
        let mut data = bits.to_le_bytes().to_vec();
        data.extend_from_slice(&0x2000u32.to_le_bytes());
        data.extend_from_slice(&5000u32.to_le_bytes());
        data.extend_from_slice(&1200u32.to_le_bytes());
        let mut ar = ByteArchive::from_bytes("encoded", data);

        let entry = PakEntry::decode_encoded(&mut ar, &f).unwrap();
        assert_eq!(entry.offset, 0x2000);
        assert_eq!(entry.uncompressed_size, 5000);
        assert_eq!(entry.size, 1200);
        assert_eq!(entry.compression_method, CompressionMethod::Zlib);
        assert_eq!(entry.compression_block_size, 5000);
        assert_eq!(entry.struct_size, 53 + 4 + 16);
        assert_eq!(
            entry.compression_blocks,
            vec![CompressedBlock { start: 0x2000 + 73, size: 1200 }]
        );
        assert!(ar.is_empty());
    }

    #[test]
    fn test_decode_encoded_encrypted_blocks_are_aligned() {
        let f = footer(PakVersion::FNV64_BUG_FIX);
        let bits: u32 = (1 << 31) | (1 << 30) | (1 << 29) | (2 << 23) | (1 << 22) | (2 << 6) | 0x3f;
        let mut data = bits.to_le_bytes().to_vec();
        data.extend_from_slice(&0x100u32.to_le_bytes());
        data.extend_from_slice(&0x30000u32.to_le_bytes());
        data.extend_from_slice(&50u32.to_le_bytes());
        data.extend_from_slice(&0x20000u32.to_le_bytes());
        data.extend_from_slice(&30u32.to_le_bytes());
        data.extend_from_slice(&20u32.to_le_bytes());
        let mut ar = ByteArchive::from_bytes("encoded", data);

        let entry = PakEntry::decode_encoded(&mut ar, &f).unwrap();
        assert!(entry.is_encrypted);
        assert_eq!(entry.compression_method, CompressionMethod::Zstd);
        assert_eq!(entry.compression_block_size, 0x20000);
        let first = entry.data_offset();
        assert_eq!(
            entry.compression_blocks,
            vec![
                CompressedBlock { start: first, size: 30 },
                CompressedBlock { start: first + 32, size: 20 },
            ]
        );
    }

    #[test]
    fn test_decode_encoded_uncompressed_64bit() {
        let f = footer(PakVersion::PATH_HASH_INDEX);
        let bits: u32 = 0;
        let mut data = bits.to_le_bytes().to_vec();
        data.extend_from_slice(&0x1_0000_0000i64.to_le_bytes());
        data.extend_from_slice(&42i64.to_le_bytes());
        let mut ar = ByteArchive::from_bytes("encoded", data);

        let entry = PakEntry::decode_encoded(&mut ar, &f).unwrap();
        assert_eq!(entry.offset, 0x1_0000_0000);
        assert_eq!(entry.size, 42);
        assert_eq!(entry.uncompressed_size, 42);
        assert!(entry.compression_blocks.is_empty());
        assert_eq!(entry.data_offset(), 0x1_0000_0000 + 53);
    }

    #[test]
    fn test_decode_encoded_offset_overflow() {
        let f = footer(PakVersion::PATH_HASH_INDEX);
        let mut data = 0u32.to_le_bytes().to_vec();
        data.extend_from_slice(&(i64::MAX - 10).to_le_bytes());
        data.extend_from_slice(&42i64.to_le_bytes());
        let mut ar = ByteArchive::from_bytes("encoded", data);

        assert!(PakEntry::decode_encoded(&mut ar, &f).is_err());
    }

    #[test]
    fn test_inline_block_overflow() {
        let f = footer(PakVersion::FNAME_BASED_COMPRESSION_METHOD);
        let mut data = Vec::new();
        data.extend_from_slice(&i64::MAX.to_le_bytes());
        data.extend_from_slice(&16i64.to_le_bytes());
        data.extend_from_slice(&16i64.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&[0u8; 20]);
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&100i64.to_le_bytes());
        data.extend_from_slice(&116i64.to_le_bytes());
        data.push(0);
        data.extend_from_slice(&0x10000u32.to_le_bytes());
        let mut ar = ByteArchive::from_bytes("inline", data);

        let err = PakEntry::read_inline(&mut ar, &f).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");
    }
}
