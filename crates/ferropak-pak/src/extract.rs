//! Payload extraction for a single entry.

use ferropak_common::{ByteArchive, Guid};
use tracing::{trace, warn};

use crate::compression::CodecRegistry;
use crate::crypto::{align, decrypt_if_needed, AesKey, AES_BLOCK_SIZE};
use crate::entry::{CompressedBlock, PakEntry};
use crate::{Error, Result};

/// Reads and reproduces entry payloads from one container.
pub(crate) struct EntryExtractor<'a> {
    pub key_guid: Guid,
    pub key: Option<&'a AesKey>,
    pub codecs: &'a CodecRegistry,
}

impl EntryExtractor<'_> {
    /// Decrypted, decompressed payload of `entry`.
    pub fn extract(&self, ar: &mut ByteArchive, entry: &PakEntry) -> Result<Vec<u8>> {
        let total = usize::try_from(entry.uncompressed_size).map_err(|_| {
            ar.error(format!(
                "{}: negative uncompressed size {}",
                entry.path, entry.uncompressed_size
            ))
        })?;

        if entry.is_compressed() {
            self.extract_blocks(ar, entry, total)
        } else {
            let mut data = self.read_stored(ar, entry, entry.data_offset(), entry.size)?;
            if data.len() < total {
                warn!(
                    "{}: {}: stored {} bytes for {} byte entry",
                    ar.name(),
                    entry.path,
                    data.len(),
                    total
                );
            }
            data.truncate(total);
            Ok(data)
        }
    }

    fn extract_blocks(&self, ar: &mut ByteArchive, entry: &PakEntry, total: usize) -> Result<Vec<u8>> {
        // Containers before block tables store one block right after the header.
        let single;
        let blocks = if entry.compression_blocks.is_empty() {
            single = [CompressedBlock {
                start: entry.data_offset(),
                size: entry.size,
            }];
            &single[..]
        } else {
            &entry.compression_blocks[..]
        };

        let block_size = match entry.compression_block_size as usize {
            0 => total,
            size => size,
        };

        let capacity = blocks.len().checked_mul(block_size).unwrap_or(usize::MAX);
        if total > capacity {
            return Err(ar
                .error(format!(
                    "{}: {} blocks of {} bytes cannot hold {} bytes",
                    entry.path,
                    blocks.len(),
                    block_size,
                    total
                ))
                .into());
        }
        let mut output = Vec::new();
        output.try_reserve_exact(total).map_err(|e| {
            ar.error(format!("{}: cannot allocate {} bytes: {}", entry.path, total, e))
        })?;
        output.resize(total, 0);
        let mut produced = 0;
        for block in blocks {
            if produced >= total {
                break;
            }
            let data = self.read_stored(ar, entry, block.start, block.size)?;
            let contribution = block_size.min(total - produced);
            trace!(
                "{}: block at {:#x}, {} -> {} bytes",
                entry.path,
                block.start,
                data.len(),
                contribution
            );
            self.codecs.decompress(
                &entry.compression_method,
                &data,
                &mut output[produced..produced + contribution],
            )?;
            produced += contribution;
        }

        if produced != total {
            warn!(
                "{}: {}: blocks yield {} of {} bytes",
                ar.name(),
                entry.path,
                produced,
                total
            );
        }
        Ok(output)
    }

    /// Read `size` stored bytes at `offset`, decrypting when the entry is encrypted.
    fn read_stored(&self, ar: &mut ByteArchive, entry: &PakEntry, offset: i64, size: i64) -> Result<Vec<u8>> {
        if offset < 0 || size < 0 {
            return Err(ar
                .error(format!("{}: invalid data range ({offset}, {size})", entry.path))
                .into());
        }
        let stored = if entry.is_encrypted {
            align(size as u64, AES_BLOCK_SIZE as u64)
        } else {
            size as u64
        };
        let data = ar.read_vec_at(offset as u64, stored as usize)?;
        let mut data = decrypt_if_needed(data, entry.is_encrypted, self.key, || Error::MissingKey {
            archive: ar.name().to_string(),
            guid: self.key_guid,
        })?;
        data.truncate(size as usize);
        Ok(data)
    }
}
