//! Container serialization.
//!
//! Files are written in insertion order, each preceded by its inline record,
//! followed by a flat index and the footer. Only the flat index encoding is
//! produced; the mount point is always recomputed from the file paths.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use ferropak_common::{ArchiveWriter, Guid, ShaHash};
use tracing::{debug, info};

use crate::compression::{CodecRegistry, CompressionMethod};
use crate::crypto::AesKey;
use crate::entry::{CompressedBlock, PakEntry};
use crate::footer::{PakFooter, PakVersion};
use crate::index::{common_mount_point, MOUNT_POINT_PREFIX};
use crate::{Error, Result};

/// Paths containing this marker are never written.
pub const PLACEHOLDER_MARKER: &str = ".placeholder";

/// Number of method names a written footer can hold.
const WRITTEN_METHOD_SLOTS: usize = 5;

/// Options controlling how a container is written.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Container version; must be below the path-hash index version.
    pub version: PakVersion,
    /// Uncompressed size of every block but the last.
    pub compression_block_size: u32,
    /// Level passed to the codec backend.
    pub compression_level: i32,
    pub encrypt_index: bool,
    pub encrypt_entries: bool,
    pub key: Option<AesKey>,
    /// GUID recorded in the footer for key lookup.
    pub key_guid: Guid,
    pub codecs: Arc<CodecRegistry>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            version: PakVersion::FNAME_BASED_COMPRESSION_METHOD,
            compression_block_size: 0x10000,
            compression_level: 6,
            encrypt_index: false,
            encrypt_entries: false,
            key: None,
            key_guid: Guid::EMPTY,
            codecs: CodecRegistry::shared(),
        }
    }
}

/// A file queued for writing.
#[derive(Debug, Clone)]
struct PendingFile {
    path: String,
    data: Vec<u8>,
    method: CompressionMethod,
}

/// A file with its payload compressed and encrypted, not yet placed.
struct PreparedFile {
    /// Entry with offset 0 and block starts relative to it.
    entry: PakEntry,
    stored: Vec<u8>,
}

/// Builds a container from in-memory payloads.
#[derive(Debug, Clone)]
pub struct PakWriter {
    options: WriterOptions,
    files: Vec<PendingFile>,
}

impl PakWriter {
    pub fn new(options: WriterOptions) -> Self {
        Self {
            options,
            files: Vec::new(),
        }
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Queue a file. A file already queued under the same path is replaced in place.
    pub fn add(&mut self, path: impl Into<String>, data: Vec<u8>, method: CompressionMethod) {
        let path = path.into().replace('\\', "/");
        let file = PendingFile { path, data, method };
        match self.files.iter_mut().find(|f| f.path == file.path) {
            Some(existing) => *existing = file,
            None => self.files.push(file),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write the container to a new file.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<PakFooter> {
        let file = File::create(path.as_ref())?;
        let mut out = BufWriter::new(file);
        let footer = self.write(&mut out)?;
        out.flush()?;
        Ok(footer)
    }

    /// Write the container, returning the footer that was written.
    pub fn write<W: Write>(&self, out: W) -> Result<PakFooter> {
        self.validate()?;
        let version = self.options.version;

        let files: Vec<&PendingFile> = self
            .files
            .iter()
            .filter(|f| !f.path.contains(PLACEHOLDER_MARKER))
            .collect();
        let mount_point = common_mount_point(files.iter().map(|f| f.path.as_str()));

        let mut compression_methods = vec![CompressionMethod::None];
        for file in &files {
            if !file.method.is_none() && !compression_methods.contains(&file.method) {
                compression_methods.push(file.method.clone());
            }
        }
        if version >= PakVersion::FNAME_BASED_COMPRESSION_METHOD
            && compression_methods.len() - 1 > WRITTEN_METHOD_SLOTS
        {
            return Err(Error::Unsupported(format!(
                "{} compression methods exceed the {} footer slots",
                compression_methods.len() - 1,
                WRITTEN_METHOD_SLOTS
            )));
        }

        let prepared = self.prepare_all(&files)?;

        let mut w = ArchiveWriter::new(out);
        let mut index = ArchiveWriter::new(Vec::new());
        index.write_fstring(&format!("{MOUNT_POINT_PREFIX}/{mount_point}"))?;
        index.write_i32(files.len() as i32)?;

        for (file, prepared) in files.iter().zip(prepared) {
            let offset = w.position() as i64;
            let mut entry = prepared.entry;
            entry.offset = offset;
            for block in &mut entry.compression_blocks {
                block.start += offset;
            }
            let method_value = self.method_value(&entry.compression_method, &compression_methods)?;

            // The in-data copy records offset 0.
            let mut header = entry.clone();
            header.offset = 0;
            if version >= PakVersion::RELATIVE_CHUNK_OFFSETS {
                for block in &mut header.compression_blocks {
                    block.start -= offset;
                }
            }
            header.write_inline(&mut w, version, method_value)?;
            w.write_bytes(&prepared.stored)?;

            let relative = file.path[mount_point.len()..].trim_start_matches('/');
            index.write_fstring(relative)?;
            entry.write_inline(&mut index, version, method_value)?;
            debug!("Wrote {} at {:#x} ({} bytes stored)", file.path, offset, prepared.stored.len());
        }

        let index = index.into_inner();
        let index_hash = ShaHash::of(&index);
        let stored_index = match (&self.options.key, self.options.encrypt_index) {
            (Some(key), true) => key.encrypt(&index)?,
            _ => index,
        };

        let footer = PakFooter {
            key_guid: self.options.key_guid,
            index_encrypted: self.options.encrypt_index,
            version,
            index_offset: w.position() as i64,
            index_size: stored_index.len() as i64,
            index_hash,
            index_frozen: false,
            compression_methods: if version >= PakVersion::FNAME_BASED_COMPRESSION_METHOD {
                compression_methods
            } else {
                vec![CompressionMethod::None]
            },
            method_slots: if version >= PakVersion::FNAME_BASED_COMPRESSION_METHOD {
                WRITTEN_METHOD_SLOTS
            } else {
                0
            },
        };
        w.write_bytes(&stored_index)?;
        footer.write(&mut w)?;

        info!(
            "Wrote {} files, mount point \"{}\", version {}",
            files.len(),
            mount_point,
            version
        );
        Ok(footer)
    }

    fn validate(&self) -> Result<()> {
        let options = &self.options;
        let version = options.version;

        if version < PakVersion::INITIAL || version >= PakVersion::PATH_HASH_INDEX {
            return Err(Error::Unsupported(format!(
                "cannot write a flat index for version {version}"
            )));
        }
        if (options.encrypt_index || options.encrypt_entries) && options.key.is_none() {
            return Err(Error::Unsupported("encryption requested without a key".into()));
        }
        if options.encrypt_index && version < PakVersion::INDEX_ENCRYPTION {
            return Err(Error::Unsupported(format!(
                "version {version} cannot encrypt its index"
            )));
        }
        if options.compression_block_size == 0 {
            return Err(Error::Unsupported("compression block size is zero".into()));
        }

        for file in &self.files {
            if file.method.is_none() {
                continue;
            }
            if version < PakVersion::COMPRESSION_ENCRYPTION {
                return Err(Error::Unsupported(format!(
                    "version {version} cannot store compressed file {}",
                    file.path
                )));
            }
            if version < PakVersion::FNAME_BASED_COMPRESSION_METHOD && file.method.legacy_flags().is_none() {
                return Err(Error::Unsupported(format!(
                    "{} has no legacy flag for version {version}",
                    file.method
                )));
            }
            if !options.codecs.supports(&file.method) {
                return Err(Error::CodecUnavailable {
                    method: file.method.to_string(),
                    reason: "no backend registered".to_string(),
                });
            }
        }
        Ok(())
    }

    fn method_value(&self, method: &CompressionMethod, table: &[CompressionMethod]) -> Result<u32> {
        if self.options.version >= PakVersion::FNAME_BASED_COMPRESSION_METHOD {
            table
                .iter()
                .position(|m| m == method)
                .map(|i| i as u32)
                .ok_or_else(|| Error::UnknownCompressionMethod(method.to_string()))
        } else {
            method
                .legacy_flags()
                .ok_or_else(|| Error::UnknownCompressionMethod(method.to_string()))
        }
    }

    #[cfg(feature = "parallel")]
    fn prepare_all(&self, files: &[&PendingFile]) -> Result<Vec<PreparedFile>> {
        use rayon::prelude::*;

        files.par_iter().map(|file| self.prepare(file)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn prepare_all(&self, files: &[&PendingFile]) -> Result<Vec<PreparedFile>> {
        files.iter().map(|file| self.prepare(file)).collect()
    }

    /// Compress and encrypt one payload.
    fn prepare(&self, file: &PendingFile) -> Result<PreparedFile> {
        let options = &self.options;
        let version = options.version;
        let key = if options.encrypt_entries {
            options.key.as_ref()
        } else {
            None
        };
        let seal = |data: Vec<u8>| -> Result<Vec<u8>> {
            match key {
                Some(key) => key.encrypt(&data),
                None => Ok(data),
            }
        };

        // Empty payloads have no blocks to compress.
        let method = if file.data.is_empty() {
            CompressionMethod::None
        } else {
            file.method.clone()
        };

        let (stored, blocks, struct_size, size, block_size) = if method.is_none() {
            let stored = seal(file.data.clone())?;
            let struct_size = PakEntry::serialized_size(version, false, 0);
            (stored, Vec::new(), struct_size, file.data.len() as i64, 0)
        } else {
            let block_size = options.compression_block_size as usize;
            let block_count = file.data.len().div_ceil(block_size);
            let struct_size = PakEntry::serialized_size(version, true, block_count);

            let mut stored = Vec::new();
            let mut blocks = Vec::with_capacity(block_count);
            for chunk in file.data.chunks(block_size) {
                let compressed = options
                    .codecs
                    .compress(&method, chunk, options.compression_level)?;
                blocks.push(CompressedBlock {
                    start: i64::from(struct_size) + stored.len() as i64,
                    size: compressed.len() as i64,
                });
                stored.extend_from_slice(&seal(compressed)?);
            }
            let size = stored.len() as i64;
            let nominal = block_size.min(file.data.len()) as u32;
            (stored, blocks, struct_size, size, nominal)
        };

        Ok(PreparedFile {
            entry: PakEntry {
                path: file.path.clone(),
                offset: 0,
                size,
                uncompressed_size: file.data.len() as i64,
                compression_method: method,
                compression_blocks: blocks,
                compression_block_size: block_size,
                is_encrypted: key.is_some(),
                is_deleted: false,
                struct_size,
                hash: ShaHash::of(&stored),
            },
            stored,
        })
    }
}
