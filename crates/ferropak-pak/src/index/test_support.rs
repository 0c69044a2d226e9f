//! Builders for synthesizing containers in tests.

use ferropak_common::{ArchiveVersions, ArchiveWriter, ByteArchive, Guid, ShaHash};

use crate::compression::CompressionMethod;
use crate::crypto::AesKey;
use crate::entry::{PakEntry, FLAG_DELETED};
use crate::footer::{PakFooter, PakVersion};
use crate::frozen::tests::ImageBuilder;

/// Footer with a zlib/zstd method table, index location left unset.
pub(crate) fn footer(version: PakVersion) -> PakFooter {
    let has_methods = version >= PakVersion::FNAME_BASED_COMPRESSION_METHOD;
    PakFooter {
        key_guid: Guid::EMPTY,
        index_encrypted: false,
        version,
        index_offset: 0,
        index_size: 0,
        index_hash: ShaHash::default(),
        index_frozen: false,
        compression_methods: if has_methods {
            vec![
                CompressionMethod::None,
                CompressionMethod::Zlib,
                CompressionMethod::Zstd,
            ]
        } else {
            vec![CompressionMethod::None]
        },
        method_slots: if has_methods { 5 } else { 0 },
    }
}

/// A container file under construction.
pub(crate) struct ContainerImage {
    data: Vec<u8>,
    versions: ArchiveVersions,
}

impl ContainerImage {
    pub fn new() -> Self {
        Self::with_versions(ArchiveVersions::default())
    }

    pub fn with_versions(versions: ArchiveVersions) -> Self {
        Self {
            data: vec![0xEE; 16],
            versions,
        }
    }

    /// Append a region, encrypting it when a key is given.
    pub fn append(&mut self, bytes: &[u8], key: Option<&AesKey>) -> (i64, i64) {
        let offset = self.data.len() as i64;
        let stored = match key {
            Some(key) => key.encrypt(bytes).unwrap(),
            None => bytes.to_vec(),
        };
        self.data.extend_from_slice(&stored);
        (offset, stored.len() as i64)
    }

    /// Append the index and footer.
    pub fn finish(
        mut self,
        mut footer: PakFooter,
        index: Vec<u8>,
        key: Option<&AesKey>,
    ) -> (ByteArchive, PakFooter) {
        footer.index_hash = ShaHash::of(&index);
        footer.index_encrypted = key.is_some();
        let (offset, size) = self.append(&index, key);
        footer.index_offset = offset;
        footer.index_size = size;

        let mut w = ArchiveWriter::new(std::mem::take(&mut self.data));
        footer.write(&mut w).unwrap();
        (ByteArchive::new("test.pak", w.into_inner(), self.versions), footer)
    }
}

/// Container holding nothing but an unencrypted index.
pub(crate) fn archive_with_index(footer: PakFooter, index: Vec<u8>) -> (ByteArchive, PakFooter) {
    ContainerImage::new().finish(footer, index, None)
}

/// Flat index with uncompressed entries.
pub(crate) struct LegacyIndexBuilder {
    mount_point: String,
    records: Vec<(String, PakEntry)>,
}

impl LegacyIndexBuilder {
    pub fn new(mount_point: &str) -> Self {
        Self {
            mount_point: mount_point.to_string(),
            records: Vec::new(),
        }
    }

    pub fn file(&mut self, path: &str, offset: i64, size: i64) {
        self.records.push((
            path.to_string(),
            PakEntry {
                offset,
                size,
                uncompressed_size: size,
                ..PakEntry::default()
            },
        ));
    }

    pub fn deleted(&mut self, path: &str) {
        self.records.push((
            path.to_string(),
            PakEntry {
                is_deleted: true,
                ..PakEntry::default()
            },
        ));
    }

    pub fn finish(&self, footer: &PakFooter) -> Vec<u8> {
        let mut w = ArchiveWriter::new(Vec::new());
        w.write_fstring(&self.mount_point).unwrap();
        w.write_i32(self.records.len() as i32).unwrap();
        for (path, entry) in &self.records {
            w.write_fstring(path).unwrap();
            entry.write_inline(&mut w, footer.version, 0).unwrap();
        }
        w.into_inner()
    }
}

/// Path-hash primary index plus directory index.
pub(crate) struct UpdatedIndexBuilder {
    mount_point: String,
    versions: ArchiveVersions,
    blob: Vec<u8>,
    directories: Vec<(String, Vec<(String, i32)>)>,
    file_count: i32,
    pub has_path_hash_index: bool,
    pub trailing_count: i32,
}

impl UpdatedIndexBuilder {
    pub fn new(mount_point: &str, versions: ArchiveVersions) -> Self {
        Self {
            mount_point: mount_point.to_string(),
            versions,
            blob: Vec::new(),
            directories: Vec::new(),
            file_count: 0,
            has_path_hash_index: true,
            trailing_count: 0,
        }
    }

    fn directory(&mut self, dir: &str) -> &mut Vec<(String, i32)> {
        let index = match self.directories.iter().position(|(d, _)| d == dir) {
            Some(index) => index,
            None => {
                self.directories.push((dir.to_string(), Vec::new()));
                self.directories.len() - 1
            }
        };
        &mut self.directories[index].1
    }

    /// Uncompressed file with 32-bit offset and size.
    pub fn file(&mut self, dir: &str, name: &str, offset: u32, size: u32) {
        let blob_offset = self.blob.len() as i32;
        let bits: u32 = (1 << 31) | (1 << 30);
        self.blob.extend_from_slice(&bits.to_le_bytes());
        self.blob.extend_from_slice(&offset.to_le_bytes());
        self.blob.extend_from_slice(&size.to_le_bytes());
        self.file_count += 1;
        self.directory(dir).push((name.to_string(), blob_offset));
    }

    pub fn skipped(&mut self, dir: &str, name: &str) {
        self.directory(dir).push((name.to_string(), i32::MIN));
    }

    pub fn build(
        &self,
        mut image: ContainerImage,
        footer: PakFooter,
        key: Option<&AesKey>,
    ) -> (ByteArchive, PakFooter) {
        image.versions = self.versions;

        let mut dir = ArchiveWriter::new(Vec::new());
        dir.write_i32(self.directories.len() as i32).unwrap();
        for (name, files) in &self.directories {
            dir.write_fstring(name).unwrap();
            dir.write_i32(files.len() as i32).unwrap();
            for (file, offset) in files {
                dir.write_fstring(file).unwrap();
                dir.write_i32(*offset).unwrap();
            }
        }
        let dir = dir.into_inner();
        let dir_hash = ShaHash::of(&dir);
        let (dir_offset, dir_size) = image.append(&dir, key);

        let mut w = ArchiveWriter::new(Vec::new());
        if self.versions.game.has_leading_index_header() {
            w.write_u64(0x1234).unwrap();
            w.write_i32(self.file_count).unwrap();
            w.write_fstring(&self.mount_point).unwrap();
        } else {
            w.write_fstring(&self.mount_point).unwrap();
            w.write_i32(self.file_count).unwrap();
            w.write_u64(0x1234).unwrap();
        }
        w.write_bool(self.has_path_hash_index).unwrap();
        w.write_zeros(8 + 8 + 20).unwrap();
        w.write_bool(true).unwrap();
        w.write_i64(dir_offset).unwrap();
        w.write_i64(dir_size).unwrap();
        w.write_hash(&dir_hash).unwrap();
        w.write_i32(self.blob.len() as i32).unwrap();
        w.write_bytes(&self.blob).unwrap();
        w.write_i32(self.trailing_count).unwrap();

        image.finish(footer, w.into_inner(), key)
    }
}

/// One file of a frozen index.
#[derive(Clone)]
pub(crate) struct FrozenFile {
    dir: String,
    name: String,
    offset: i64,
    size: i64,
    uncompressed_size: i64,
    method_index: u32,
    block_size: u32,
    blocks: Vec<(i64, i64)>,
    flags: u8,
}

impl FrozenFile {
    pub fn new(dir: &str, name: &str, offset: i64, size: i64) -> Self {
        Self {
            dir: dir.to_string(),
            name: name.to_string(),
            offset,
            size,
            uncompressed_size: size,
            method_index: 0,
            block_size: 0,
            blocks: Vec::new(),
            flags: 0,
        }
    }

    /// Single-block zlib file.
    pub fn compressed(dir: &str, name: &str, offset: i64, uncompressed_size: i64, size: i64) -> Self {
        let header = i64::from(PakEntry::serialized_size(PakVersion::FROZEN_INDEX, true, 1));
        Self {
            uncompressed_size,
            method_index: 1,
            block_size: uncompressed_size as u32,
            blocks: vec![(header, header + size)],
            ..Self::new(dir, name, offset, size)
        }
    }

    pub fn deleted(dir: &str, name: &str) -> Self {
        Self {
            flags: FLAG_DELETED,
            ..Self::new(dir, name, 0, 0)
        }
    }
}

type SlotWriter = Box<dyn FnOnce(&mut ImageBuilder)>;

/// Frozen index image over the given files.
pub(crate) fn frozen_index(mount_point: &str, files: Vec<FrozenFile>) -> Vec<u8> {
    let mut b = ImageBuilder::default();
    b.fstring(mount_point);

    let records = files.clone();
    b.array(records.len(), move |b| {
        for file in records {
            let start = b.position();
            b.i64(file.offset);
            b.i64(file.size);
            b.i64(file.uncompressed_size);
            b.bytes(&[0; 20]);
            b.u32(0);
            let blocks = file.blocks.clone();
            b.array(blocks.len(), move |b| {
                for (block_start, block_end) in blocks {
                    b.i64(block_start);
                    b.i64(block_end);
                }
            });
            b.u32(file.block_size);
            b.u32(file.method_index);
            b.u8(file.flags);
            b.pad_to(start + 80);
        }
    });

    let mut directories: Vec<(String, Vec<(String, i32)>)> = Vec::new();
    for (index, file) in files.iter().enumerate() {
        match directories.iter_mut().find(|(d, _)| *d == file.dir) {
            Some((_, list)) => list.push((file.name.clone(), index as i32)),
            None => directories.push((file.dir.clone(), vec![(file.name.clone(), index as i32)])),
        }
    }

    let slots: Vec<Option<SlotWriter>> = directories
        .into_iter()
        .map(|(dir, files)| {
            let write: SlotWriter = Box::new(move |b: &mut ImageBuilder| {
                b.fstring(&dir);
                let inner: Vec<Option<SlotWriter>> = files
                    .into_iter()
                    .map(|(name, index)| {
                        let write: SlotWriter = Box::new(move |b: &mut ImageBuilder| {
                            b.fstring(&name);
                            b.i32(index);
                        });
                        Some(write)
                    })
                    .collect();
                b.set(32, inner);
            });
            Some(write)
        })
        .collect();
    b.set(80, slots);

    b.finish()
}
