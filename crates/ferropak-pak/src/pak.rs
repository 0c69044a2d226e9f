//! A single opened container.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use ferropak_common::{ArchiveVersions, ByteArchive, Game, Guid};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::compression::{CodecRegistry, CompressionMethod};
use crate::crypto::{align, AesKey, AES_BLOCK_SIZE};
use crate::entry::PakEntry;
use crate::extract::EntryExtractor;
use crate::footer::{PakFooter, PakVersion};
use crate::index::{self, IndexContext, PathIndex};
use crate::writer::{PakWriter, WriterOptions};
use crate::{Error, Result};

/// Longest mount point, in characters, accepted by the key check.
pub const MAX_MOUNT_POINT_TEST_LENGTH: usize = 128;

/// Bytes preceding the mount point in titles with a leading index header.
const LEADING_INDEX_HEADER_SIZE: usize = 8 + 4;

/// Options shared by every container opened through them.
#[derive(Debug, Clone)]
pub struct PakConfig {
    pub versions: ArchiveVersions,
    /// Compare paths without regard to case.
    pub case_insensitive: bool,
    /// Extract through a cloned archive handle instead of holding the lock.
    pub concurrent: bool,
    pub codecs: Arc<CodecRegistry>,
}

impl Default for PakConfig {
    fn default() -> Self {
        Self {
            versions: ArchiveVersions::default(),
            case_insensitive: true,
            concurrent: true,
            codecs: CodecRegistry::shared(),
        }
    }
}

/// Payload of a file added after mounting.
#[derive(Debug, Clone)]
struct AddedFile {
    data: Vec<u8>,
    method: CompressionMethod,
}

/// An opened pak container.
///
/// Opening reads only the footer. [`mount`](Self::mount) parses the index,
/// after which entries can be looked up, extracted and edited.
pub struct PakFile {
    archive: Mutex<ByteArchive>,
    path: Option<PathBuf>,
    footer: PakFooter,
    config: PakConfig,
    key: Option<AesKey>,
    mount_point: String,
    files: PathIndex,
    added: FxHashMap<String, AddedFile>,
    encrypted_count: usize,
    read_order: i32,
    mounted: bool,
}

impl PakFile {
    /// Memory-map a container and read its footer.
    pub fn open<P: AsRef<Path>>(path: P, config: PakConfig) -> Result<Self> {
        let path = path.as_ref();
        let archive = ByteArchive::open(path, config.versions)?;
        let mut pak = Self::from_archive(archive, config)?;
        pak.path = Some(path.to_path_buf());
        Ok(pak)
    }

    /// Read the footer of an already opened archive.
    pub fn from_archive(mut archive: ByteArchive, config: PakConfig) -> Result<Self> {
        archive.set_versions(config.versions);
        let footer = PakFooter::read(&mut archive)?;
        debug!(
            "{}: version {}, index at {:#x} ({} bytes){}",
            archive.name(),
            footer.version,
            footer.index_offset,
            footer.index_size,
            if footer.index_encrypted { ", encrypted" } else { "" }
        );

        let files = PathIndex::new(config.case_insensitive);
        Ok(Self {
            archive: Mutex::new(archive),
            path: None,
            footer,
            config,
            key: None,
            mount_point: String::new(),
            files,
            added: FxHashMap::default(),
            encrypted_count: 0,
            read_order: 0,
            mounted: false,
        })
    }

    pub fn name(&self) -> String {
        self.archive.lock().name().to_string()
    }

    /// File the container was opened from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn footer(&self) -> &PakFooter {
        &self.footer
    }

    pub fn version(&self) -> PakVersion {
        self.footer.version
    }

    pub fn config(&self) -> &PakConfig {
        &self.config
    }

    /// GUID of the key this container needs.
    pub fn key_guid(&self) -> Guid {
        self.footer.key_guid
    }

    /// Whether the index is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.footer.index_encrypted
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub fn encrypted_count(&self) -> usize {
        self.encrypted_count
    }

    /// Collision priority; higher wins.
    pub fn read_order(&self) -> i32 {
        self.read_order
    }

    pub fn set_read_order(&mut self, read_order: i32) {
        self.read_order = read_order;
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &PathIndex {
        &self.files
    }

    pub fn entries(&self) -> impl Iterator<Item = &PakEntry> {
        self.files.iter()
    }

    pub fn get(&self, path: &str) -> Option<&PakEntry> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains(path)
    }

    /// Parse the index and populate the path index.
    ///
    /// Returns the number of files. An encrypted index needs `key`; a key
    /// that fails the mount point check is rejected with [`Error::InvalidKey`].
    pub fn mount(&mut self, key: Option<AesKey>) -> Result<usize> {
        let start = Instant::now();
        let name = self.name();

        if self.footer.index_encrypted {
            let key = key.as_ref().ok_or_else(|| Error::MissingKey {
                archive: name.clone(),
                guid: self.footer.key_guid,
            })?;
            if !self.test_key(key)? {
                return Err(Error::InvalidKey { archive: name });
            }
        }

        let parsed = {
            let archive = self.archive.lock();
            let ctx = IndexContext {
                archive: &*archive,
                footer: &self.footer,
                key: key.as_ref(),
            };
            index::parse(&ctx)
        };
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e @ (Error::CorruptIndex { .. } | Error::Common(_))) if self.footer.index_encrypted => {
                debug!("{}: decrypted index is unreadable: {}", name, e);
                return Err(Error::InvalidKey { archive: name });
            }
            Err(e) => return Err(e),
        };

        self.key = key;
        self.mount_point = parsed.mount_point;
        self.encrypted_count = parsed.encrypted_count;
        self.files = PathIndex::new(self.config.case_insensitive);
        self.files.extend(parsed.entries);
        self.added.clear();
        self.mounted = true;

        if !self.footer.index_encrypted && self.encrypted_count > 0 {
            warn!("Pak file \"{}\" is not encrypted but contains encrypted files", name);
        }
        info!(
            "Pak \"{}\": {} files ({} encrypted), mount point \"{}\", order {}, version {} in {:.2?}",
            name,
            self.files.len(),
            self.encrypted_count,
            self.mount_point,
            self.read_order,
            self.footer.version,
            start.elapsed()
        );
        Ok(self.files.len())
    }

    /// Leading bytes of the stored index, enough to hold a mount point.
    pub fn mount_point_check_bytes(&self) -> Result<Vec<u8>> {
        let mut limit = 4 + MAX_MOUNT_POINT_TEST_LENGTH * 2;
        if self.config.versions.game.has_leading_index_header() {
            limit += LEADING_INDEX_HEADER_SIZE;
        }
        let size = (self.footer.index_size as u64).min(limit as u64);
        let size = align(size, AES_BLOCK_SIZE as u64).min(self.footer.index_size as u64);

        let mut ar = self.archive.lock().clone();
        Ok(ar.read_vec_at(self.footer.index_offset as u64, size as usize)?)
    }

    /// Whether `key` decrypts the index start to a plausible mount point.
    ///
    /// Always `true` for unencrypted indices.
    pub fn test_key(&self, key: &AesKey) -> Result<bool> {
        if !self.footer.index_encrypted {
            return Ok(true);
        }
        let check = self.mount_point_check_bytes()?;
        let plain = key.decrypt(&check)?;
        if self.footer.index_frozen {
            return Ok(is_plausible_frozen_index_start(&plain));
        }
        Ok(is_plausible_index_start(&plain, self.config.versions.game))
    }

    /// Decrypted, decompressed payload of the file at `path`.
    pub fn extract(&self, path: &str) -> Result<Vec<u8>> {
        if let Some(added) = self.added.get(&self.files.normalize(path)) {
            return Ok(added.data.clone());
        }
        let entry = self
            .files
            .get(path)
            .ok_or_else(|| Error::EntryNotFound(path.to_string()))?;
        self.extract_entry(entry)
    }

    /// Payload of an entry read from this container's data.
    pub fn extract_entry(&self, entry: &PakEntry) -> Result<Vec<u8>> {
        let extractor = EntryExtractor {
            key_guid: self.footer.key_guid,
            key: self.key.as_ref(),
            codecs: &self.config.codecs,
        };
        if self.config.concurrent {
            let mut ar = self.archive.lock().clone();
            extractor.extract(&mut ar, entry)
        } else {
            let mut ar = self.archive.lock();
            extractor.extract(&mut *ar, entry)
        }
    }

    /// Add or replace a file. Returns the entry it replaced.
    pub fn add_file(
        &mut self,
        path: impl Into<String>,
        data: Vec<u8>,
        method: CompressionMethod,
    ) -> Option<PakEntry> {
        let path = path.into().replace('\\', "/");
        let entry = PakEntry {
            path: path.clone(),
            size: data.len() as i64,
            uncompressed_size: data.len() as i64,
            compression_method: method.clone(),
            ..PakEntry::default()
        };
        self.added
            .insert(self.files.normalize(&path), AddedFile { data, method });
        self.files.insert(entry)
    }

    /// Move a file to a new path, replacing whatever was there.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let from_key = self.files.normalize(from);
        let to_key = self.files.normalize(to);
        if !self.files.rename(from, to) {
            return Err(Error::EntryNotFound(from.to_string()));
        }
        self.added.remove(&to_key);
        if let Some(added) = self.added.remove(&from_key) {
            self.added.insert(to_key, added);
        }
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Option<PakEntry> {
        self.added.remove(&self.files.normalize(path));
        self.files.remove(path)
    }

    /// Writer options that reproduce this container's version and encryption.
    pub fn writer_options(&self) -> WriterOptions {
        let has_key = self.key.is_some();
        WriterOptions {
            version: self.footer.version.min(PakVersion::FROZEN_INDEX),
            encrypt_index: self.footer.index_encrypted && has_key,
            encrypt_entries: self.encrypted_count > 0 && has_key,
            key: self.key.clone(),
            key_guid: self.footer.key_guid,
            codecs: self.config.codecs.clone(),
            ..WriterOptions::default()
        }
    }

    /// Queue every file, with its payload extracted, into a new writer.
    pub fn to_writer(&self, options: WriterOptions) -> Result<PakWriter> {
        let mut writer = PakWriter::new(options);
        for entry in self.files.iter() {
            let data = self.extract(&entry.path)?;
            let method = match self.added.get(&self.files.normalize(&entry.path)) {
                Some(added) => added.method.clone(),
                None => entry.compression_method.clone(),
            };
            writer.add(entry.path.clone(), data, method);
        }
        Ok(writer)
    }
}

impl std::fmt::Debug for PakFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PakFile")
            .field("name", &self.name())
            .field("version", &self.footer.version)
            .field("mount_point", &self.mount_point)
            .field("files", &self.files.len())
            .field("mounted", &self.mounted)
            .finish()
    }
}

/// Whether decrypted frozen index bytes start with a plausible mount point array.
///
/// The mount point is a pointer followed by equal count and max fields of
/// UTF-16 units, terminator included.
fn is_plausible_frozen_index_start(bytes: &[u8]) -> bool {
    let field = |at: usize| {
        bytes
            .get(at..at + 4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };
    match (field(8), field(12)) {
        (Some(count), Some(max)) => count == max && (0..=MAX_MOUNT_POINT_TEST_LENGTH as i32).contains(&count),
        _ => false,
    }
}

/// Whether decrypted index bytes start with a well-formed mount point string.
fn is_plausible_index_start(bytes: &[u8], game: Game) -> bool {
    let bytes = if game.has_leading_index_header() {
        match bytes.get(LEADING_INDEX_HEADER_SIZE..) {
            Some(rest) => rest,
            None => return false,
        }
    } else {
        bytes
    };
    let Some(length) = bytes.get(..4) else {
        return false;
    };
    let length = i32::from_le_bytes([length[0], length[1], length[2], length[3]]);
    let max = MAX_MOUNT_POINT_TEST_LENGTH as i32;
    if !(-max..=max).contains(&length) {
        return false;
    }

    match length {
        0 => true,
        n if n > 0 => bytes.get(4 + n as usize - 1) == Some(&0),
        n => {
            let end = 4 + n.unsigned_abs() as usize * 2;
            bytes.get(end - 2..end) == Some(&[0, 0][..])
        }
    }
}
