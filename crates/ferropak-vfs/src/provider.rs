//! Multi-container file provider.
//!
//! Containers are registered first and mounted later, possibly in parallel.
//! Encrypted containers whose key is unknown stay unmounted until the key is
//! submitted. When several containers provide the same path, the one with
//! the highest read order wins; ties go to the container registered last.

use std::collections::hash_map::Entry;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ferropak_common::{ArchiveVersions, ByteArchive, Guid};
use ferropak_pak::{AesKey, CodecRegistry, PakConfig, PakEntry, PakFile};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::keys::KeyRegistry;
use crate::{Error, Result};

/// Read order of containers whose name ends in `_P`.
pub const PATCH_READ_ORDER: i32 = 100;

/// Mount layer configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub case_insensitive: bool,
    pub versions: ArchiveVersions,
    /// Extract through cloned archive handles.
    pub concurrent: bool,
    pub codecs: Arc<CodecRegistry>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            case_insensitive: true,
            versions: ArchiveVersions::default(),
            concurrent: true,
            codecs: CodecRegistry::shared(),
        }
    }
}

impl ProviderConfig {
    fn pak_config(&self) -> PakConfig {
        PakConfig {
            versions: self.versions,
            case_insensitive: self.case_insensitive,
            concurrent: self.concurrent,
            codecs: self.codecs.clone(),
        }
    }
}

/// Read order implied by a container file name.
///
/// `name_P` is a patch container with order 100, `name_<n>_P` has order
/// `100 * (n + 1)`, anything else 0. The extension is ignored.
pub fn read_order_from_name(name: &str) -> i32 {
    let stem = match name.rfind('.') {
        Some(dot) => &name[..dot],
        None => name,
    };
    let Some(base) = stem.strip_suffix("_P") else {
        return 0;
    };

    let digits = base.len() - base.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 && base[..base.len() - digits].ends_with('_') {
        if let Ok(n) = base[base.len() - digits..].parse::<i32>() {
            return n.saturating_add(1).saturating_mul(PATCH_READ_ORDER);
        }
    }
    PATCH_READ_ORDER
}

fn normalize(path: &str, case_insensitive: bool) -> String {
    let path = path.trim_start_matches('/');
    if case_insensitive {
        path.to_lowercase()
    } else {
        path.to_string()
    }
}

/// Aggregates containers under one path lookup.
pub struct FileProvider {
    config: ProviderConfig,
    keys: KeyRegistry,
    containers: Vec<PakFile>,
    /// Normalized path to the index of the container that provides it.
    files: FxHashMap<String, usize>,
}

impl FileProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            keys: KeyRegistry::new(),
            containers: Vec::new(),
            files: FxHashMap::default(),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    pub fn containers(&self) -> &[PakFile] {
        &self.containers
    }

    pub fn mounted_count(&self) -> usize {
        self.containers.iter().filter(|c| c.is_mounted()).count()
    }

    /// Number of distinct paths across mounted containers.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Key GUIDs of encrypted containers still waiting for a key.
    pub fn required_keys(&self) -> Vec<Guid> {
        let mut guids: Vec<Guid> = self
            .containers
            .iter()
            .filter(|c| !c.is_mounted() && c.is_encrypted() && !self.keys.contains(&c.key_guid()))
            .map(|c| c.key_guid())
            .collect();
        guids.sort_by_key(|g| g.to_string());
        guids.dedup();
        guids
    }

    /// Open a container file, with its read order derived from the file name.
    pub fn register_container<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let read_order = read_order_from_name(name);
        self.register_container_with_order(path, read_order)
    }

    /// Open a container file with an explicit read order.
    pub fn register_container_with_order<P: AsRef<Path>>(&mut self, path: P, read_order: i32) -> Result<usize> {
        let mut pak = PakFile::open(path, self.config.pak_config())?;
        pak.set_read_order(read_order);
        Ok(self.push(pak))
    }

    /// Register an in-memory container.
    pub fn register_archive(&mut self, archive: ByteArchive, read_order: i32) -> Result<usize> {
        let mut pak = PakFile::from_archive(archive, self.config.pak_config())?;
        pak.set_read_order(read_order);
        Ok(self.push(pak))
    }

    fn push(&mut self, pak: PakFile) -> usize {
        debug!(
            "Registered \"{}\" (order {}, key {})",
            pak.name(),
            pak.read_order(),
            pak.key_guid()
        );
        self.containers.push(pak);
        self.containers.len() - 1
    }

    /// Register every `*.pak` file in a directory, in file name order.
    pub fn register_directory<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize> {
        let mut paths: Vec<_> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pak")))
            .collect();
        paths.sort();

        let mut registered = 0;
        for path in paths {
            match self.register_container(&path) {
                Ok(_) => registered += 1,
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(registered)
    }

    /// Mount every container that can be mounted. Returns how many were newly mounted.
    pub fn mount_all(&mut self) -> usize {
        self.mount_matching(|_| true)
    }

    /// Register a key and mount the containers waiting for it.
    ///
    /// Returns how many containers were newly mounted.
    pub fn submit_key(&mut self, guid: Guid, key: AesKey) -> usize {
        self.keys.insert(guid, key);
        self.mount_matching(|pak| pak.key_guid() == guid)
    }

    /// Register several keys, then mount once.
    pub fn submit_keys(&mut self, keys: impl IntoIterator<Item = (Guid, AesKey)>) -> usize {
        self.keys.extend(keys);
        self.mount_matching(|_| true)
    }

    fn mount_matching<F>(&mut self, filter: F) -> usize
    where
        F: Fn(&PakFile) -> bool + Sync,
    {
        let keys = &self.keys;
        let mounted: usize = self
            .containers
            .par_iter_mut()
            .filter(|pak| !pak.is_mounted() && filter(pak))
            .map(|pak| {
                let key = keys.get(&pak.key_guid()).cloned();
                if pak.is_encrypted() && key.is_none() {
                    debug!("{}: waiting for key {}", pak.name(), pak.key_guid());
                    return 0;
                }
                match pak.mount(key) {
                    Ok(_) => 1,
                    Err(e) if e.is_invalid_key() => {
                        warn!("{}: the provided key for {} doesn't work", pak.name(), pak.key_guid());
                        0
                    }
                    Err(e) => {
                        warn!("Failed to mount {}: {}", pak.name(), e);
                        0
                    }
                }
            })
            .sum();

        if mounted > 0 {
            self.rebuild_files();
            info!(
                "Mounted {} containers ({} of {} total), {} files",
                mounted,
                self.mounted_count(),
                self.containers.len(),
                self.files.len()
            );
        }
        mounted
    }

    /// Recompute which container provides each path.
    fn rebuild_files(&mut self) {
        self.files.clear();
        for (index, pak) in self.containers.iter().enumerate() {
            if !pak.is_mounted() {
                continue;
            }
            for entry in pak.entries() {
                let key = normalize(&entry.path, self.config.case_insensitive);
                match self.files.entry(key) {
                    Entry::Vacant(slot) => {
                        slot.insert(index);
                    }
                    Entry::Occupied(mut slot) => {
                        if pak.read_order() >= self.containers[*slot.get()].read_order() {
                            slot.insert(index);
                        }
                    }
                }
            }
        }
    }

    fn normalize(&self, path: &str) -> String {
        normalize(path, self.config.case_insensitive)
    }

    /// Container providing `path`.
    pub fn container_of(&self, path: &str) -> Option<&PakFile> {
        self.files
            .get(&self.normalize(path))
            .map(|&index| &self.containers[index])
    }

    pub fn lookup(&self, path: &str) -> Option<&PakEntry> {
        self.container_of(path)?.get(path.trim_start_matches('/'))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(&self.normalize(path))
    }

    /// Every visible entry, each with the container that provides it.
    pub fn entries(&self) -> impl Iterator<Item = (&PakFile, &PakEntry)> {
        self.files.iter().filter_map(move |(path, &index)| {
            let pak = &self.containers[index];
            pak.get(path).map(|entry| (pak, entry))
        })
    }

    /// Decrypted, decompressed payload of the file at `path`.
    pub fn extract(&self, path: &str) -> Result<Vec<u8>> {
        let pak = self
            .container_of(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(pak.extract(path.trim_start_matches('/'))?)
    }

    /// Extract many files in parallel, handing each result to `sink`.
    ///
    /// `cancel` is checked before every file; files not started when it is
    /// set are reported as [`Error::Cancelled`]. Returns the number of files
    /// extracted successfully.
    pub fn extract_many<S, F>(&self, paths: &[S], cancel: &AtomicBool, sink: F) -> usize
    where
        S: AsRef<str> + Sync,
        F: Fn(&str, Result<Vec<u8>>) + Sync,
    {
        paths
            .par_iter()
            .map(|path| {
                let path = path.as_ref();
                if cancel.load(Ordering::Relaxed) {
                    sink(path, Err(Error::Cancelled));
                    return 0;
                }
                let result = self.extract(path);
                let ok = usize::from(result.is_ok());
                sink(path, result);
                ok
            })
            .sum()
    }
}

impl std::fmt::Debug for FileProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileProvider")
            .field("containers", &self.containers.len())
            .field("mounted", &self.mounted_count())
            .field("files", &self.files.len())
            .field("keys", &self.keys.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferropak_pak::{CompressionMethod, PakWriter, WriterOptions};
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const GUID: &str = "11111111222222223333333344444444";

    fn key() -> AesKey {
        "5a".repeat(32).parse().unwrap()
    }

    fn write_pak(dir: &TempDir, name: &str, options: WriterOptions, files: &[(&str, &[u8])]) -> PathBuf {
        let mut writer = PakWriter::new(options);
        for (path, data) in files {
            writer.add(*path, data.to_vec(), CompressionMethod::Zlib);
        }
        let path = dir.path().join(name);
        writer.write_to_file(&path).unwrap();
        path
    }

    fn encrypted() -> WriterOptions {
        WriterOptions {
            encrypt_index: true,
            encrypt_entries: true,
            key: Some(key()),
            key_guid: GUID.parse().unwrap(),
            ..WriterOptions::default()
        }
    }

    /// Base container, its patch, and an encrypted container.
    fn setup() -> (TempDir, FileProvider) {
        let dir = TempDir::new().unwrap();
        write_pak(
            &dir,
            "pakchunk0-Windows.pak",
            WriterOptions::default(),
            &[("Game/A.txt", b"base a"), ("Game/B.txt", b"base b")],
        );
        write_pak(
            &dir,
            "pakchunk0-Windows_P.pak",
            WriterOptions::default(),
            &[("Game/A.txt", b"patched a")],
        );
        write_pak(
            &dir,
            "pakchunk1-Windows.pak",
            encrypted(),
            &[("Game/Secret/C.txt", b"secret c")],
        );

        let mut provider = FileProvider::new(ProviderConfig::default());
        assert_eq!(provider.register_directory(dir.path()).unwrap(), 3);
        (dir, provider)
    }

    #[test]
    fn test_read_order_from_name() {
        assert_eq!(read_order_from_name("pakchunk0-Windows.pak"), 0);
        assert_eq!(read_order_from_name("pakchunk0-Windows_P.pak"), 100);
        assert_eq!(read_order_from_name("pakchunk0-Windows_2_P.pak"), 300);
        assert_eq!(read_order_from_name("Game_0_P"), 100);
        assert_eq!(read_order_from_name("Patch1_P.pak"), 100);
    }

    #[test]
    fn test_patch_wins_collisions() {
        let (_dir, mut provider) = setup();
        assert_eq!(provider.mount_all(), 2);
        assert_eq!(provider.mounted_count(), 2);

        assert_eq!(provider.extract("Game/A.txt").unwrap(), b"patched a");
        assert_eq!(provider.extract("game/b.txt").unwrap(), b"base b");
        assert_eq!(provider.container_of("Game/A.txt").unwrap().read_order(), 100);
        assert!(matches!(provider.extract("Game/Secret/C.txt"), Err(Error::NotFound(_))));
        assert_eq!(provider.file_count(), 2);
    }

    #[test]
    fn test_submit_key_mounts_waiting_containers() {
        let (_dir, mut provider) = setup();
        provider.mount_all();
        let guid: Guid = GUID.parse().unwrap();
        assert_eq!(provider.required_keys(), vec![guid]);

        let wrong: AesKey = "00".repeat(32).parse().unwrap();
        assert_eq!(provider.submit_key(guid, wrong), 0);

        assert_eq!(provider.submit_key(guid, key()), 1);
        assert!(provider.required_keys().is_empty());
        assert_eq!(provider.extract("Game/Secret/C.txt").unwrap(), b"secret c");
        assert!(provider.lookup("Game/Secret/C.txt").unwrap().is_encrypted);
    }

    #[test]
    fn test_keys_submitted_before_mounting() {
        let (_dir, mut provider) = setup();
        provider.submit_keys([(GUID.parse().unwrap(), key())]);
        assert_eq!(provider.mounted_count(), 3);
        assert_eq!(provider.mount_all(), 0);
        assert_eq!(provider.file_count(), 3);
    }

    #[test]
    fn test_explicit_read_order_overrides_name() {
        let dir = TempDir::new().unwrap();
        let low = write_pak(&dir, "z_P.pak", WriterOptions::default(), &[("X/f", b"from z")]);
        let high = write_pak(&dir, "a.pak", WriterOptions::default(), &[("X/f", b"from a")]);

        let mut provider = FileProvider::new(ProviderConfig::default());
        provider.register_container_with_order(&high, 500).unwrap();
        provider.register_container(&low).unwrap();
        provider.mount_all();

        assert_eq!(provider.extract("X/f").unwrap(), b"from a");
    }

    #[test]
    fn test_extract_many_and_cancel() {
        let (_dir, mut provider) = setup();
        provider.mount_all();
        let paths = ["Game/A.txt", "Game/B.txt", "Game/Missing.txt"];

        let results = Mutex::new(Vec::new());
        let cancel = AtomicBool::new(false);
        let extracted = provider.extract_many(&paths, &cancel, |path, result| {
            results.lock().push((path.to_string(), result.is_ok()));
        });
        assert_eq!(extracted, 2);
        assert_eq!(results.lock().len(), 3);

        cancel.store(true, Ordering::Relaxed);
        let cancelled = Mutex::new(0);
        let extracted = provider.extract_many(&paths, &cancel, |_, result| {
            assert!(matches!(result, Err(Error::Cancelled)));
            *cancelled.lock() += 1;
        });
        assert_eq!(extracted, 0);
        assert_eq!(*cancelled.lock(), 3);
    }
}
