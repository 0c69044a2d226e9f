//! Container indices.
//!
//! Three encodings exist. Flat (legacy) indices list every path with an
//! inline entry record. Path-hash indices keep bit-packed entries in a blob
//! and map directories to files in a separate directory index. Frozen
//! indices are memory images of the engine's own index structure.
//!
//! [`IndexFormat::select`] picks the encoding once per container; every
//! parser produces a [`ParsedIndex`].

mod frozen;
mod legacy;
mod updated;

use std::collections::BTreeMap;

use ferropak_common::{ByteArchive, ShaHash};
use tracing::{debug, warn};

use crate::crypto::{align, AesKey, AES_BLOCK_SIZE};
use crate::entry::PakEntry;
use crate::footer::{PakFooter, PakVersion};
use crate::{Error, Result};

/// Mount points start with this relative prefix on disk.
pub const MOUNT_POINT_PREFIX: &str = "../../..";

/// Index encoding of one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Legacy,
    /// Path-hash index plus directory index.
    Updated,
    Frozen,
}

impl IndexFormat {
    /// Pick the encoding described by a footer.
    pub fn select(footer: &PakFooter) -> Self {
        if footer.version >= PakVersion::PATH_HASH_INDEX {
            Self::Updated
        } else if footer.index_frozen {
            Self::Frozen
        } else {
            Self::Legacy
        }
    }
}

/// Result of parsing one index.
#[derive(Debug, Default)]
pub struct ParsedIndex {
    pub mount_point: String,
    /// Entries with their full paths set; deletion stubs already dropped.
    pub entries: Vec<PakEntry>,
    pub encrypted_count: usize,
}

impl ParsedIndex {
    pub(crate) fn push(&mut self, entry: PakEntry) {
        if entry.is_deleted_stub() {
            return;
        }
        if entry.is_encrypted {
            self.encrypted_count += 1;
        }
        self.entries.push(entry);
    }
}

/// Everything an index parser needs from the container being mounted.
pub(crate) struct IndexContext<'a> {
    pub archive: &'a ByteArchive,
    pub footer: &'a PakFooter,
    pub key: Option<&'a AesKey>,
}

impl IndexContext<'_> {
    pub fn name(&self) -> &str {
        self.archive.name()
    }

    /// Read a region of the container, decrypting it when the index is encrypted.
    pub fn read_region(&self, label: &str, offset: i64, size: i64, hash: Option<&ShaHash>) -> Result<ByteArchive> {
        let end = offset.checked_add(size);
        if offset < 0 || size < 0 || end.map_or(true, |end| end as u64 > self.archive.len()) {
            return Err(Error::corrupt_index(
                self.name(),
                format!("{label} range ({offset}, {size}) is outside the file"),
            ));
        }

        let mut ar = self.archive.clone();
        let encrypted = self.footer.index_encrypted;
        let read_size = if encrypted {
            align(size as u64, AES_BLOCK_SIZE as u64) as usize
        } else {
            size as usize
        };
        let mut data = ar.read_vec_at(offset as u64, read_size)?;

        if encrypted {
            let key = self.key.ok_or_else(|| Error::MissingKey {
                archive: self.name().to_string(),
                guid: self.footer.key_guid,
            })?;
            key.decrypt_in_place(&mut data)?;
            data.truncate(size as usize);
        } else if let Some(expected) = hash {
            let actual = ShaHash::of(&data);
            if !expected.is_zero() && actual != *expected {
                warn!(
                    "{}: {} hash mismatch (expected {}, got {})",
                    self.name(),
                    label,
                    expected,
                    actual
                );
            }
        }

        Ok(self
            .archive
            .derive(format!("{} - {}", self.name(), label), data))
    }
}

/// Parse the index of a container.
pub(crate) fn parse(ctx: &IndexContext<'_>) -> Result<ParsedIndex> {
    let format = IndexFormat::select(ctx.footer);
    debug!("{}: reading {:?} index", ctx.name(), format);

    let index = ctx.read_region(
        "Index",
        ctx.footer.index_offset,
        ctx.footer.index_size,
        Some(&ctx.footer.index_hash),
    )?;

    match format {
        IndexFormat::Legacy => legacy::parse(ctx, index),
        IndexFormat::Updated => updated::parse(ctx, index),
        IndexFormat::Frozen => frozen::parse(ctx, index),
    }
}

/// Validate a stored mount point and make it relative.
///
/// Stored mount points must start with `../../..`; the remainder must be an
/// absolute path not starting with `/.`. Anything else mounts at the root.
pub fn validate_mount_point(archive: &str, raw: &str) -> String {
    let mut mount_point = raw.to_string();
    let bad = match raw.strip_prefix(MOUNT_POINT_PREFIX) {
        Some(rest) => {
            mount_point = rest.to_string();
            !rest.starts_with('/') || rest.starts_with("/.")
        }
        None => true,
    };

    if bad {
        warn!(
            "Pak \"{}\" has strange mount point \"{}\", mounting to root",
            archive, raw
        );
        mount_point = "/".to_string();
    }

    mount_point[1..].to_string()
}

/// Join a mount point, a directory index key and a file name.
pub fn reconstruct_path(mount_point: &str, directory: &str, file: &str) -> String {
    if mount_point.ends_with('/') && directory.starts_with('/') {
        if directory == "/" {
            format!("{mount_point}{file}")
        } else {
            format!("{mount_point}{}{file}", &directory[1..])
        }
    } else {
        format!("{mount_point}{directory}{file}")
    }
}

/// Longest common directory prefix of a set of paths, ending in `/`.
///
/// Empty when the paths share no directory.
pub fn common_mount_point<'a>(paths: impl IntoIterator<Item = &'a str>) -> String {
    let mut prefix: Option<&str> = None;
    for path in paths {
        let dir = match path.rfind('/') {
            Some(i) => &path[..=i],
            None => "",
        };
        prefix = Some(match prefix {
            None => dir,
            Some(current) => {
                let common = current
                    .bytes()
                    .zip(dir.bytes())
                    .take_while(|(a, b)| a == b)
                    .count();
                match current.as_bytes()[..common].iter().rposition(|&b| b == b'/') {
                    Some(i) => &current[..=i],
                    None => "",
                }
            }
        });
    }
    prefix.unwrap_or("").to_string()
}

/// Path to entry mapping, keyed case-sensitively or not.
#[derive(Debug, Clone, Default)]
pub struct PathIndex {
    case_insensitive: bool,
    entries: BTreeMap<String, PakEntry>,
}

impl PathIndex {
    pub fn new(case_insensitive: bool) -> Self {
        Self {
            case_insensitive,
            entries: BTreeMap::new(),
        }
    }

    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Lookup key for a path under this index's case rule.
    pub fn normalize(&self, path: &str) -> String {
        if self.case_insensitive {
            path.to_lowercase()
        } else {
            path.to_string()
        }
    }

    /// Insert an entry under its own path, returning any entry it replaced.
    pub fn insert(&mut self, entry: PakEntry) -> Option<PakEntry> {
        let key = self.normalize(&entry.path);
        self.entries.insert(key, entry)
    }

    pub fn get(&self, path: &str) -> Option<&PakEntry> {
        self.entries.get(&self.normalize(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(&self.normalize(path))
    }

    pub fn remove(&mut self, path: &str) -> Option<PakEntry> {
        let key = self.normalize(path);
        self.entries.remove(&key)
    }

    /// Move an entry to a new path. Returns `false` if `from` does not exist.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.remove(from) {
            Some(mut entry) => {
                entry.path = to.to_string();
                self.insert(entry);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = &PakEntry> {
        self.entries.values()
    }

    /// Common directory prefix of every entry path.
    pub fn mount_point(&self) -> String {
        common_mount_point(self.entries.values().map(|e| e.path.as_str()))
    }
}

impl Extend<PakEntry> for PathIndex {
    fn extend<T: IntoIterator<Item = PakEntry>>(&mut self, iter: T) {
        for entry in iter {
            self.insert(entry);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruct_path() {
        assert_eq!(reconstruct_path("/Game/", "/", "Foo.uasset"), "/Game/Foo.uasset");
        assert_eq!(reconstruct_path("/Game/", "/Sub/", "Foo.uasset"), "/Game/Sub/Foo.uasset");
        assert_eq!(reconstruct_path("Game/", "Sub/", "Foo.uasset"), "Game/Sub/Foo.uasset");
        assert_eq!(reconstruct_path("", "/", "Foo.uasset"), "/Foo.uasset");
    }

    #[test]
    fn test_validate_mount_point() {
        assert_eq!(validate_mount_point("a.pak", "../../../Game/Content/"), "Game/Content/");
        assert_eq!(validate_mount_point("a.pak", "../../../"), "");
        assert_eq!(validate_mount_point("a.pak", "Game/"), "");
        assert_eq!(validate_mount_point("a.pak", "../../../.hidden/"), "");
        assert_eq!(validate_mount_point("a.pak", "../../..Game"), "");
    }

    #[test]
    fn test_common_mount_point() {
        assert_eq!(
            common_mount_point(["Game/A/x.uasset", "Game/B/y.uasset"]),
            "Game/"
        );
        assert_eq!(common_mount_point(["Game/A/x.uasset"]), "Game/A/");
        assert_eq!(common_mount_point(["Game/x", "Engine/y"]), "");
        assert_eq!(common_mount_point(["Gameplay/x", "Game/y"]), "");
        assert_eq!(common_mount_point(["root.txt", "Game/y"]), "");
        assert_eq!(common_mount_point(std::iter::empty()), "");
    }

    #[test]
    fn test_select_format() {
        let mut footer = test_support::footer(PakVersion::FROZEN_INDEX);
        footer.index_frozen = true;
        assert_eq!(IndexFormat::select(&footer), IndexFormat::Frozen);

        footer.index_frozen = false;
        assert_eq!(IndexFormat::select(&footer), IndexFormat::Legacy);

        footer.version = PakVersion::PATH_HASH_INDEX;
        assert_eq!(IndexFormat::select(&footer), IndexFormat::Updated);
    }

    #[test]
    fn test_region_outside_file() {
        let footer = test_support::footer(PakVersion::FNAME_BASED_COMPRESSION_METHOD);
        let archive = ByteArchive::from_bytes("test.pak", vec![0u8; 64]);
        let ctx = IndexContext { archive: &archive, footer: &footer, key: None };

        for (offset, size) in [(i64::MAX, 1), (1, i64::MAX), (-1, 4), (60, 8)] {
            let err = ctx.read_region("directory index", offset, size, None).unwrap_err();
            assert!(matches!(err, Error::CorruptIndex { .. }), "{offset}, {size}: {err}");
        }
        assert_eq!(ctx.read_region("directory index", 8, 8, None).unwrap().len(), 8);
    }

    #[test]
    fn test_path_index_case_insensitive() {
        let mut index = PathIndex::new(true);
        index.insert(PakEntry {
            path: "Game/Maps/Level.umap".into(),
            ..PakEntry::default()
        });

        assert!(index.contains("game/maps/level.umap"));
        assert_eq!(index.get("GAME/MAPS/LEVEL.UMAP").unwrap().path, "Game/Maps/Level.umap");

        assert!(index.rename("game/maps/level.umap", "Game/Maps/Renamed.umap"));
        assert!(!index.contains("Game/Maps/Level.umap"));
        assert_eq!(index.mount_point(), "Game/Maps/");
    }

    #[test]
    fn test_path_index_case_sensitive() {
        let mut index = PathIndex::new(false);
        index.insert(PakEntry {
            path: "Game/A.uasset".into(),
            ..PakEntry::default()
        });
        assert!(index.get("game/a.uasset").is_none());
        assert!(index.remove("Game/A.uasset").is_some());
        assert!(index.is_empty());
    }
}
