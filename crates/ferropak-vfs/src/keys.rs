//! Encryption keys by container GUID.

use ferropak_common::Guid;
use ferropak_pak::AesKey;
use rustc_hash::FxHashMap;

use crate::Result;

/// Maps container key GUIDs to AES keys.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    keys: FxHashMap<Guid, AesKey>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key, returning the one it replaced.
    pub fn insert(&mut self, guid: Guid, key: AesKey) -> Option<AesKey> {
        self.keys.insert(guid, key)
    }

    /// Register a key given as text: a GUID (plain or dashed) and 64 hex digits.
    pub fn insert_str(&mut self, guid: &str, key: &str) -> Result<Option<AesKey>> {
        let guid: Guid = guid.parse()?;
        let key: AesKey = key.parse()?;
        Ok(self.insert(guid, key))
    }

    pub fn get(&self, guid: &Guid) -> Option<&AesKey> {
        self.keys.get(guid)
    }

    pub fn contains(&self, guid: &Guid) -> bool {
        self.keys.contains_key(guid)
    }

    pub fn remove(&mut self, guid: &Guid) -> Option<AesKey> {
        self.keys.remove(guid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn guids(&self) -> impl Iterator<Item = &Guid> {
        self.keys.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Guid, &AesKey)> {
        self.keys.iter()
    }
}

impl Extend<(Guid, AesKey)> for KeyRegistry {
    fn extend<T: IntoIterator<Item = (Guid, AesKey)>>(&mut self, iter: T) {
        self.keys.extend(iter);
    }
}
