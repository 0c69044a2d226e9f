//! 20-byte SHA-1 digest as stored in container indices.

use std::fmt;

use sha1::{Digest, Sha1};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{ByteArchive, Result};

/// A SHA-1 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct ShaHash(pub [u8; 20]);

impl ShaHash {
    /// On-disk size.
    pub const SIZE: usize = 20;

    /// Hash a byte slice.
    pub fn of(data: &[u8]) -> Self {
        Self(Sha1::digest(data).into())
    }

    /// Read a digest from an archive.
    pub fn read(ar: &mut ByteArchive) -> Result<Self> {
        ar.read_array_of::<20>().map(Self)
    }

    /// Raw digest bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// All-zero digest, used by writers that leave hashes unset.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 20]
    }
}

impl fmt::Debug for ShaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShaHash({})", self)
    }
}

impl fmt::Display for ShaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}
