//! 128-bit GUID stored as four little-endian 32-bit parts.
//!
//! Pak containers use this to name the encryption key that protects them.

use std::fmt;
use std::str::FromStr;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{ByteArchive, Error, Result};

/// A 16-byte GUID.
///
/// Displayed as 32 uppercase hex digits, one 8-digit group per part:
/// `AAAAAAAABBBBBBBBCCCCCCCCDDDDDDDD`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Guid {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
}

impl Guid {
    /// Empty GUID (all zeros).
    pub const EMPTY: Self = Self { a: 0, b: 0, c: 0, d: 0 };

    /// On-disk size.
    pub const SIZE: usize = 16;

    /// Create a GUID from its four parts.
    #[inline]
    pub const fn new(a: u32, b: u32, c: u32, d: u32) -> Self {
        Self { a, b, c, d }
    }

    /// Read a GUID from an archive.
    pub fn read(ar: &mut ByteArchive) -> Result<Self> {
        Ok(Self {
            a: ar.read_u32()?,
            b: ar.read_u32()?,
            c: ar.read_u32()?,
            d: ar.read_u32()?,
        })
    }

    /// Check if the GUID is empty (all zeros).
    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}{:08X}{:08X}{:08X}", self.a, self.b, self.c, self.d)
    }
}

impl FromStr for Guid {
    type Err = Error;

    /// Accepts 32 hex digits, optionally split by hyphens
    /// (`XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`) and optionally wrapped in braces.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}');
        let digits: String = trimmed.chars().filter(|c| *c != '-').collect();

        if digits.len() != 32 {
            return Err(Error::InvalidGuid(format!(
                "expected 32 hex digits, got {}",
                digits.len()
            )));
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidGuid(format!("invalid hex in \"{s}\"")));
        }

        let part = |index: usize| -> Result<u32> {
            let start = index * 8;
            u32::from_str_radix(&digits[start..start + 8], 16)
                .map_err(|_| Error::InvalidGuid(format!("invalid hex in \"{s}\"")))
        };

        Ok(Self::new(part(0)?, part(1)?, part(2)?, part(3)?))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Guid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Guid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
