//! Versioned, random-access binary archive.
//!
//! This module provides [`ByteArchive`], a cursor over a shared byte source
//! that carries a logical name and an [`ArchiveVersions`] context. Every read
//! is bounds-checked; failures produce [`Error::Parse`] with the archive name
//! and the offset of the failing read.

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use zerocopy::FromBytes;

use crate::{ArchiveVersions, Error, Result};

/// Shared, immutable backing storage for archives.
pub type ArchiveSource = Arc<dyn AsRef<[u8]> + Send + Sync>;

/// A binary archive reader over a shared byte source.
///
/// Cloning is cheap: the clone shares the source and owns an independent
/// cursor, so each thread can read through its own clone without
/// synchronization. A single `ByteArchive` is not meant to be shared between
/// threads.
///
/// # Example
///
/// ```
/// use ferropak_common::ByteArchive;
///
/// let data = vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
/// let mut ar = ByteArchive::from_bytes("example", data);
///
/// assert_eq!(ar.read_u32().unwrap(), 0x04030201);
/// assert_eq!(ar.read_u32().unwrap(), 0x08070605);
/// assert!(ar.is_empty());
/// ```
#[derive(Clone)]
pub struct ByteArchive {
    source: ArchiveSource,
    name: Arc<str>,
    versions: ArchiveVersions,
    position: usize,
}

impl ByteArchive {
    /// Create an archive over any shareable byte source.
    pub fn new<S>(name: impl Into<String>, source: S, versions: ArchiveVersions) -> Self
    where
        S: AsRef<[u8]> + Send + Sync + 'static,
    {
        Self::from_source(name, Arc::new(source), versions)
    }

    /// Create an archive over an already shared source.
    pub fn from_source(
        name: impl Into<String>,
        source: ArchiveSource,
        versions: ArchiveVersions,
    ) -> Self {
        Self {
            source,
            name: Arc::from(name.into()),
            versions,
            position: 0,
        }
    }

    /// Create an archive over owned bytes with the default version context.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(name, data, ArchiveVersions::default())
    }

    /// Memory-map a file and create an archive named after its file name.
    pub fn open<P: AsRef<Path>>(path: P, versions: ArchiveVersions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: containers are treated as read-only; concurrent truncation by
        // another process is outside what this reader defends against.
        let mmap = unsafe { Mmap::map(&file)? };

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self::new(name, mmap, versions))
    }

    /// Create a new archive over `data` that inherits this archive's version context.
    pub fn derive(&self, name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(name, data, self.versions)
    }

    /// Logical name used in error messages.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version context.
    #[inline]
    pub fn versions(&self) -> &ArchiveVersions {
        &self.versions
    }

    /// Replace the version context.
    pub fn set_versions(&mut self, versions: ArchiveVersions) {
        self.versions = versions;
    }

    /// The whole underlying buffer.
    #[inline]
    pub fn data(&self) -> &[u8] {
        (*self.source).as_ref()
    }

    /// Current position.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position as u64
    }

    /// Total length of the underlying buffer.
    #[inline]
    pub fn len(&self) -> u64 {
        self.data().len() as u64
    }

    /// Number of bytes remaining to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data().len().saturating_sub(self.position)
    }

    /// Check if there are no more bytes to read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Seek to an absolute position.
    ///
    /// Seeking past the end is allowed; the next read fails.
    #[inline]
    pub fn seek(&mut self, position: u64) {
        self.position = usize::try_from(position).unwrap_or(usize::MAX);
    }

    /// Move the position by a signed delta.
    pub fn seek_relative(&mut self, delta: i64) -> Result<()> {
        let target = (self.position as i64).checked_add(delta).filter(|t| *t >= 0);
        match target {
            Some(target) => {
                self.position = target as usize;
                Ok(())
            }
            None => Err(self.error(format!("seek by {delta} moves before start of archive"))),
        }
    }

    /// Advance the position by a number of bytes.
    #[inline]
    pub fn advance(&mut self, count: usize) {
        self.position = self.position.saturating_add(count);
    }

    /// Build a parse error at the current position.
    pub fn error(&self, reason: impl Into<String>) -> Error {
        self.error_at(self.position as u64, reason)
    }

    /// Build a parse error at an explicit offset.
    pub fn error_at(&self, offset: u64, reason: impl Into<String>) -> Error {
        Error::Parse {
            archive: self.name.to_string(),
            offset,
            reason: reason.into(),
        }
    }

    /// Validate that `length` bytes can be read from the current position.
    pub fn check_read_size(&self, length: i64) -> Result<usize> {
        if length < 0 {
            return Err(self.error(format!("read size {length} is smaller than zero")));
        }
        if self.position > self.data().len() {
            return Err(self.error(format!(
                "position is past the end of the archive ({} bytes)",
                self.data().len()
            )));
        }
        let length = length as u64;
        if length > self.remaining() as u64 {
            return Err(self.error(format!(
                "read size {length} is bigger than remaining archive length {}",
                self.remaining()
            )));
        }
        Ok(length as usize)
    }

    /// Peek at bytes without advancing the position.
    #[inline]
    pub fn peek_bytes(&self, count: usize) -> Result<&[u8]> {
        self.check_read_size(count as i64)?;
        Ok(&self.data()[self.position..self.position + count])
    }

    /// Read bytes and advance the position.
    #[inline]
    pub fn read_bytes(&mut self, count: usize) -> Result<&[u8]> {
        self.check_read_size(count as i64)?;
        let start = self.position;
        self.position += count;
        Ok(&self.data()[start..start + count])
    }

    /// Read bytes into a new vector.
    pub fn read_vec(&mut self, count: usize) -> Result<Vec<u8>> {
        self.read_bytes(count).map(<[u8]>::to_vec)
    }

    /// Read `count` bytes at an absolute offset, leaving the cursor after them.
    pub fn read_vec_at(&mut self, offset: u64, count: usize) -> Result<Vec<u8>> {
        self.seek(offset);
        self.read_vec(count)
    }

    /// Read a fixed-size array.
    #[inline]
    pub fn read_array_of<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    /// Read a little-endian u16.
    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_array_of::<2>().map(u16::from_le_bytes)
    }

    /// Read a little-endian u32.
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array_of::<4>().map(u32::from_le_bytes)
    }

    /// Read a little-endian i32.
    #[inline]
    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_array_of::<4>().map(i32::from_le_bytes)
    }

    /// Read a little-endian u64.
    #[inline]
    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_array_of::<8>().map(u64::from_le_bytes)
    }

    /// Read a little-endian i64.
    #[inline]
    pub fn read_i64(&mut self) -> Result<i64> {
        self.read_array_of::<8>().map(i64::from_le_bytes)
    }

    /// Read a boolean stored as a 4-byte integer that must be exactly 0 or 1.
    pub fn read_bool(&mut self) -> Result<bool> {
        let offset = self.position();
        match self.read_i32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.error_at(offset, format!("invalid bool value ({other})"))),
        }
    }

    /// Read a boolean stored as a single byte that must be exactly 0 or 1.
    pub fn read_flag(&mut self) -> Result<bool> {
        let offset = self.position();
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.error_at(offset, format!("invalid flag value ({other})"))),
        }
    }

    /// Read a 7-bit-chunked unsigned integer.
    ///
    /// The low bit of every byte flags that another byte follows; the upper
    /// seven bits carry the payload, least significant chunk first.
    pub fn read_packed_u32(&mut self) -> Result<u32> {
        let offset = self.position();
        let mut value: u32 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 32 {
                return Err(self.error_at(offset, "packed integer is longer than 32 bits"));
            }
            value |= u32::from(byte >> 1) << shift;
            if byte & 1 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Read a length-prefixed string.
    ///
    /// A positive length counts single-byte characters, a negative length
    /// counts UTF-16 code units. Both include a terminator which is stripped.
    pub fn read_fstring(&mut self) -> Result<String> {
        let offset = self.position();
        let length = self.read_i32()?;

        if length == i32::MIN {
            return Err(self.error_at(offset, "string length is i32::MIN, archive is corrupted"));
        }

        if length == 0 {
            return Ok(String::new());
        }

        if length < 0 {
            let units = length.unsigned_abs() as usize;
            let byte_len = units * 2;
            if byte_len > self.remaining() {
                return Err(self.error_at(offset, format!("invalid string length {length}")));
            }
            let bytes = self.read_bytes(byte_len)?;
            let code_units: Vec<u16> = bytes
                .chunks_exact(2)
                .take(units - 1)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            return String::from_utf16(&code_units)
                .map_err(|_| self.error_at(offset, "string is not valid UTF-16"));
        }

        let length = length as usize;
        if length > self.remaining() {
            return Err(self.error_at(offset, format!("invalid string length {length}")));
        }
        let bytes = self.read_bytes(length)?;
        Ok(bytes[..length - 1].iter().map(|&b| b as char).collect())
    }

    /// Read `count` elements with a reader callback.
    pub fn read_array<T, F>(&mut self, count: usize, mut read: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        // Cap the pre-allocation by what the remaining bytes could possibly hold.
        let mut out = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            out.push(read(self)?);
        }
        Ok(out)
    }

    /// Read an i32 element count followed by that many elements.
    pub fn read_counted_array<T, F>(&mut self, read: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let count = self.read_count()?;
        self.read_array(count, read)
    }

    /// Read an i32 element count, rejecting negative values.
    pub fn read_count(&mut self) -> Result<usize> {
        let offset = self.position();
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| self.error_at(offset, format!("negative count {count}")))
    }

    /// Read a struct using zerocopy.
    ///
    /// The struct must implement `FromBytes` from the zerocopy crate.
    #[inline]
    pub fn read_struct<T: FromBytes>(&mut self) -> Result<T> {
        let offset = self.position();
        let size = std::mem::size_of::<T>();
        let error = self.error_at(offset, format!("cannot decode {size}-byte struct"));
        let bytes = self.read_bytes(size)?;
        T::read_from_bytes(bytes).map_err(|_| error)
    }
}

impl fmt::Debug for ByteArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteArchive")
            .field("name", &self.name)
            .field("position", &self.position)
            .field("len", &self.data().len())
            .field("versions", &self.versions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive(data: &[u8]) -> ByteArchive {
        ByteArchive::from_bytes("test", data.to_vec())
    }

    #[test]
    fn test_read_primitives() {
        let mut ar = archive(&[
            0x01, 0x02, 0x03, 0x04, // u32: 0x04030201
            0xFF, 0xFF, 0xFF, 0xFF, // i32: -1
        ]);

        assert_eq!(ar.read_u32().unwrap(), 0x04030201);
        assert_eq!(ar.read_i32().unwrap(), -1);
        assert!(ar.is_empty());
    }

    #[test]
    fn test_eof_error_carries_name_and_offset() {
        let mut ar = archive(&[0x01, 0x02, 0x03]);
        ar.advance(1);

        match ar.read_u32() {
            Err(Error::Parse { archive, offset, .. }) => {
                assert_eq!(archive, "test");
                assert_eq!(offset, 1);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_negative_read_size() {
        let ar = archive(&[0; 8]);
        assert!(ar.check_read_size(-1).is_err());
    }

    #[test]
    fn test_empty_read_past_end() {
        let mut ar = archive(&[0; 8]);
        ar.seek(1000);
        assert!(ar.read_bytes(0).is_err());
        assert!(ar.peek_bytes(0).is_err());
        assert!(ar.read_vec_at(64, 0).is_err());

        ar.seek(8);
        assert!(ar.read_bytes(0).unwrap().is_empty());
    }

    #[test]
    fn test_read_struct() {
        let mut ar = archive(&[1, 0, 0, 0, 2, 0, 0, 0, 3]);
        let pair: [u32; 2] = ar.read_struct().unwrap();
        assert_eq!(pair, [1, 2]);
        assert_eq!(ar.position(), 8);
        assert!(ar.read_struct::<u32>().is_err());
        assert_eq!(ar.position(), 8);
    }

    #[test]
    fn test_read_bool_strict() {
        let mut ar = archive(&[0, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0]);
        assert!(!ar.read_bool().unwrap());
        assert!(ar.read_bool().unwrap());

        let err = ar.read_bool().unwrap_err();
        assert!(err.to_string().contains("invalid bool value (2)"));
    }

    #[test]
    fn test_read_ansi_fstring() {
        let mut data = 6i32.to_le_bytes().to_vec();
        data.extend_from_slice(b"Hello\0");
        let mut ar = archive(&data);

        assert_eq!(ar.read_fstring().unwrap(), "Hello");
        assert!(ar.is_empty());
    }

    #[test]
    fn test_read_utf16_fstring() {
        let text: Vec<u16> = "Grüße\0".encode_utf16().collect();
        let mut data = (-(text.len() as i32)).to_le_bytes().to_vec();
        for unit in &text {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        let mut ar = archive(&data);

        assert_eq!(ar.read_fstring().unwrap(), "Grüße");
        assert!(ar.is_empty());
    }

    #[test]
    fn test_read_empty_fstring() {
        let mut ar = archive(&0i32.to_le_bytes());
        assert_eq!(ar.read_fstring().unwrap(), "");
    }

    #[test]
    fn test_fstring_length_out_of_range() {
        let mut data = 1_000i32.to_le_bytes().to_vec();
        data.extend_from_slice(b"abc\0");
        assert!(archive(&data).read_fstring().is_err());

        let mut ar = archive(&i32::MIN.to_le_bytes());
        assert!(ar.read_fstring().is_err());

        let mut ar = archive(&(-100i32).to_le_bytes());
        assert!(ar.read_fstring().is_err());
    }

    #[test]
    fn test_read_packed_u32() {
        // 300 = 0b1_0010_1100 -> chunks 0b0101100 (more), 0b10
        let mut ar = archive(&[(0b010_1100 << 1) | 1, 0b10 << 1, 5 << 1]);
        assert_eq!(ar.read_packed_u32().unwrap(), 300);
        assert_eq!(ar.read_packed_u32().unwrap(), 5);
    }

    #[test]
    fn test_read_counted_array() {
        let mut data = 3i32.to_le_bytes().to_vec();
        for v in [7u32, 8, 9] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let mut ar = archive(&data);

        let values = ar.read_counted_array(|ar| ar.read_u32()).unwrap();
        assert_eq!(values, vec![7, 8, 9]);
    }

    #[test]
    fn test_negative_count_rejected() {
        let mut ar = archive(&(-2i32).to_le_bytes());
        assert!(ar.read_counted_array(|ar| ar.read_u8()).is_err());
    }

    #[test]
    fn test_clone_has_independent_cursor() {
        let mut ar = archive(&[1, 2, 3, 4]);
        ar.advance(2);

        let mut fork = ar.clone();
        assert_eq!(fork.read_u8().unwrap(), 3);
        assert_eq!(ar.position(), 2);
        assert_eq!(ar.read_u8().unwrap(), 3);
    }

    #[test]
    fn test_seek_relative_before_start() {
        let mut ar = archive(&[0; 4]);
        assert!(ar.seek_relative(-1).is_err());
        ar.seek(2);
        ar.seek_relative(-2).unwrap();
        assert_eq!(ar.position(), 0);
    }
}
