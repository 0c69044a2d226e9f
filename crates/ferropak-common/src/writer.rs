//! Little-endian binary writer mirroring [`ByteArchive`](crate::ByteArchive).

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::{Guid, Result, ShaHash};

/// Binary writer that tracks how many bytes it has emitted.
///
/// The position starts at a caller-supplied base so container writers can
/// record absolute offsets while streaming.
pub struct ArchiveWriter<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> ArchiveWriter<W> {
    /// Wrap a sink, starting at position 0.
    pub fn new(inner: W) -> Self {
        Self::with_position(inner, 0)
    }

    /// Wrap a sink whose first byte lands at `position`.
    pub fn with_position(inner: W, position: u64) -> Self {
        Self { inner, position }
    }

    /// Absolute position of the next byte.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Borrow the underlying sink.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Unwrap the underlying sink.
    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    /// Write `count` zero bytes.
    pub fn write_zeros(&mut self, count: usize) -> Result<()> {
        const ZEROS: [u8; 64] = [0; 64];
        let mut left = count;
        while left > 0 {
            let n = left.min(ZEROS.len());
            self.write_bytes(&ZEROS[..n])?;
            left -= n;
        }
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.inner.write_u8(value)?;
        self.position += 1;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.inner.write_u32::<LittleEndian>(value)?;
        self.position += 4;
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.inner.write_i32::<LittleEndian>(value)?;
        self.position += 4;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.inner.write_u64::<LittleEndian>(value)?;
        self.position += 8;
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.inner.write_i64::<LittleEndian>(value)?;
        self.position += 8;
        Ok(())
    }

    /// Write a 4-byte boolean (0 or 1).
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_i32(i32::from(value))
    }

    /// Write a 1-byte boolean (0 or 1).
    pub fn write_flag(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// Write a length-prefixed, null-terminated string.
    ///
    /// ASCII text uses the single-byte form with a positive length, anything
    /// else is written as UTF-16 with a negative length.
    pub fn write_fstring(&mut self, value: &str) -> Result<()> {
        if value.is_empty() {
            return self.write_i32(0);
        }

        if value.is_ascii() {
            self.write_i32(value.len() as i32 + 1)?;
            self.write_bytes(value.as_bytes())?;
            return self.write_u8(0);
        }

        let units: Vec<u16> = value.encode_utf16().chain(std::iter::once(0)).collect();
        self.write_i32(-(units.len() as i32))?;
        for unit in units {
            self.inner.write_u16::<LittleEndian>(unit)?;
            self.position += 2;
        }
        Ok(())
    }

    /// Write a 7-bit-chunked unsigned integer, low bit flagging continuation.
    pub fn write_packed_u32(&mut self, mut value: u32) -> Result<()> {
        loop {
            let chunk = ((value & 0x7F) as u8) << 1;
            value >>= 7;
            if value == 0 {
                return self.write_u8(chunk);
            }
            self.write_u8(chunk | 1)?;
        }
    }

    pub fn write_guid(&mut self, guid: &Guid) -> Result<()> {
        self.write_u32(guid.a)?;
        self.write_u32(guid.b)?;
        self.write_u32(guid.c)?;
        self.write_u32(guid.d)
    }

    pub fn write_hash(&mut self, hash: &ShaHash) -> Result<()> {
        self.write_bytes(hash.as_bytes())
    }
}
