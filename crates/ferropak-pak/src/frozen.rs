//! Decoder for frozen memory images.
//!
//! A frozen image is an in-process data structure dumped byte for byte. Heap
//! pointers become offsets relative to the pointer field itself, so every
//! container type is a fixed-size header that refers to its elements
//! elsewhere in the image. Reading an element region always restores the
//! cursor to the end of the header.
//!
//! Header layouts (little-endian):
//!
//! ```text
//! pointer      u64   bit 0 frozen flag, offset in the upper bits
//! array        16    pointer, count i32, max i32 (count == max)
//! string       16    array of UTF-16 units, null-terminated
//! bit array    16    pointer, bit count i32, max bits i32
//! sparse array 40    array, allocation bit array, first free i32, free count i32
//! set          52    sparse array of (element, hash next i32, hash index i32), hash ptr u64, hash size i32
//! map          52    set of (key, value) pairs
//! ```

use ferropak_common::ByteArchive;

use crate::Result;

/// Size of an array header.
pub const ARRAY_HEADER_SIZE: u64 = 16;
/// Size of a string header.
pub const STRING_SIZE: u64 = ARRAY_HEADER_SIZE;
/// Size of a set or map header, padded to 8 bytes.
pub const SET_SIZE: u64 = 56;

/// Round up to the next multiple of 8.
#[inline]
pub const fn align8(value: u64) -> u64 {
    (value + 7) & !7
}

/// A decoded frozen pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrozenPtr {
    pub is_frozen: bool,
    /// Type index of the pointee, for layouts that record one.
    pub type_index: Option<u32>,
    /// Offset relative to the position of the pointer field.
    pub offset: i64,
}

impl FrozenPtr {
    /// Decode a packed pointer word.
    ///
    /// UE5-generation layouts keep a type index in bits 1-23 and the offset
    /// in the sign-extended upper 40 bits; older layouts use everything above
    /// bit 0 as the offset.
    pub fn decode(packed: u64, ue5: bool) -> Self {
        let signed = packed as i64;
        if ue5 {
            let raw_type = ((packed >> 1) & ((1 << 23) - 1)) as i64 - 1;
            Self {
                is_frozen: packed & 1 != 0,
                type_index: u32::try_from(raw_type).ok(),
                offset: signed >> 24,
            }
        } else {
            Self {
                is_frozen: packed & 1 != 0,
                type_index: None,
                offset: signed >> 1,
            }
        }
    }
}

/// Reader for frozen memory images.
pub struct FrozenArchive {
    ar: ByteArchive,
    ue5: bool,
}

impl FrozenArchive {
    /// Wrap an archive whose content is a frozen image.
    pub fn new(ar: ByteArchive) -> Self {
        let ue5 = ar.versions().is_ue5();
        Self { ar, ue5 }
    }

    /// Force the pointer layout regardless of the version context.
    pub fn with_pointer_layout(mut self, ue5: bool) -> Self {
        self.ue5 = ue5;
        self
    }

    /// The underlying archive.
    pub fn archive(&mut self) -> &mut ByteArchive {
        &mut self.ar
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.ar.position()
    }

    #[inline]
    pub fn seek(&mut self, position: u64) {
        self.ar.seek(position);
    }

    /// Skip forward to the next 8-byte boundary.
    pub fn align8(&mut self) {
        let aligned = align8(self.ar.position());
        self.ar.seek(aligned);
    }

    pub fn read_ptr(&mut self) -> Result<FrozenPtr> {
        Ok(FrozenPtr::decode(self.ar.read_u64()?, self.ue5))
    }

    /// Read an array header, returning the element region start and count.
    ///
    /// The pointer is not resolved when the array is empty.
    fn read_array_header(&mut self) -> Result<Option<(u64, usize)>> {
        let start = self.ar.position();
        let ptr = self.read_ptr()?;
        let count = self.ar.read_i32()?;
        let max = self.ar.read_i32()?;

        if count != max {
            return Err(self
                .ar
                .error_at(start, format!("frozen array count {count} differs from max {max}"))
                .into());
        }
        if count < 0 {
            return Err(self
                .ar
                .error_at(start, format!("negative frozen array count {count}"))
                .into());
        }
        if count == 0 {
            return Ok(None);
        }

        let data = start as i64 + ptr.offset;
        if data < 0 || data as u64 > self.ar.len() {
            return Err(self
                .ar
                .error_at(start, format!("frozen pointer offset {} leaves the image", ptr.offset))
                .into());
        }
        Ok(Some((data as u64, count as usize)))
    }

    /// Read an array of fixed-stride elements.
    pub fn read_array<T, F>(&mut self, stride: u64, mut read: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let Some((data, count)) = self.read_array_header()? else {
            return Ok(Vec::new());
        };
        let resume = self.ar.position();

        let mut out = Vec::with_capacity(count.min(self.ar.remaining()));
        for i in 0..count {
            self.ar.seek(data + i as u64 * stride);
            out.push(read(self)?);
        }

        self.ar.seek(resume);
        Ok(out)
    }

    /// Read a null-terminated UTF-16 string.
    pub fn read_fstring(&mut self) -> Result<String> {
        let start = self.ar.position();
        let Some((data, count)) = self.read_array_header()? else {
            return Ok(String::new());
        };
        if count <= 1 {
            return Ok(String::new());
        }
        let resume = self.ar.position();

        self.ar.seek(data);
        let units = self.ar.read_array(count - 1, |ar| ar.read_u16())?;
        self.ar.seek(resume);

        String::from_utf16(&units)
            .map_err(|_| self.ar.error_at(start, "frozen string is not valid UTF-16").into())
    }

    /// Read a bit array as one `bool` per bit.
    pub fn read_bit_array(&mut self) -> Result<Vec<bool>> {
        let start = self.ar.position();
        let ptr = self.read_ptr()?;
        let num_bits = self.ar.read_i32()?;
        let _max_bits = self.ar.read_i32()?;

        if num_bits < 0 {
            return Err(self
                .ar
                .error_at(start, format!("negative bit count {num_bits}"))
                .into());
        }
        if num_bits == 0 {
            return Ok(Vec::new());
        }
        let resume = self.ar.position();

        let num_bits = num_bits as usize;
        let words = num_bits.div_ceil(32);
        self.ar.seek((start as i64 + ptr.offset) as u64);
        let data = self.ar.read_array(words, |ar| ar.read_u32())?;
        self.ar.seek(resume);

        Ok((0..num_bits)
            .map(|i| data[i / 32] & (1 << (i % 32)) != 0)
            .collect())
    }

    /// Read the allocated slots of a sparse array.
    pub fn read_sparse_array<T, F>(&mut self, stride: u64, mut read: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let header = self.read_array_header()?;
        let allocated = self.read_bit_array()?;
        // first free index, free count
        self.ar.advance(8);

        let Some((data, count)) = header else {
            return Ok(Vec::new());
        };
        let resume = self.ar.position();

        let mut out = Vec::new();
        for i in 0..count {
            if !allocated.get(i).copied().unwrap_or(false) {
                continue;
            }
            self.ar.seek(data + i as u64 * stride);
            out.push(read(self)?);
        }

        self.ar.seek(resume);
        Ok(out)
    }

    /// Read a set whose elements occupy `element_size` bytes.
    pub fn read_set<T, F>(&mut self, element_size: u64, read: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let start = self.ar.position();
        let items = self.read_sparse_array(align8(element_size + 8), read)?;
        // hash pointer and hash size
        self.ar.seek(start + SET_SIZE);
        Ok(items)
    }

    /// Read a map of fixed-size keys and values.
    pub fn read_map<K, V, FK, FV>(
        &mut self,
        key_size: u64,
        value_size: u64,
        mut read_key: FK,
        mut read_value: FV,
    ) -> Result<Vec<(K, V)>>
    where
        FK: FnMut(&mut Self) -> Result<K>,
        FV: FnMut(&mut Self) -> Result<V>,
    {
        let value_offset = value_alignment(key_size, value_size);
        self.read_set(align8(value_offset + value_size), |fa| {
            let pair_start = fa.position();
            let key = read_key(fa)?;
            fa.seek(pair_start + value_offset);
            let value = read_value(fa)?;
            Ok((key, value))
        })
    }
}

/// Offset of a value following a key, aligned to the value's natural alignment.
fn value_alignment(key_size: u64, value_size: u64) -> u64 {
    let alignment = if value_size >= 8 { 8 } else { value_size.next_power_of_two().max(1) };
    (key_size + alignment - 1) / alignment * alignment
}
