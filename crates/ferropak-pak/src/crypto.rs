//! Pak decryption using AES-256-ECB.
//!
//! Encrypted indices and payloads are processed one 16-byte block at a time
//! with no chaining and no padding. Buffers that are not block-aligned are
//! extended by tiling their own content before encryption.

use std::fmt;
use std::str::FromStr;

use aes::Aes256;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::{Error, Result};

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// A 256-bit AES key with its expanded cipher.
#[derive(Clone)]
pub struct AesKey {
    bytes: [u8; 32],
    cipher: Aes256,
}

impl AesKey {
    /// Create a key from exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::KeyFormat(format!("expected 32 bytes, got {}", bytes.len())))?;
        let cipher = Aes256::new_from_slice(&bytes)
            .map_err(|e| Error::KeyFormat(e.to_string()))?;
        Ok(Self { bytes, cipher })
    }

    /// Raw key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Whether this is the all-zero key.
    pub fn is_default(&self) -> bool {
        self.bytes == [0; 32]
    }

    /// Decrypt a block-aligned buffer in place.
    pub fn decrypt_in_place(&self, data: &mut [u8]) -> Result<()> {
        check_block_aligned(data.len())?;
        for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            self.cipher.decrypt_block(aes::Block::from_mut_slice(chunk));
        }
        Ok(())
    }

    /// Encrypt a block-aligned buffer in place.
    pub fn encrypt_in_place(&self, data: &mut [u8]) -> Result<()> {
        check_block_aligned(data.len())?;
        for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            self.cipher.encrypt_block(aes::Block::from_mut_slice(chunk));
        }
        Ok(())
    }

    /// Decrypt to a new buffer.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut buffer = data.to_vec();
        self.decrypt_in_place(&mut buffer)?;
        Ok(buffer)
    }

    /// Align by tiling, then encrypt to a new buffer.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut buffer = align_buffer(data, AES_BLOCK_SIZE);
        self.encrypt_in_place(&mut buffer)?;
        Ok(buffer)
    }
}

impl PartialEq for AesKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for AesKey {}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.write_str("AesKey(..)")
    }
}

impl FromStr for AesKey {
    type Err = Error;

    /// Parses 64 hex digits, with or without a `0x` prefix.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        if digits.len() != 64 {
            return Err(Error::KeyFormat(format!(
                "expected 64 hex digits, got {}",
                digits.len()
            )));
        }

        let bytes = hex::decode(digits).map_err(|e| Error::KeyFormat(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

fn check_block_aligned(len: usize) -> Result<()> {
    if len % AES_BLOCK_SIZE != 0 {
        return Err(Error::Cipher(format!(
            "data length {len} is not a multiple of {AES_BLOCK_SIZE} bytes"
        )));
    }
    Ok(())
}

/// Round `len` up to the next multiple of `alignment`.
#[inline]
pub fn align(len: u64, alignment: u64) -> u64 {
    (len + alignment - 1) / alignment * alignment
}

/// Pad `data` to a multiple of `alignment` by repeating its own content.
///
/// Already aligned input is returned unchanged, so the operation is idempotent.
pub fn align_buffer(data: &[u8], alignment: usize) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let aligned = align(data.len() as u64, alignment as u64) as usize;
    data.iter().copied().cycle().take(aligned).collect()
}

/// Decrypt if a key is present and the data is flagged encrypted.
pub(crate) fn decrypt_if_needed(
    data: Vec<u8>,
    encrypted: bool,
    key: Option<&AesKey>,
    missing_key: impl FnOnce() -> Error,
) -> Result<Vec<u8>> {
    if !encrypted {
        return Ok(data);
    }
    let key = key.ok_or_else(missing_key)?;
    let mut data = data;
    key.decrypt_in_place(&mut data)?;
    Ok(data)
}
