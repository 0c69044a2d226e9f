//! Codec backends.

use std::io::{Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

use crate::{Error, Result};

/// A block codec.
///
/// `decompress` writes at most `dst.len()` bytes and returns how many it
/// produced. Producing more than fits is an error.
pub trait Codec: Send + Sync {
    /// Name used in error messages.
    fn name(&self) -> &str;

    /// Decode `src` into `dst`, returning the number of bytes produced.
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize>;

    /// Encode `src` at the given level.
    fn compress(&self, src: &[u8], level: i32) -> Result<Vec<u8>>;
}

fn decompression_error(method: &str, reason: impl ToString) -> Error {
    Error::Decompression {
        method: method.to_string(),
        reason: reason.to_string(),
    }
}

fn compression_error(method: &str, reason: impl ToString) -> Error {
    Error::Compression {
        method: method.to_string(),
        reason: reason.to_string(),
    }
}

/// Drain a streaming decoder into `dst`, failing if it has more to give.
fn read_bounded<R: Read>(method: &str, mut decoder: R, dst: &mut [u8]) -> Result<usize> {
    let mut produced = 0;
    while produced < dst.len() {
        let n = decoder
            .read(&mut dst[produced..])
            .map_err(|e| decompression_error(method, e))?;
        if n == 0 {
            return Ok(produced);
        }
        produced += n;
    }

    let mut extra = [0u8; 1];
    match decoder.read(&mut extra) {
        Ok(0) => Ok(produced),
        Ok(_) => Err(decompression_error(
            method,
            format!("output exceeds the {} byte destination", dst.len()),
        )),
        Err(e) => Err(decompression_error(method, e)),
    }
}

fn flate_level(level: i32) -> Compression {
    Compression::new(level.clamp(0, 9) as u32)
}

/// zlib-wrapped DEFLATE.
#[derive(Debug, Default)]
pub struct ZlibCodec;

impl Codec for ZlibCodec {
    fn name(&self) -> &str {
        "Zlib"
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        read_bounded(self.name(), ZlibDecoder::new(src), dst)
    }

    fn compress(&self, src: &[u8], level: i32) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), flate_level(level));
        encoder
            .write_all(src)
            .map_err(|e| compression_error(self.name(), e))?;
        encoder.finish().map_err(|e| compression_error(self.name(), e))
    }
}

/// gzip-wrapped DEFLATE.
#[derive(Debug, Default)]
pub struct GzipCodec;

impl Codec for GzipCodec {
    fn name(&self) -> &str {
        "Gzip"
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        read_bounded(self.name(), GzDecoder::new(src), dst)
    }

    fn compress(&self, src: &[u8], level: i32) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), flate_level(level));
        encoder
            .write_all(src)
            .map_err(|e| compression_error(self.name(), e))?;
        encoder.finish().map_err(|e| compression_error(self.name(), e))
    }
}

/// Zstandard frames.
#[derive(Debug, Default)]
pub struct ZstdCodec;

impl Codec for ZstdCodec {
    fn name(&self) -> &str {
        "Zstd"
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        zstd::bulk::decompress_to_buffer(src, dst).map_err(|e| decompression_error(self.name(), e))
    }

    fn compress(&self, src: &[u8], level: i32) -> Result<Vec<u8>> {
        zstd::bulk::compress(src, level).map_err(|e| compression_error(self.name(), e))
    }
}

/// Raw LZ4 blocks without a size prefix.
#[derive(Debug, Default)]
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn name(&self) -> &str {
        "LZ4"
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        lz4_flex::block::decompress_into(src, dst).map_err(|e| decompression_error(self.name(), e))
    }

    fn compress(&self, src: &[u8], _level: i32) -> Result<Vec<u8>> {
        Ok(lz4_flex::block::compress(src))
    }
}
