//! Pluggable body compression.
//!
//! The compressor is negotiated once per connection during STARTUP and then
//! handed to the [`Framer`](crate::framer::Framer). STARTUP and OPTIONS bodies
//! are never compressed.
//!
//! Three codecs ship: `deflate` (flate2), `snappy` (snap) and `lz4`
//! (lz4_flex). Every decompressor refuses output larger than
//! [`MAX_FRAME_SIZE`].

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::MAX_FRAME_SIZE;

/// Body compression capability.
pub trait Compressor: Send + Sync + std::fmt::Debug {
    /// Name advertised in the STARTUP `COMPRESSION` option.
    fn name(&self) -> &'static str;

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>>;
}

/// zlib/deflate compressor backed by flate2.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCompressor {
    level: Compression,
}

impl DeflateCompressor {
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    /// Levels above 9 are clamped.
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for DeflateCompressor {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(input.len() / 2), self.level);
        encoder
            .write_all(input)
            .map_err(|e| Error::Compression(e.to_string()))?;
        encoder.finish().map_err(|e| Error::Compression(e.to_string()))
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        // Bound the output so a small hostile body cannot inflate past the
        // frame limit.
        let limit = MAX_FRAME_SIZE as u64 + 1;
        let mut out = Vec::new();
        ZlibDecoder::new(input)
            .take(limit)
            .read_to_end(&mut out)
            .map_err(|e| Error::Decompression(e.to_string()))?;
        if out.len() > MAX_FRAME_SIZE {
            return Err(Error::Decompression(format!(
                "decompressed body exceeds {MAX_FRAME_SIZE} bytes"
            )));
        }
        Ok(out)
    }
}

/// Snappy raw block compressor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnappyCompressor;

impl Compressor for SnappyCompressor {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(input)
            .map_err(|e| Error::Compression(e.to_string()))
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let len = snap::raw::decompress_len(input).map_err(|e| Error::Decompression(e.to_string()))?;
        check_output_len(len)?;
        snap::raw::Decoder::new()
            .decompress_vec(input)
            .map_err(|e| Error::Decompression(e.to_string()))
    }
}

/// LZ4 block compressor.
///
/// The block is prefixed with the uncompressed length as a big-endian
/// `[int]`, the layout the native protocol uses for `lz4`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        check_output_len(input.len())?;
        let block = lz4_flex::block::compress(input);
        let mut out = Vec::with_capacity(4 + block.len());
        out.extend_from_slice(&(input.len() as u32).to_be_bytes());
        out.extend_from_slice(&block);
        Ok(out)
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        if input.len() < 4 {
            return Err(Error::Decompression(format!(
                "lz4 body of {} bytes has no length prefix",
                input.len()
            )));
        }
        let (prefix, block) = input.split_at(4);
        let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        check_output_len(len)?;
        let out = lz4_flex::block::decompress(block, len)
            .map_err(|e| Error::Decompression(e.to_string()))?;
        if out.len() != len {
            return Err(Error::Decompression(format!(
                "lz4 body inflated to {} bytes, prefix says {len}",
                out.len()
            )));
        }
        Ok(out)
    }
}

fn check_output_len(len: usize) -> Result<()> {
    if len > MAX_FRAME_SIZE {
        return Err(Error::Decompression(format!(
            "decompressed body exceeds {MAX_FRAME_SIZE} bytes"
        )));
    }
    Ok(())
}
