//! The chunk codec: compress/verify on write, decompress/verify on read,
//! plus the one-chunk cache both paths share (spec §4.4, §4.5).
//!
//! Generalizes the teacher's inline `read_chunk` (which only handled the
//! compressed case and skipped verification) and its `ChunkCache`, adding
//! the uncompressed Adler-32 trailer check spec §4.4 point 3 requires.

use crate::compression::{self, CompressionLevel};
use crate::crc;
use crate::error::{EwfError, Result};

/// A decoded chunk payload plus whether its integrity check passed.
///
/// Compressed chunks are either fully trusted (`crc_ok = true`, deflate
/// self-checks its own stream) or a hard `Err` if inflate fails. Uncompressed
/// chunks always decode — a trailer mismatch is recoverable (spec §4.4 point
/// 4, §7 point 5), so it comes back as `crc_ok = false` with the payload
/// bytes still populated rather than as an `Err`.
pub struct DecodedChunk {
    pub data: Vec<u8>,
    pub crc_ok: bool,
}

/// Decode one chunk's on-disk bytes into its decompressed payload,
/// verifying integrity according to whether it was stored compressed.
///
/// * Compressed chunks: no trailing checksum is stored on disk — deflate's
///   own stream validates itself, so a failed inflate surfaces as
///   `ChunkCorrupt` (spec §4.4 point 3).
/// * Uncompressed chunks: the last 4 bytes are a little-endian Adler-32 of
///   the preceding payload, seeded at 1 (spec §4.4 point 3, §6).
pub fn decode_chunk(raw: &[u8], compressed: bool) -> Result<DecodedChunk> {
    if compressed {
        let data = compression::inflate(raw)?;
        return Ok(DecodedChunk { data, crc_ok: true });
    }
    if raw.len() < 4 {
        return Err(EwfError::chunk_corrupt(
            "chunk",
            "uncompressed chunk shorter than its trailing checksum",
        ));
    }
    let (data, trailer) = raw.split_at(raw.len() - 4);
    let stored = u32::from_le_bytes(trailer.try_into().unwrap());
    let computed = crc::adler32(data);
    Ok(DecodedChunk {
        data: data.to_vec(),
        crc_ok: stored == computed,
    })
}

/// Encode one chunk of plaintext for writing. Returns `(bytes, compressed)`:
/// deflate is attempted first (falling back to the `compress_empty_block`
/// fast path at `CompressionLevel::None`), and the compressed form is kept
/// only if it is strictly smaller than `full_chunk_size - 4` (spec §4.5
/// point 2 — leaves room for the no-CRC advantage of compressing); the last,
/// possibly short, chunk of an image still compares against the nominal
/// `full_chunk_size`, not its own shorter length. Otherwise the plaintext is
/// stored verbatim with an appended Adler-32 trailer.
pub fn encode_chunk(data: &[u8], level: CompressionLevel, full_chunk_size: usize) -> (Vec<u8>, bool) {
    if let Some(compressed) = compression::deflate(data, level) {
        if compressed.len() < full_chunk_size.saturating_sub(4) {
            return (compressed, true);
        }
    }
    let mut out = Vec::with_capacity(data.len() + 4);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc::adler32(data).to_le_bytes());
    (out, false)
}

/// Single-chunk read-ahead cache, mirroring the teacher's `ChunkCache` but
/// without the read pointer (the read path tracks its own position).
#[derive(Debug, Clone, Default)]
pub struct ChunkCache {
    chunk_index: Option<usize>,
    data: Vec<u8>,
}

impl ChunkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chunk_index: usize) -> Option<&[u8]> {
        if self.chunk_index == Some(chunk_index) {
            Some(&self.data)
        } else {
            None
        }
    }

    pub fn store(&mut self, chunk_index: usize, data: Vec<u8>) {
        self.chunk_index = Some(chunk_index);
        self.data = data;
    }

    pub fn invalidate(&mut self) {
        self.chunk_index = None;
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncompressed_chunk_roundtrips() {
        let data = vec![1u8, 2, 3, 4, 5];
        let (encoded, compressed) = encode_chunk(&data, CompressionLevel::None, 32 * 1024);
        assert!(!compressed);
        let decoded = decode_chunk(&encoded, false).unwrap();
        assert!(decoded.crc_ok);
        assert_eq!(decoded.data, data);
    }

    #[test]
    fn tampered_uncompressed_chunk_fails_adler_check_but_still_decodes() {
        let data = vec![9u8; 16];
        let (mut encoded, _) = encode_chunk(&data, CompressionLevel::None, 32 * 1024);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        let decoded = decode_chunk(&encoded, false).unwrap();
        assert!(!decoded.crc_ok);
        assert_eq!(decoded.data, data);
    }

    #[test]
    fn inflate_failure_on_a_compressed_chunk_is_a_hard_error() {
        let err = decode_chunk(&[0xff, 0xff, 0xff, 0xff], true).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ChunkCorrupt);
    }

    #[test]
    fn uniform_chunk_compresses_at_any_level() {
        let data = vec![0u8; 4096];
        let (_, compressed) = encode_chunk(&data, CompressionLevel::None, 4096);
        assert!(compressed);
    }

    #[test]
    fn cache_hit_and_invalidate() {
        let mut cache = ChunkCache::new();
        cache.store(5, vec![1, 2, 3]);
        assert_eq!(cache.get(5), Some(&[1, 2, 3][..]));
        assert_eq!(cache.get(6), None);
        cache.invalidate();
        assert_eq!(cache.get(5), None);
    }
}
