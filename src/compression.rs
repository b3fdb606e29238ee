//! Chunk (de)compression, pluggable per spec §1 ("deflate... treated as a
//! pluggable primitive"). The default implementation wraps `flate2`, the
//! compression crate the teacher already depends on (its
//! `EwfHeaderSection::new` and `read_chunk` both build a
//! `flate2::read::ZlibDecoder`).

use crate::error::{EwfError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compression level requested for a write session. `None` disables deflate
/// entirely except for the `compress_empty_block` fast path (spec §4.5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    None,
    Fast,
    Best,
}

impl CompressionLevel {
    fn to_flate2(self) -> Compression {
        match self {
            CompressionLevel::None => Compression::none(),
            CompressionLevel::Fast => Compression::fast(),
            CompressionLevel::Best => Compression::best(),
        }
    }
}

/// Inflate a zlib-wrapped chunk payload into `chunk_size` bytes.
///
/// Per spec §4.4 point 3, a trailing CRC is *not* present on compressed
/// chunks — deflate already self-checks via zlib's own Adler-32 trailer,
/// so inflate failure alone is the signal, surfaced as `ChunkCorrupt`.
pub fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EwfError::chunk_corrupt("compression", e.to_string()))?;
    Ok(out)
}

/// Deflate `data` at `level`. Returns `None` if `level` is `None` and the
/// data is not all-identical-bytes (the `compress_empty_block` fast path).
pub fn deflate(data: &[u8], level: CompressionLevel) -> Option<Vec<u8>> {
    if level == CompressionLevel::None && !is_uniform(data) {
        return None;
    }
    let effective = if level == CompressionLevel::None {
        CompressionLevel::Best
    } else {
        level
    };
    let mut encoder = ZlibEncoder::new(Vec::new(), effective.to_flate2());
    encoder.write_all(data).ok()?;
    encoder.finish().ok()
}

/// True if every byte in `data` is identical — sparse/zeroed chunks collapse
/// to a handful of deflate bytes, so spec §4.5.3 asks us to compress these
/// even when the writer's overall compression level is `None`.
fn is_uniform(data: &[u8]) -> bool {
    match data.first() {
        None => true,
        Some(first) => data.iter().all(|b| b == first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_deflate_inflate() {
        let data = vec![7u8; 32 * 1024];
        let compressed = deflate(&data, CompressionLevel::Best).unwrap();
        assert!(compressed.len() < data.len());
        let decompressed = inflate(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn uniform_block_compresses_even_at_level_none() {
        let data = vec![0u8; 32 * 1024];
        let compressed = deflate(&data, CompressionLevel::None);
        assert!(compressed.is_some());
        assert!(compressed.unwrap().len() <= 40);
    }

    #[test]
    fn non_uniform_block_is_not_compressed_at_level_none() {
        let data: Vec<u8> = (0..32 * 1024u32).map(|i| (i % 251) as u8).collect();
        assert!(deflate(&data, CompressionLevel::None).is_none());
    }

    #[test]
    fn inflate_garbage_is_chunk_corrupt() {
        let err = inflate(&[0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ChunkCorrupt);
    }
}
