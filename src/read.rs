//! The read path (spec §4.4): chunk lookup, fetch, decompress/verify, and
//! sub-chunk slicing for `read(offset, len)`.
//!
//! Generalizes the teacher's `ewf_read`/`ewf_seek`, which fetched and
//! decompressed a chunk but never checked its Adler-32 trailer nor recorded
//! anything when it was wrong. Kept as free functions over borrowed state
//! (geometry, offset table, segments, cache, CRC-error list) rather than a
//! struct of its own, since all of that state is already owned by
//! [`crate::handle::Handle`] and there is exactly one reader per handle.

use crate::chunk::{self, ChunkCache};
use crate::error::Result;
use crate::geometry::MediaGeometry;
use crate::offset_table::OffsetTable;
use crate::sector_errors::SectorErrorList;
use crate::segment_table::SegmentTable;
use std::io::{Read, Seek, SeekFrom};

/// Fill `buf` starting at media byte offset `start_offset`, returning the
/// number of bytes actually copied (short at end-of-media, never an error).
#[allow(clippy::too_many_arguments)]
pub fn read_range(
    buf: &mut [u8],
    start_offset: u64,
    geometry: &MediaGeometry,
    offset_table: &OffsetTable,
    segments: &mut SegmentTable,
    cache: &mut ChunkCache,
    crc_errors: &mut SectorErrorList,
    wipe_on_error: bool,
) -> Result<usize> {
    let media_size = geometry.media_size();
    if start_offset >= media_size || buf.is_empty() {
        return Ok(0);
    }
    let chunk_size = geometry.chunk_size() as u64;

    let mut offset = start_offset;
    let mut written = 0usize;
    while written < buf.len() && offset < media_size {
        let chunk_index = (offset / chunk_size) as usize;
        let intra = (offset % chunk_size) as usize;

        ensure_chunk_cached(
            chunk_index,
            geometry,
            offset_table,
            segments,
            cache,
            crc_errors,
            wipe_on_error,
        )?;
        let decoded = cache.get(chunk_index).expect("just cached");

        let available = decoded.len().saturating_sub(intra);
        let wanted = buf.len() - written;
        let remaining_in_media = (media_size - offset) as usize;
        let to_copy = wanted.min(available).min(remaining_in_media);
        if to_copy == 0 {
            break;
        }
        buf[written..written + to_copy].copy_from_slice(&decoded[intra..intra + to_copy]);
        written += to_copy;
        offset += to_copy as u64;
    }
    Ok(written)
}

/// Ensure `chunk_index`'s decoded bytes are in `cache`, fetching and
/// decoding them from the owning segment if they are not already there.
/// On an uncompressed chunk's CRC mismatch, records the bad sector range and
/// optionally zeroes the cached copy, per spec §4.4 point 4 / §4.7.
#[allow(clippy::too_many_arguments)]
fn ensure_chunk_cached(
    chunk_index: usize,
    geometry: &MediaGeometry,
    offset_table: &OffsetTable,
    segments: &mut SegmentTable,
    cache: &mut ChunkCache,
    crc_errors: &mut SectorErrorList,
    wipe_on_error: bool,
) -> Result<()> {
    if cache.get(chunk_index).is_some() {
        return Ok(());
    }

    let entry = offset_table.get(chunk_index)?;
    let file = segments.get_mut(entry.segment_index)?;
    file.seek(SeekFrom::Start(entry.file_offset))?;
    let mut raw = vec![0u8; entry.size as usize];
    file.read_exact(&mut raw)?;

    let decoded = chunk::decode_chunk(&raw, entry.compressed)?;
    let mut data = decoded.data;

    if !decoded.crc_ok {
        let start_sector = chunk_index as u64 * geometry.sectors_per_chunk as u64;
        crc_errors.add(start_sector, geometry.sectors_per_chunk);
        if wipe_on_error {
            data.iter_mut().for_each(|b| *b = 0);
        }
    }

    cache.store(chunk_index, data);
    Ok(())
}
