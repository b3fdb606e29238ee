//! The chunk offset table (spec §3 "Offset-table entry", §4.3).
//!
//! A dense array from global chunk index to physical location, rebuilt from
//! `table`/`table2` sections on read and grown in chunk-index order on
//! write. Generalizes the teacher's `parse_table` (which only produced a
//! `Vec<Chunk>` per segment, with no unavailable-range tracking and no
//! write side) and follows the global chunk-table shape AD1-tools' EWF
//! reader uses (`ChunkLocation` indexed by global chunk number rather than
//! per-segment).

use crate::error::{EwfError, Result};

/// Where one chunk physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetEntry {
    pub segment_index: usize,
    pub file_offset: u64,
    pub compressed: bool,
    pub size: u32,
}

/// Dense chunk_index -> location map. `None` means the chunk fell in a
/// range whose `table` *and* `table2` both failed CRC (spec §4.3): reads
/// of it fail with `ChunkUnavailable` rather than the whole image failing.
#[derive(Debug, Clone, Default)]
pub struct OffsetTable {
    entries: Vec<Option<OffsetEntry>>,
}

impl OffsetTable {
    pub fn with_capacity(amount_of_chunks: usize) -> Self {
        Self {
            entries: vec![None; amount_of_chunks],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `chunk_index`, failing with `ChunkUnavailable` if it was
    /// never resolved (spec §4.4 point 1 / §7 point 6).
    pub fn get(&self, chunk_index: usize) -> Result<OffsetEntry> {
        self.entries
            .get(chunk_index)
            .and_then(|e| *e)
            .ok_or_else(|| {
                EwfError::chunk_unavailable(
                    "offset_table",
                    format!("no table/table2 entry covers chunk {chunk_index}"),
                )
            })
    }

    /// Record one resolved chunk (used on both read, when a `table`
    /// section's CRC is valid, and write, where size is known immediately).
    pub fn set(&mut self, chunk_index: usize, entry: OffsetEntry) {
        if chunk_index >= self.entries.len() {
            self.entries.resize(chunk_index + 1, None);
        }
        self.entries[chunk_index] = Some(entry);
    }

    /// Mark `[start, start + count)` as unavailable — both `table` and
    /// `table2` failed CRC for this range (spec §4.3).
    pub fn mark_unavailable(&mut self, start: usize, count: usize) {
        if start + count > self.entries.len() {
            self.entries.resize(start + count, None);
        }
        for entry in &mut self.entries[start..start + count] {
            *entry = None;
        }
    }

    /// Ingest one parsed `table` section: `offsets` are the raw (file
    /// offset, compressed) pairs in on-disk order, already resolved to
    /// absolute file offsets via the section's `base_offset`. `section_end`
    /// is the offset immediately after the last chunk's payload (the end of
    /// the owning `sectors` section), used to size the final entry, per
    /// spec §4.3 ("the stored size of a chunk is derived from the *next*
    /// entry's offset").
    pub fn ingest_table(
        &mut self,
        start_chunk: usize,
        segment_index: usize,
        offsets: &[(u64, bool)],
        section_end: u64,
    ) -> Result<()> {
        for (i, &(file_offset, compressed)) in offsets.iter().enumerate() {
            let next_offset = offsets.get(i + 1).map(|&(o, _)| o).unwrap_or(section_end);
            if next_offset < file_offset {
                return Err(EwfError::corrupt(
                    "offset_table",
                    "table entries are not monotonically non-decreasing in file offset",
                ));
            }
            let size = (next_offset - file_offset) as u32;
            self.set(
                start_chunk + i,
                OffsetEntry {
                    segment_index,
                    file_offset,
                    compressed,
                    size,
                },
            );
        }
        Ok(())
    }

    /// Testable property §8.2: entries must be strictly increasing in
    /// `(segment, file_offset)` order across the whole table.
    pub fn is_strictly_ordered(&self) -> bool {
        let mut prev: Option<(usize, u64)> = None;
        for entry in self.entries.iter().flatten() {
            let key = (entry.segment_index, entry.file_offset);
            if let Some(p) = prev {
                if key <= p {
                    return false;
                }
            }
            prev = Some(key);
        }
        true
    }
}
