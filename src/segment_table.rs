//! The ordered collection of a multi-segment image's segment files (spec §3
//! "Segment table", §5 "fd budget / reopen-on-demand").
//!
//! The teacher keeps every segment open for the image's whole lifetime
//! (`Vec<File>` in `EWF`). That is fine for read-only casual inspection but
//! not for an image with thousands of segments, so this generalizes it with
//! an optional cap on simultaneously open file descriptors, reopening the
//! least-recently-used segment's path on demand when the cap is hit — the
//! same idea AD1-tools' `FileIoPool` exists for, expressed here without a
//! pool abstraction since one `SegmentTable` only ever serves one image.
//!
//! Read-write mode keeps a second, independently-rooted `SegmentTable` for
//! the delta (changed-sector) segment set (spec §4.6a); nothing here is
//! specific to the primary vs. delta role, so `Handle` simply owns two.

use crate::error::{EwfError, Result};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

/// Ordered segment paths plus a bounded pool of open file descriptors.
pub struct SegmentTable {
    paths: Vec<PathBuf>,
    open: Vec<Option<File>>,
    /// Indices into `open`, most-recently-used at the back. Used to pick an
    /// eviction candidate when `max_open` is reached.
    lru: VecDeque<usize>,
    max_open: Option<usize>,
    writable: bool,
}

impl SegmentTable {
    /// Build a segment table over already-known paths (read path: the
    /// result of [`crate::filename::discover_segment_paths`]).
    pub fn from_paths(paths: Vec<PathBuf>, max_open: Option<usize>) -> Self {
        let len = paths.len();
        Self {
            paths,
            open: (0..len).map(|_| None).collect(),
            lru: VecDeque::new(),
            max_open,
            writable: false,
        }
    }

    pub fn empty(max_open: Option<usize>, writable: bool) -> Self {
        Self {
            paths: Vec::new(),
            open: Vec::new(),
            lru: VecDeque::new(),
            max_open,
            writable,
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn path(&self, index: usize) -> Option<&PathBuf> {
        self.paths.get(index)
    }

    /// Append a brand-new segment (write path: a freshly created file whose
    /// header has already been written by the caller).
    pub fn push_open(&mut self, path: PathBuf, file: File) -> usize {
        let index = self.paths.len();
        self.paths.push(path);
        self.open.push(Some(file));
        self.touch(index);
        self.evict_if_over_budget();
        index
    }

    /// Borrow segment `index`'s file descriptor, opening (or reopening) it
    /// from its path if it was evicted or never opened.
    pub fn get_mut(&mut self, index: usize) -> Result<&mut File> {
        if index >= self.paths.len() {
            return Err(EwfError::invalid_argument(
                "segment_table",
                format!("segment index {index} out of range"),
            ));
        }
        if self.open[index].is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(self.writable)
                .open(&self.paths[index])?;
            self.open[index] = Some(file);
        }
        self.touch(index);
        self.evict_if_over_budget();
        Ok(self.open[index].as_mut().unwrap())
    }

    fn touch(&mut self, index: usize) {
        self.lru.retain(|&i| i != index);
        self.lru.push_back(index);
    }

    fn evict_if_over_budget(&mut self) {
        let Some(max_open) = self.max_open else {
            return;
        };
        let open_count = self.open.iter().filter(|f| f.is_some()).count();
        let mut open_count = open_count;
        while open_count > max_open {
            // Never evict the segment that was just touched (back of lru).
            if self.lru.len() <= 1 {
                break;
            }
            let victim = self.lru.pop_front().unwrap();
            if self.open[victim].take().is_some() {
                open_count -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reopens_an_evicted_segment_on_demand() {
        let dir = tempdir().unwrap();
        let mut table = SegmentTable::empty(Some(1), false);
        for i in 0..3 {
            let path = dir.path().join(format!("seg{i}.bin"));
            std::fs::write(&path, [i as u8]).unwrap();
            let file = OpenOptions::new().read(true).open(&path).unwrap();
            table.push_open(path, file);
        }
        // Budget is 1, so only the most recently pushed segment stays open;
        // asking for segment 0 must reopen it rather than fail.
        let mut buf = [0u8; 1];
        use std::io::Read;
        table.get_mut(0).unwrap().read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn out_of_range_index_is_invalid_argument() {
        let mut table = SegmentTable::empty(None, false);
        let err = table.get_mut(0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }
}
