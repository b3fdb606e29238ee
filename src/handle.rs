//! The public handle: open/write state machine and I/O surface tying every
//! other module together (spec §4.6).
//!
//! Generalizes the teacher's `EWF` — a `Read`/`Seek` façade that eagerly
//! parses every segment into `HashMap`s on construction — into an explicit
//! state machine that also supports creating a brand-new image. The section
//! walk itself is unchanged in spirit (teacher's `parse_segment` loop), just
//! routed through [`crate::segment_file::walk`] instead of being inlined.

use crate::chunk::ChunkCache;
use crate::compression::CompressionLevel;
use crate::date_format::{DateFormat, DateFormatter, PassthroughFormatter};
use crate::error::{EwfError, ErrorKind, Result};
use crate::filename::{
    discover_segment_paths, DefaultFilenamePolicy, FilenameContext, FilenamePolicy,
};
use crate::format::Format;
use crate::geometry::{MediaGeometry, MediaType};
use crate::offset_table::OffsetTable;
use crate::read;
use crate::section::{self, HashSectionBody, SectionKind, VolumeSectionBody, SECTION_DESCRIPTOR_SIZE};
use crate::segment_file;
use crate::segment_table::SegmentTable;
use crate::sector_errors::SectorErrorList;
use crate::values::ValuesTable;
use crate::write::{FinalizeSummary, WriteSession};
use log::{debug, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, Read as IoRead, Result as IoResult, Seek as IoSeek, SeekFrom};
use std::path::{Path, PathBuf};

/// Where a [`Handle`] sits in its lifecycle (spec §4.6). A handle opened for
/// reading never leaves `OpenedRead`. A handle opened for writing starts in
/// `OpenedWrite`, where the ten `set_*` configuration methods are accepted,
/// and moves to `WriteInitialized` the moment the first byte is written or
/// `write_finalize` is called, freezing geometry/format from then on. A
/// handle opened for read-write (EXPANSION 4.6a) stays in `OpenedReadWrite`
/// for its whole life: reads are always served by the primary segments,
/// while writes are staged into a delta segment table the same way a plain
/// write handle stages into its primary one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    OpenedRead,
    OpenedWrite,
    OpenedReadWrite,
    WriteInitialized,
    Finalized,
    Closed,
}

/// Staged configuration for a write handle that hasn't produced its first
/// [`WriteSession`] yet — the ten `set_*` methods (spec §4.6) mutate this
/// (or `Handle::geometry`/`format` directly) until the session is built
/// lazily on first write.
struct PendingWrite {
    directory: PathBuf,
    base_stem: String,
    policy: Box<dyn FilenamePolicy>,
    compression_level: CompressionLevel,
    segment_file_size: u64,
}

/// One multi-segment EWF image, open for either reading or writing.
///
/// Read mode merges every segment's `header`/`header2`, `volume`/`disk`,
/// `table`/`table2` and `error2` sections into one in-memory view and
/// exposes `Read`/`Seek` over the whole image, exactly as the teacher's
/// `EWF` does. Write mode is a thin wrapper around [`WriteSession`] that
/// additionally owns the created segment files and their filenames.
pub struct Handle {
    state: State,
    geometry: MediaGeometry,
    format: Format,
    header_values: ValuesTable,
    segments: SegmentTable,
    offset_table: OffsetTable,
    cache: ChunkCache,
    acquiry_errors: SectorErrorList,
    crc_errors: SectorErrorList,
    wipe_on_error: bool,
    position: u64,
    md5: Option<[u8; 16]>,
    write_session: Option<WriteSession<File>>,
    finalize_summary: Option<FinalizeSummary>,
    date_formatter: Box<dyn DateFormatter>,
    pending_write: Option<PendingWrite>,
    forced_md5: Option<[u8; 16]>,
    guid_locked: bool,
    md5_locked: bool,
}

impl Handle {
    /// Cheaply check whether `path` starts with a valid EWF segment
    /// signature, without parsing anything else (spec §6 `check_signature`).
    pub fn check_signature(path: &Path) -> Result<bool> {
        let mut file = File::open(path)?;
        match segment_file::read_segment_header(&mut file) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::CorruptContainer => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Open every segment belonging to the same image as `first_segment_path`
    /// for reading (spec §4.6 `open`), discovering sibling segments the way
    /// the teacher's `find_files` does.
    pub fn open_read(first_segment_path: &Path, max_open_segments: Option<usize>) -> Result<Self> {
        let paths = discover_segment_paths(first_segment_path)?;
        Self::open_read_paths(paths, max_open_segments)
    }

    /// Open an explicit, already-ordered list of segment paths for reading.
    pub fn open_read_paths(paths: Vec<PathBuf>, max_open_segments: Option<usize>) -> Result<Self> {
        if paths.is_empty() {
            return Err(EwfError::invalid_argument(
                "handle",
                "no segment paths supplied",
            ));
        }

        let mut segments = SegmentTable::from_paths(paths.clone(), max_open_segments);
        let mut header_values = ValuesTable::new();
        let mut geometry: Option<MediaGeometry> = None;
        // No per-segment marker distinguishes output format on read; any
        // well-formed image is treated as EnCase5-shaped for section-plan
        // purposes (matching this crate's own default `create` format).
        let format = Format::EnCase5;
        let mut offset_table = OffsetTable::with_capacity(0);
        let mut acquiry_errors = SectorErrorList::new();
        let mut md5: Option<[u8; 16]> = None;
        let mut chunk_count = 0usize;

        for (segment_index, path) in paths.iter().enumerate() {
            let mut walker = File::open(path)?;
            let mut body_reader = walker.try_clone()?;
            let expected_number = (segment_index + 1) as u16;
            let declared_number = segment_file::read_segment_header(&mut walker)?;
            if declared_number != expected_number {
                return Err(EwfError::corrupt(
                    "handle",
                    format!(
                        "segment {} declares number {}, expected {}",
                        path.display(),
                        declared_number,
                        expected_number
                    ),
                ));
            }

            // One segment can hold several (sectors, table, table2) runs back
            // to back (spec §4.3 point b's max-offsets-per-table flush); each
            // run is folded into `offset_table` as soon as its `table2`
            // arrives, so `chunk_count` stays correct across runs rather than
            // only at the end of the segment.
            let mut raw_table: Option<Vec<u8>> = None;
            let mut raw_table2: Option<Vec<u8>> = None;
            let mut pending_sectors_end: Option<u64> = None;

            segment_file::walk(&mut walker, |descriptor, body_offset| {
                let body_len =
                    (descriptor.section_size.saturating_sub(SECTION_DESCRIPTOR_SIZE)) as usize;
                match &descriptor.kind {
                    SectionKind::Header => {
                        let raw = read_body(&mut body_reader, body_offset, body_len)?;
                        let decompressed = crate::compression::inflate(&raw)?;
                        header_values.extend(&ValuesTable::decode(&decompressed));
                    }
                    SectionKind::Header2 => {
                        let raw = read_body(&mut body_reader, body_offset, body_len)?;
                        let decompressed = crate::compression::inflate(&raw)?;
                        header_values.extend(&ValuesTable::decode(&decompressed));
                    }
                    SectionKind::Volume | SectionKind::Disk => {
                        let raw = read_body(&mut body_reader, body_offset, body_len)?;
                        let body = VolumeSectionBody::decode(&raw)?;
                        let decoded_geometry = MediaGeometry {
                            sectors_per_chunk: body.sectors_per_chunk,
                            bytes_per_sector: body.bytes_per_sector,
                            amount_of_sectors: body.amount_of_sectors as u64,
                            media_type: body.media_type.into(),
                            media_flags: crate::geometry::MediaFlags(body.media_flags),
                            error_granularity: body.error_granularity,
                            guid: body.guid,
                            chunk_count: (body.chunk_count as u64)
                                | ((body.chunk_count_high as u64) << 32),
                        };
                        if geometry.is_none() {
                            offset_table = OffsetTable::with_capacity(
                                decoded_geometry.amount_of_chunks() as usize,
                            );
                        }
                        geometry = Some(decoded_geometry);
                    }
                    SectionKind::Sectors => {
                        pending_sectors_end = Some(descriptor.next_section_offset);
                    }
                    SectionKind::Table => {
                        raw_table = Some(read_body(&mut body_reader, body_offset, body_len)?);
                    }
                    SectionKind::Table2 => {
                        raw_table2 = Some(read_body(&mut body_reader, body_offset, body_len)?);
                        let section_end = pending_sectors_end.take().unwrap_or(body_offset);
                        let ingested = ingest_one_table(
                            &mut offset_table,
                            chunk_count,
                            segment_index,
                            raw_table.take(),
                            raw_table2.take(),
                            section_end,
                        )?;
                        chunk_count += ingested;
                    }
                    SectionKind::Error2 => {
                        let raw = read_body(&mut body_reader, body_offset, body_len)?;
                        if let Ok(entries) = section::decode_error2_body(&raw) {
                            acquiry_errors = SectorErrorList::from_error2_entries(&entries);
                        } else {
                            warn!("handle: error2 section failed CRC, acquisition errors dropped");
                        }
                    }
                    SectionKind::Hash => {
                        let raw = read_body(&mut body_reader, body_offset, body_len)?;
                        if let Ok(body) = HashSectionBody::decode(&raw) {
                            md5 = Some(body.md5);
                        }
                    }
                    _ => {
                        // ltypes / ltree / session / xheader / xhash / digest:
                        // recognized but opaque (spec EXPANSION 4.1c).
                    }
                }
                Ok(())
            })?;

            // A lone `table` with no following `table2` (legacy single-table
            // segment, or one that ends right at `done`) still needs folding.
            if raw_table.is_some() {
                let section_end = pending_sectors_end.take().unwrap_or(0);
                let ingested = ingest_one_table(
                    &mut offset_table,
                    chunk_count,
                    segment_index,
                    raw_table.take(),
                    raw_table2.take(),
                    section_end,
                )?;
                chunk_count += ingested;
            }
        }

        let geometry = geometry.ok_or_else(|| {
            EwfError::corrupt("handle", "no volume/disk section found in any segment")
        })?;

        Ok(Self {
            state: State::OpenedRead,
            geometry,
            format,
            header_values,
            segments,
            offset_table,
            cache: ChunkCache::new(),
            acquiry_errors,
            crc_errors: SectorErrorList::new(),
            wipe_on_error: false,
            position: 0,
            md5,
            write_session: None,
            finalize_summary: None,
            date_formatter: Box::new(PassthroughFormatter),
            pending_write: None,
            forced_md5: None,
            guid_locked: false,
            md5_locked: false,
        })
    }

    /// Open an existing image's primary segments for reading while staging a
    /// separate delta segment table for new writes (spec §4.6
    /// `Opened(ReadWrite)`, EXPANSION 4.6a). Reads are always served from the
    /// primary segments opened here; `write`/`write_finalize` append instead
    /// to a fresh, independently-numbered segment set rooted at
    /// `delta_directory/delta_base_stem`, which `set_delta_segment_filename`
    /// can repoint before the first delta write.
    pub fn open_read_write(
        first_segment_path: &Path,
        delta_directory: &Path,
        delta_base_stem: &str,
        max_open_segments: Option<usize>,
    ) -> Result<Self> {
        let mut handle = Self::open_read(first_segment_path, max_open_segments)?;
        handle.state = State::OpenedReadWrite;
        handle.pending_write = Some(PendingWrite {
            directory: delta_directory.to_path_buf(),
            base_stem: delta_base_stem.to_string(),
            policy: Box::new(DefaultFilenamePolicy),
            compression_level: CompressionLevel::None,
            segment_file_size: 16 * 1024 * 1024,
        });
        Ok(handle)
    }

    /// Begin writing a brand-new image rooted at `directory/base_stem` (spec
    /// §4.6 `open` in write mode). Returns a handle in `Opened(Write)`: no
    /// segment file exists on disk yet — the first segment and its
    /// `header`/`header2`/`volume` sections are written lazily, on the first
    /// `write`/`write_finalize` call (spec §4.5 "Initialization").
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        directory: &Path,
        base_stem: &str,
        geometry: MediaGeometry,
        format: Format,
        compression_level: CompressionLevel,
        segment_file_size: u64,
        header_values: ValuesTable,
    ) -> Result<Self> {
        Self::create_with_policy(
            directory,
            base_stem,
            geometry,
            format,
            compression_level,
            segment_file_size,
            header_values,
            Box::new(DefaultFilenamePolicy),
        )
    }

    /// Same as [`Self::create`] but with a caller-supplied segment filename
    /// policy (spec §6 "filename generation callback"). The handle starts in
    /// `OpenedWrite`: no segment file exists yet, and the ten `set_*`
    /// configuration methods (spec §4.6) are accepted until the first
    /// `write`/`write_finalize` call lazily builds the actual
    /// [`WriteSession`], freezing geometry/format at that point
    /// (`OpenedWrite -> WriteInitialized`).
    #[allow(clippy::too_many_arguments)]
    pub fn create_with_policy(
        directory: &Path,
        base_stem: &str,
        geometry: MediaGeometry,
        format: Format,
        compression_level: CompressionLevel,
        segment_file_size: u64,
        header_values: ValuesTable,
        policy: Box<dyn FilenamePolicy>,
    ) -> Result<Self> {
        geometry.validate()?;
        Ok(Self {
            state: State::OpenedWrite,
            geometry,
            format,
            header_values,
            // A write handle streams into `WriteSession`'s own file handles;
            // `segments` is only ever populated by `open_read*` (reading back
            // a just-written image means closing and reopening it, as the
            // tests below do).
            segments: SegmentTable::empty(None, true),
            offset_table: OffsetTable::with_capacity(0),
            cache: ChunkCache::new(),
            acquiry_errors: SectorErrorList::new(),
            crc_errors: SectorErrorList::new(),
            wipe_on_error: false,
            position: 0,
            md5: None,
            write_session: None,
            finalize_summary: None,
            date_formatter: Box::new(PassthroughFormatter),
            pending_write: Some(PendingWrite {
                directory: directory.to_path_buf(),
                base_stem: base_stem.to_string(),
                policy,
                compression_level,
                segment_file_size,
            }),
            forced_md5: None,
            guid_locked: false,
            md5_locked: false,
        })
    }

    /// Build the real [`WriteSession`] from the staged [`PendingWrite`]
    /// config the first time it's needed — on the first `write` or on
    /// `write_finalize` if nothing was ever written (spec §8 scenario S1,
    /// an empty image that's finalized without a single `write` call).
    /// A no-op once the session already exists.
    fn ensure_write_session(&mut self) -> Result<()> {
        if self.write_session.is_some() {
            return Ok(());
        }
        let pending = self.pending_write.take().ok_or_else(|| {
            EwfError::invalid_argument("handle", "write called on a non-write handle")
        })?;
        let directory = pending.directory;
        let base_stem = pending.base_stem;
        let policy = pending.policy;

        let on_new_segment = move |segment_number: u16| -> Result<File> {
            let ctx = FilenameContext {
                base_stem: &base_stem,
                segment_number,
            };
            let filename = policy.filename(&ctx)?;
            let path = directory.join(filename);
            debug!("handle: creating segment {segment_number} at {}", path.display());
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            Ok(file)
        };

        let write_session = WriteSession::new(
            on_new_segment,
            self.geometry.clone(),
            self.format,
            pending.compression_level,
            pending.segment_file_size,
            &self.header_values,
        )?;
        self.write_session = Some(write_session);
        if self.state == State::OpenedWrite {
            self.state = State::WriteInitialized;
        }
        Ok(())
    }

    fn require_pre_write(&self) -> Result<()> {
        match self.state {
            State::OpenedWrite | State::OpenedReadWrite if self.write_session.is_none() => Ok(()),
            State::OpenedWrite | State::OpenedReadWrite => Err(EwfError::invalid_argument(
                "handle",
                "geometry/format is frozen after the first write",
            )),
            _ => Err(EwfError::invalid_argument(
                "handle",
                "setter is only valid on a handle opened for writing, before the first write",
            )),
        }
    }

    /// Spec §6 `set_sectors_per_chunk`.
    pub fn set_sectors_per_chunk(&mut self, value: u32) -> Result<()> {
        self.require_pre_write()?;
        self.geometry.sectors_per_chunk = value;
        Ok(())
    }

    /// Spec §6 `set_bytes_per_sector`.
    pub fn set_bytes_per_sector(&mut self, value: u32) -> Result<()> {
        self.require_pre_write()?;
        self.geometry.bytes_per_sector = value;
        Ok(())
    }

    /// Spec §6 `set_write_segment_file_size`.
    pub fn set_write_segment_file_size(&mut self, value: u64) -> Result<()> {
        self.require_pre_write()?;
        self.pending_write
            .as_mut()
            .ok_or_else(|| EwfError::invalid_argument("handle", "no pending write configuration"))?
            .segment_file_size = value;
        Ok(())
    }

    /// Spec §6 `set_guid`. Write-once: a second call is rejected.
    pub fn set_guid(&mut self, guid: [u8; 16]) -> Result<()> {
        self.require_pre_write()?;
        if self.guid_locked {
            return Err(EwfError::invalid_argument("handle", "guid is write-once"));
        }
        self.geometry.guid = guid;
        self.guid_locked = true;
        Ok(())
    }

    /// Spec §6 `set_md5_hash` — forces the finalized hash/digest sections to
    /// this value instead of the one computed from the written bytes (e.g.
    /// when re-wrapping media whose hash was already verified elsewhere).
    /// Write-once: a second call is rejected.
    pub fn set_md5_hash(&mut self, md5: [u8; 16]) -> Result<()> {
        self.require_pre_write()?;
        if self.md5_locked {
            return Err(EwfError::invalid_argument("handle", "md5 is write-once"));
        }
        self.forced_md5 = Some(md5);
        self.md5_locked = true;
        Ok(())
    }

    /// Spec §6 `set_write_compression_values`.
    pub fn set_write_compression_values(&mut self, level: CompressionLevel) -> Result<()> {
        self.require_pre_write()?;
        self.pending_write
            .as_mut()
            .ok_or_else(|| EwfError::invalid_argument("handle", "no pending write configuration"))?
            .compression_level = level;
        Ok(())
    }

    /// Spec §6 `set_write_media_type`.
    pub fn set_write_media_type(&mut self, media_type: MediaType) -> Result<()> {
        self.require_pre_write()?;
        self.geometry.media_type = media_type;
        Ok(())
    }

    /// Spec §6 `set_write_format`.
    pub fn set_write_format(&mut self, format: Format) -> Result<()> {
        self.require_pre_write()?;
        self.format = format;
        Ok(())
    }

    /// Spec §6 `set_write_input_size` — sets the total media size in bytes,
    /// deriving `amount_of_sectors` from the currently configured
    /// `bytes_per_sector`. Call after `set_bytes_per_sector`, if that's
    /// being overridden from its default.
    pub fn set_write_input_size(&mut self, total_bytes: u64) -> Result<()> {
        self.require_pre_write()?;
        if self.geometry.bytes_per_sector == 0 {
            return Err(EwfError::invalid_argument(
                "handle",
                "bytes_per_sector must be non-zero before set_write_input_size",
            ));
        }
        if total_bytes % self.geometry.bytes_per_sector as u64 != 0 {
            return Err(EwfError::invalid_argument(
                "handle",
                "input size is not a whole number of sectors",
            ));
        }
        self.geometry.amount_of_sectors = total_bytes / self.geometry.bytes_per_sector as u64;
        Ok(())
    }

    /// Spec §6 `set_write_error_granularity`.
    pub fn set_write_error_granularity(&mut self, value: u32) -> Result<()> {
        self.require_pre_write()?;
        self.geometry.error_granularity = value;
        Ok(())
    }

    /// Spec §6 `set_delta_segment_filename` (EXPANSION 4.6a) — repoints the
    /// delta segment table's directory/base stem at the parent directory and
    /// file stem of `path`.
    pub fn set_delta_segment_filename(&mut self, path: &Path) -> Result<()> {
        self.require_pre_write()?;
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let base_stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                EwfError::invalid_argument("handle", "delta segment filename has no usable stem")
            })?
            .to_string();
        let pending = self.pending_write.as_mut().ok_or_else(|| {
            EwfError::invalid_argument("handle", "no pending write configuration")
        })?;
        pending.directory = directory;
        pending.base_stem = base_stem;
        Ok(())
    }

    pub fn geometry(&self) -> &MediaGeometry {
        &self.geometry
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn header_values(&self) -> &ValuesTable {
        &self.header_values
    }

    pub fn acquiry_errors(&self) -> &SectorErrorList {
        &self.acquiry_errors
    }

    pub fn crc_errors(&self) -> &SectorErrorList {
        &self.crc_errors
    }

    pub fn md5(&self) -> Option<[u8; 16]> {
        self.md5.or_else(|| self.finalize_summary.map(|s| s.md5))
    }

    pub fn set_wipe_on_error(&mut self, wipe: bool) {
        self.wipe_on_error = wipe;
    }

    /// Copy `other`'s header values into this handle, preserving insertion
    /// order (spec §6 `copy_header_values`). Only meaningful before
    /// finalization on a write handle.
    pub fn copy_header_values(&mut self, other: &ValuesTable) -> Result<()> {
        if self.state == State::Finalized || self.state == State::Closed {
            return Err(EwfError::invalid_argument(
                "handle",
                "cannot set header values on a finalized or closed handle",
            ));
        }
        self.header_values.extend(other);
        Ok(())
    }

    /// Plug in a caller-supplied [`DateFormatter`] for [`Self::parse_header_values`]
    /// to use, replacing the default [`PassthroughFormatter`].
    pub fn set_date_formatter(&mut self, formatter: Box<dyn DateFormatter>) {
        self.date_formatter = formatter;
    }

    /// Reformat the known date-bearing header fields in place — `m`
    /// (acquisition date) and `u` (system date) — using the configured
    /// [`DateFormatter`] (spec §6 `parse_header_values`). `header_values`
    /// is already `header2`-over-`header` merged by `open_read` (teacher's
    /// later-parsed-wins precedent); `xheader` is opaque (EXPANSION 4.1c),
    /// so in practice this acts on whichever of `header`/`header2`
    /// contributed the field.
    pub fn parse_header_values(&mut self, date_format: DateFormat) -> Result<()> {
        for id in ["m", "u"] {
            if let Some(raw) = self.header_values.get(id) {
                let formatted = self.date_formatter.format(raw, date_format);
                self.header_values.set(id, formatted);
            }
        }
        Ok(())
    }

    /// Record one acquisition error (source-media read failure), deduping by
    /// `(start_sector, amount_of_sectors)` (spec §6 `add_acquiry_error`).
    pub fn add_acquiry_error(&mut self, start_sector: u64, amount_of_sectors: u32) {
        self.acquiry_errors.add(start_sector, amount_of_sectors);
    }

    /// Record one recoverable chunk CRC mismatch for bookkeeping (spec §6
    /// `add_crc_error`). The read path calls this automatically; exposed so
    /// a caller driving its own chunk I/O can do the same.
    pub fn add_crc_error(&mut self, start_sector: u64, amount_of_sectors: u32) {
        self.crc_errors.add(start_sector, amount_of_sectors);
    }

    /// Append plaintext bytes to a write handle (spec §4.5, §6 `write`). On
    /// a freshly created handle this is the `Opened(Write) -> WriteInitialized`
    /// transition that freezes geometry/format; on a read-write handle it
    /// streams into the delta segment table instead.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !matches!(
            self.state,
            State::OpenedWrite | State::OpenedReadWrite | State::WriteInitialized
        ) {
            return Err(EwfError::invalid_argument(
                "handle",
                "write called on a non-write handle or after finalize",
            ));
        }
        self.ensure_write_session()?;
        self.write_session.as_mut().unwrap().write(data)
    }

    /// Flush the final `table`, `error2`, `hash`/`digest` and `done`
    /// sections, moving the handle to `Finalized` (spec §4.5 "Finalization",
    /// §6 `write_finalize`). No further writes are accepted afterward. Valid
    /// even if `write` was never called (spec §8 scenario S1's empty image).
    pub fn write_finalize(&mut self) -> Result<FinalizeSummary> {
        if !matches!(
            self.state,
            State::OpenedWrite | State::OpenedReadWrite | State::WriteInitialized
        ) {
            return Err(EwfError::invalid_argument(
                "handle",
                "write_finalize called on a non-write handle",
            ));
        }
        self.ensure_write_session()?;
        let session = self.write_session.take().unwrap();
        let summary = session.finalize(&self.acquiry_errors, self.forced_md5)?;
        self.md5 = Some(summary.md5);
        self.finalize_summary = Some(summary);
        self.state = State::Finalized;
        Ok(summary)
    }

    /// Release every open segment file descriptor, implicitly finalizing
    /// first if the handle was still accepting writes (spec §4.6 `close`).
    /// Idempotent once closed.
    pub fn close(&mut self) -> Result<()> {
        if matches!(
            self.state,
            State::OpenedWrite | State::OpenedReadWrite | State::WriteInitialized
        ) {
            self.write_finalize()?;
        }
        self.segments = SegmentTable::empty(None, false);
        self.state = State::Closed;
        Ok(())
    }

    fn require_read_mode(&self) -> IoResult<()> {
        if !matches!(self.state, State::OpenedRead | State::OpenedReadWrite) {
            return Err(EwfError::invalid_argument(
                "handle",
                "read/seek is only valid on a handle opened for reading",
            )
            .into());
        }
        Ok(())
    }
}

/// Seek inside the closure reader's own file handle to read one section
/// body. Mirrors the teacher's per-section `file.try_clone()` + `seek` +
/// `read_exact` pattern, just against a dedicated reader instead of a fresh
/// clone each time.
fn read_body(reader: &mut File, body_offset: u64, len: usize) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(body_offset))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Fold one `table`/`table2` run into `offset_table`, preferring `table` and
/// falling back to `table2` on a CRC mismatch (spec §4.3); if both are
/// absent or corrupt, marks the best-effort-recovered chunk count
/// unavailable rather than failing the whole open.
fn ingest_one_table(
    offset_table: &mut OffsetTable,
    start_chunk: usize,
    segment_index: usize,
    raw_table: Option<Vec<u8>>,
    raw_table2: Option<Vec<u8>>,
    section_end: u64,
) -> Result<usize> {
    for raw in [raw_table.as_deref(), raw_table2.as_deref()]
        .into_iter()
        .flatten()
    {
        if let Ok((header, offsets)) = section::decode_table_body(raw) {
            offset_table.ingest_table(start_chunk, segment_index, &offsets, section_end)?;
            return Ok(header.amount_of_offsets as usize);
        }
    }
    let count = raw_table
        .as_deref()
        .or(raw_table2.as_deref())
        .and_then(|d| crate::section::TableHeader::decode(d).ok())
        .map(|h| h.amount_of_offsets as usize)
        .unwrap_or(0);
    if count > 0 {
        warn!("handle: table and table2 both failed CRC, marking {count} chunks unavailable");
        offset_table.mark_unavailable(start_chunk, count);
    }
    Ok(count)
}

impl IoRead for Handle {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.require_read_mode()?;
        let n = read::read_range(
            buf,
            self.position,
            &self.geometry,
            &self.offset_table,
            &mut self.segments,
            &mut self.cache,
            &mut self.crc_errors,
            self.wipe_on_error,
        )
        .map_err(io::Error::from)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl IoSeek for Handle {
    fn seek(&mut self, pos: SeekFrom) -> IoResult<u64> {
        self.require_read_mode()?;
        let media_size = self.geometry.media_size() as i64;
        let base = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(delta) => media_size + delta,
        };
        if base < 0 {
            return Err(EwfError::invalid_argument("handle", "seek before start of image").into());
        }
        self.position = base as u64;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{MediaFlags, MediaType};

    fn test_geometry(sectors_per_chunk: u32, bytes_per_sector: u32, amount_of_sectors: u64) -> MediaGeometry {
        MediaGeometry {
            sectors_per_chunk,
            bytes_per_sector,
            amount_of_sectors,
            media_type: MediaType::Fixed,
            media_flags: MediaFlags::new(true, true),
            error_granularity: 64,
            guid: [0u8; 16],
            chunk_count: 0,
        }
    }

    #[test]
    fn write_then_read_back_round_trips_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let geom = test_geometry(1, 16, 4); // 64 bytes, chunk_size = 16
        let mut values = ValuesTable::new();
        values.set("c", "case-1");

        let mut handle = Handle::create(
            dir.path(),
            "image",
            geom,
            Format::EnCase5,
            CompressionLevel::None,
            16 * 1024 * 1024,
            values,
        )
        .unwrap();
        let plaintext: Vec<u8> = (0u8..64).collect();
        handle.write(&plaintext).unwrap();
        let summary = handle.write_finalize().unwrap();
        assert_eq!(summary.amount_of_chunks_written, 4);
        handle.close().unwrap();

        let first_segment = dir.path().join("image.E01");
        assert!(Handle::check_signature(&first_segment).unwrap());

        let mut reader = Handle::open_read(&first_segment, None).unwrap();
        assert_eq!(reader.header_values().get("c"), Some("case-1"));
        assert_eq!(reader.md5(), Some(summary.md5));

        let mut read_back = vec![0u8; 64];
        reader.read_exact(&mut read_back).unwrap();
        assert_eq!(read_back, plaintext);
    }

    #[test]
    fn seek_from_end_lands_at_media_size_minus_delta() {
        let dir = tempfile::tempdir().unwrap();
        let geom = test_geometry(1, 16, 2); // 32 bytes
        let mut handle = Handle::create(
            dir.path(),
            "image",
            geom,
            Format::EnCase5,
            CompressionLevel::None,
            16 * 1024 * 1024,
            ValuesTable::new(),
        )
        .unwrap();
        handle.write(&[0xAAu8; 32]).unwrap();
        handle.write_finalize().unwrap();
        handle.close().unwrap();

        let mut reader = Handle::open_read(&dir.path().join("image.E01"), None).unwrap();
        let pos = reader.seek(SeekFrom::End(-8)).unwrap();
        assert_eq!(pos, 24);
        let mut buf = vec![0u8; 8];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, vec![0xAAu8; 8]);
    }

    #[test]
    fn acquiry_errors_dedup_across_three_distinct_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let geom = test_geometry(1, 16, 1);
        let mut handle = Handle::create(
            dir.path(),
            "image",
            geom,
            Format::EnCase5,
            CompressionLevel::None,
            16 * 1024 * 1024,
            ValuesTable::new(),
        )
        .unwrap();
        handle.add_acquiry_error(0, 1);
        handle.add_acquiry_error(10, 2);
        handle.add_acquiry_error(20, 1);
        assert_eq!(handle.acquiry_errors().len(), 3);
    }

    #[test]
    fn acquiry_errors_round_trip_through_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let geom = test_geometry(1, 16, 1);
        let mut handle = Handle::create(
            dir.path(),
            "image",
            geom,
            Format::EnCase5,
            CompressionLevel::None,
            16 * 1024 * 1024,
            ValuesTable::new(),
        )
        .unwrap();
        handle.add_acquiry_error(0, 1);
        handle.add_acquiry_error(10, 2);
        handle.add_acquiry_error(20, 1);
        handle.write(&[0u8; 16]).unwrap();
        handle.write_finalize().unwrap();
        handle.close().unwrap();

        let reader = Handle::open_read(&dir.path().join("image.E01"), None).unwrap();
        assert_eq!(reader.acquiry_errors().len(), 3);
    }

    struct UppercaseFormatter;
    impl DateFormatter for UppercaseFormatter {
        fn format(&self, raw_value: &str, _format: DateFormat) -> String {
            raw_value.to_uppercase()
        }
    }

    #[test]
    fn parse_header_values_reformats_only_the_known_date_fields() {
        let dir = tempfile::tempdir().unwrap();
        let geom = test_geometry(1, 16, 1);
        let mut values = ValuesTable::new();
        values.set("m", "2026 1 27");
        values.set("u", "2026 1 27");
        values.set("c", "case-1");

        let mut handle = Handle::create(
            dir.path(),
            "image",
            geom,
            Format::EnCase5,
            CompressionLevel::None,
            16 * 1024 * 1024,
            values,
        )
        .unwrap();
        handle.set_date_formatter(Box::new(UppercaseFormatter));
        handle.parse_header_values(DateFormat::Iso8601).unwrap();

        assert_eq!(handle.header_values().get("m"), Some("2026 1 27".to_uppercase()).as_deref());
        assert_eq!(handle.header_values().get("u"), Some("2026 1 27".to_uppercase()).as_deref());
        assert_eq!(handle.header_values().get("c"), Some("case-1"));
    }

    #[test]
    fn setters_before_first_write_configure_the_session_that_gets_built() {
        let dir = tempfile::tempdir().unwrap();
        let geom = test_geometry(1, 16, 0); // overridden below via set_write_input_size
        let mut handle = Handle::create(
            dir.path(),
            "image",
            geom,
            Format::EnCase5,
            CompressionLevel::None,
            16 * 1024 * 1024,
            ValuesTable::new(),
        )
        .unwrap();

        handle.set_sectors_per_chunk(2).unwrap();
        handle.set_bytes_per_sector(16).unwrap();
        handle.set_write_input_size(64).unwrap(); // 4 sectors of 16 bytes
        handle.set_guid([7u8; 16]).unwrap();
        handle.set_write_media_type(MediaType::Optical).unwrap();

        let plaintext: Vec<u8> = (0u8..64).collect();
        handle.write(&plaintext).unwrap();
        handle.write_finalize().unwrap();
        handle.close().unwrap();

        let mut reader = Handle::open_read(&dir.path().join("image.E01"), None).unwrap();
        assert_eq!(reader.geometry().sectors_per_chunk, 2);
        assert_eq!(reader.geometry().bytes_per_sector, 16);
        assert_eq!(reader.geometry().amount_of_sectors, 4);
        assert_eq!(reader.geometry().guid, [7u8; 16]);
        let mut read_back = vec![0u8; 64];
        reader.read_exact(&mut read_back).unwrap();
        assert_eq!(read_back, plaintext);
    }

    #[test]
    fn guid_and_md5_setters_are_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let geom = test_geometry(1, 16, 1);
        let mut handle = Handle::create(
            dir.path(),
            "image",
            geom,
            Format::EnCase5,
            CompressionLevel::None,
            16 * 1024 * 1024,
            ValuesTable::new(),
        )
        .unwrap();
        handle.set_guid([1u8; 16]).unwrap();
        assert!(handle.set_guid([2u8; 16]).is_err());
        handle.set_md5_hash([3u8; 16]).unwrap();
        assert!(handle.set_md5_hash([4u8; 16]).is_err());
    }

    #[test]
    fn setters_are_rejected_once_the_first_write_has_landed() {
        let dir = tempfile::tempdir().unwrap();
        let geom = test_geometry(1, 16, 1);
        let mut handle = Handle::create(
            dir.path(),
            "image",
            geom,
            Format::EnCase5,
            CompressionLevel::None,
            16 * 1024 * 1024,
            ValuesTable::new(),
        )
        .unwrap();
        handle.write(&[0u8; 16]).unwrap();
        assert!(handle.set_sectors_per_chunk(4).is_err());
        assert!(handle.set_guid([9u8; 16]).is_err());
    }

    #[test]
    fn set_md5_hash_overrides_the_finalized_hash() {
        let dir = tempfile::tempdir().unwrap();
        let geom = test_geometry(1, 16, 1);
        let mut handle = Handle::create(
            dir.path(),
            "image",
            geom,
            Format::EnCase5,
            CompressionLevel::None,
            16 * 1024 * 1024,
            ValuesTable::new(),
        )
        .unwrap();
        handle.set_md5_hash([0x42u8; 16]).unwrap();
        handle.write(&[0u8; 16]).unwrap();
        let summary = handle.write_finalize().unwrap();
        assert_eq!(summary.md5, [0x42u8; 16]);
        handle.close().unwrap();

        let reader = Handle::open_read(&dir.path().join("image.E01"), None).unwrap();
        assert_eq!(reader.md5(), Some([0x42u8; 16]));
    }

    #[test]
    fn read_write_handle_reads_primary_and_streams_writes_into_a_delta_segment() {
        let dir = tempfile::tempdir().unwrap();
        let geom = test_geometry(1, 16, 4); // 64 bytes
        let plaintext: Vec<u8> = (0u8..64).collect();
        let mut writer = Handle::create(
            dir.path(),
            "image",
            geom,
            Format::EnCase5,
            CompressionLevel::None,
            16 * 1024 * 1024,
            ValuesTable::new(),
        )
        .unwrap();
        writer.write(&plaintext).unwrap();
        writer.write_finalize().unwrap();
        writer.close().unwrap();

        let primary = dir.path().join("image.E01");
        let delta_dir = tempfile::tempdir().unwrap();
        let mut rw =
            Handle::open_read_write(&primary, delta_dir.path(), "image-delta", None).unwrap();

        let mut read_back = vec![0u8; 64];
        rw.read_exact(&mut read_back).unwrap();
        assert_eq!(read_back, plaintext);

        rw.write(&[0xCDu8; 16]).unwrap();
        rw.write_finalize().unwrap();
        rw.close().unwrap();

        // The delta segment is its own independently-numbered image; the
        // primary segment file on disk is untouched.
        let delta_segment = delta_dir.path().join("image-delta.E01");
        assert!(Handle::check_signature(&delta_segment).unwrap());
        assert!(Handle::check_signature(&primary).unwrap());
        let mut delta_reader = Handle::open_read(&delta_segment, None).unwrap();
        let mut delta_contents = vec![0u8; 16];
        delta_reader.read_exact(&mut delta_contents).unwrap();
        assert_eq!(delta_contents, vec![0xCDu8; 16]);
    }

    #[test]
    fn set_delta_segment_filename_repoints_the_delta_segment_set() {
        let dir = tempfile::tempdir().unwrap();
        let geom = test_geometry(1, 16, 1);
        let mut writer = Handle::create(
            dir.path(),
            "image",
            geom,
            Format::EnCase5,
            CompressionLevel::None,
            16 * 1024 * 1024,
            ValuesTable::new(),
        )
        .unwrap();
        writer.write(&[0u8; 16]).unwrap();
        writer.write_finalize().unwrap();
        writer.close().unwrap();

        let primary = dir.path().join("image.E01");
        let mut rw = Handle::open_read_write(&primary, dir.path(), "unused", None).unwrap();
        let retargeted = dir.path().join("retargeted");
        rw.set_delta_segment_filename(&retargeted).unwrap();
        rw.write(&[0xEEu8; 16]).unwrap();
        rw.write_finalize().unwrap();
        rw.close().unwrap();

        assert!(Handle::check_signature(&dir.path().join("retargeted.E01")).unwrap());
    }
}
