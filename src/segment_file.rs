//! One physical segment file's signature, section walk and append protocol
//! (spec §4.2).
//!
//! Generalizes the teacher's `EwfHeader::new` (segment signature check) and
//! the `while` loop in `EWF::parse_segment` (section walk) into a reusable,
//! allocation-light driver that works over any `Read + Seek`/`Write + Seek`,
//! not just `std::fs::File` — the handle can exercise it in memory during
//! tests, matching spec §5's "single-threaded, blocking I/O against
//! anything `Read`/`Seek`" framing.

use crate::error::{EwfError, Result};
use crate::section::{SectionDescriptor, SectionKind, SECTION_DESCRIPTOR_SIZE};
use std::io::{Read, Seek, SeekFrom, Write};

/// `EVF\t\r\xff\0` — the teacher's `EWF_E01_SIGNATURE`.
pub const SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0d, 0x0a, 0xff, 0x00];

/// Size of the 13-byte segment header: 8-byte signature + 1 start-field +
/// 2-byte segment number + 2-byte zero field (teacher's `EwfHeader`).
pub const SEGMENT_HEADER_SIZE: u64 = 13;

/// Read and validate the 13-byte segment header at the start of the file,
/// returning the segment number (spec §4.2, teacher's `EwfHeader::new`).
pub fn read_segment_header<R: Read + Seek>(reader: &mut R) -> Result<u16> {
    reader.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; SEGMENT_HEADER_SIZE as usize];
    reader.read_exact(&mut buf)?;

    if buf[0..8] != SIGNATURE {
        return Err(EwfError::corrupt(
            "segment_file",
            "segment signature does not match the EWF/E01 signature",
        ));
    }
    if buf[8] != 1 {
        return Err(EwfError::corrupt(
            "segment_file",
            "segment header fields-start byte must be 1",
        ));
    }
    if buf[11..13] != [0, 0] {
        return Err(EwfError::corrupt(
            "segment_file",
            "segment header trailing field must be zero",
        ));
    }
    Ok(u16::from_le_bytes(buf[9..11].try_into().unwrap()))
}

/// Write the 13-byte segment header.
pub fn write_segment_header<W: Write + Seek>(writer: &mut W, segment_number: u16) -> Result<()> {
    let mut buf = [0u8; SEGMENT_HEADER_SIZE as usize];
    buf[0..8].copy_from_slice(&SIGNATURE);
    buf[8] = 1;
    buf[9..11].copy_from_slice(&segment_number.to_le_bytes());
    writer.seek(SeekFrom::Start(0))?;
    writer.write_all(&buf)?;
    Ok(())
}

/// Walk every section descriptor in a segment starting right after its
/// header, calling `visit` with `(descriptor, body_offset)` for each one.
/// Stops after visiting a `done` section (spec §4.2, teacher's
/// `parse_segment` loop) or once `next_section_offset` stalls/loops.
///
/// Also stops after visiting a `next` section, without treating that as
/// end-of-image: `next`'s own `next_section_offset` points past this
/// segment's physical end, into the following segment file, so the caller
/// (not this driver) is the one that knows how to keep going — by opening
/// the next path and walking it from its own header.
///
/// This is a "pure driver": it performs no interpretation of section
/// bodies itself, it only locates them (spec §4.2 design decision).
pub fn walk<R, F>(reader: &mut R, mut visit: F) -> Result<()>
where
    R: Read + Seek,
    F: FnMut(&SectionDescriptor, u64) -> Result<()>,
{
    let mut offset = SEGMENT_HEADER_SIZE;
    loop {
        let descriptor = SectionDescriptor::read(reader, offset)?;
        let body_offset = offset + SECTION_DESCRIPTOR_SIZE;
        visit(&descriptor, body_offset)?;

        if descriptor.kind == SectionKind::Done || descriptor.kind == SectionKind::Next {
            break;
        }
        if descriptor.next_section_offset <= offset {
            return Err(EwfError::corrupt(
                "segment_file",
                format!(
                    "section at {offset:#x} does not advance (next_section_offset {:#x})",
                    descriptor.next_section_offset
                ),
            ));
        }
        offset = descriptor.next_section_offset;
    }
    Ok(())
}

/// Append-only writer for one segment file, implementing the two patterns
/// spec §4.5 describes: small sections are fully buffered then written in
/// one shot, while the `sectors` section is written with a placeholder
/// descriptor that gets backpatched once its final size is known (so chunk
/// bytes can stream out without buffering the whole section in memory).
pub struct SegmentWriter<W> {
    writer: W,
    current_offset: u64,
    sectors_descriptor_offset: Option<u64>,
}

impl<W: Write + Seek> SegmentWriter<W> {
    pub fn new(writer: W, segment_number: u16) -> Result<Self> {
        let mut writer = writer;
        write_segment_header(&mut writer, segment_number)?;
        Ok(Self {
            writer,
            current_offset: SEGMENT_HEADER_SIZE,
            sectors_descriptor_offset: None,
        })
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Fully-buffered append: writes one section descriptor followed by
    /// `body`, leaving `current_offset` at the start of the next section.
    /// Used for every section except `sectors` (header, header2, volume,
    /// table, table2, error2, hash, digest, done, next).
    pub fn write_section(&mut self, kind: SectionKind, body: &[u8]) -> Result<u64> {
        let section_offset = self.current_offset;
        let next_section_offset = section_offset + SECTION_DESCRIPTOR_SIZE + body.len() as u64;
        let descriptor = SectionDescriptor {
            kind,
            next_section_offset,
            section_size: SECTION_DESCRIPTOR_SIZE + body.len() as u64,
        };
        descriptor.write_at(&mut self.writer, section_offset)?;
        self.writer.write_all(body)?;
        self.current_offset = next_section_offset;
        Ok(section_offset)
    }

    /// Reserve space for the `sectors` section descriptor, to be
    /// backpatched by [`Self::end_sectors_section`] once every chunk has
    /// been appended. Returns the section's start offset (its first chunk's
    /// data begins immediately after the 76-byte placeholder).
    pub fn begin_sectors_section(&mut self) -> Result<u64> {
        if self.sectors_descriptor_offset.is_some() {
            return Err(EwfError::invalid_argument(
                "segment_file",
                "begin_sectors_section called while one is already open",
            ));
        }
        let section_offset = self.current_offset;
        let placeholder = SectionDescriptor {
            kind: SectionKind::Sectors,
            next_section_offset: 0,
            section_size: 0,
        };
        placeholder.write_at(&mut self.writer, section_offset)?;
        self.current_offset = section_offset + SECTION_DESCRIPTOR_SIZE;
        self.sectors_descriptor_offset = Some(section_offset);
        Ok(section_offset)
    }

    /// Append one already-encoded chunk's bytes (compressed or raw, CRC
    /// already appended if applicable) to the currently open `sectors`
    /// section.
    pub fn append_chunk_bytes(&mut self, data: &[u8]) -> Result<u64> {
        if self.sectors_descriptor_offset.is_none() {
            return Err(EwfError::invalid_argument(
                "segment_file",
                "append_chunk_bytes called with no open sectors section",
            ));
        }
        let data_offset = self.current_offset;
        self.writer.seek(SeekFrom::Start(data_offset))?;
        self.writer.write_all(data)?;
        self.current_offset += data.len() as u64;
        Ok(data_offset)
    }

    /// Backpatch the `sectors` descriptor now that its final size is known.
    pub fn end_sectors_section(&mut self) -> Result<()> {
        let section_offset = self.sectors_descriptor_offset.take().ok_or_else(|| {
            EwfError::invalid_argument(
                "segment_file",
                "end_sectors_section called with no open sectors section",
            )
        })?;
        let descriptor = SectionDescriptor {
            kind: SectionKind::Sectors,
            next_section_offset: self.current_offset,
            section_size: self.current_offset - section_offset,
        };
        descriptor.write_at(&mut self.writer, section_offset)?;
        self.writer.seek(SeekFrom::Start(self.current_offset))?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::VolumeSectionBody;
    use std::io::Cursor;

    #[test]
    fn header_roundtrips() {
        let mut buf = Cursor::new(vec![0u8; SEGMENT_HEADER_SIZE as usize]);
        write_segment_header(&mut buf, 3).unwrap();
        assert_eq!(read_segment_header(&mut buf).unwrap(), 3);
    }

    #[test]
    fn rejects_bad_signature() {
        let buf = vec![0u8; SEGMENT_HEADER_SIZE as usize];
        let mut cursor = Cursor::new(buf);
        let err = read_segment_header(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptContainer);
    }

    #[test]
    fn walk_visits_every_section_and_stops_at_done() {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = SegmentWriter::new(&mut cursor, 1).unwrap();
        let volume = VolumeSectionBody {
            media_type: 1,
            chunk_count: 1,
            chunk_count_high: 0,
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            amount_of_sectors: 64,
            media_flags: 3,
            error_granularity: 64,
            guid: [0; 16],
        };
        writer.write_section(SectionKind::Volume, &volume.encode()).unwrap();
        writer.write_section(SectionKind::Done, &[]).unwrap();

        let mut visited = Vec::new();
        walk(&mut cursor, |descriptor, _offset| {
            visited.push(descriptor.kind.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(visited, vec![SectionKind::Volume, SectionKind::Done]);
    }

    #[test]
    fn sectors_section_backpatches_size_after_appends() {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = SegmentWriter::new(&mut cursor, 1).unwrap();
        writer.begin_sectors_section().unwrap();
        writer.append_chunk_bytes(&[1, 2, 3, 4]).unwrap();
        writer.append_chunk_bytes(&[5, 6]).unwrap();
        writer.end_sectors_section().unwrap();
        writer.write_section(SectionKind::Done, &[]).unwrap();

        let mut visited = Vec::new();
        walk(&mut cursor, |descriptor, _offset| {
            visited.push((descriptor.kind.clone(), descriptor.section_size));
            Ok(())
        })
        .unwrap();
        assert_eq!(visited[0].0, SectionKind::Sectors);
        assert_eq!(visited[0].1, SECTION_DESCRIPTOR_SIZE + 6);
    }

    #[test]
    fn walk_stops_at_next_without_following_it_into_the_next_segment() {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = SegmentWriter::new(&mut cursor, 1).unwrap();
        writer.write_section(SectionKind::Volume, &[]).unwrap();
        // A `next` section's own next_section_offset points into the
        // following segment file, far past this cursor's length.
        writer.write_section(SectionKind::Next, &[]).unwrap();

        let mut visited = Vec::new();
        walk(&mut cursor, |descriptor, _offset| {
            visited.push(descriptor.kind.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(visited, vec![SectionKind::Volume, SectionKind::Next]);
    }
}
