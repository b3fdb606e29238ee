//! Section descriptor codec and typed section bodies (spec §4.1).
//!
//! Generalizes the teacher's `EwfSectionDescriptor` (which only read four of
//! the descriptor's fields and ignored its CRC) into a full codec that both
//! reads and writes, verifies the header CRC, and expresses the section
//! kind as a closed tagged enum rather than a raw string — matching
//! `TotalImage`'s `SectionType`/`E01SectionDescriptor` shape, which is the
//! most directly analogous prior art in this corpus.

use crate::crc;
use crate::error::{EwfError, Result};
use std::io::{Read, Seek, SeekFrom, Write};

/// Size, in bytes, of a section descriptor: 16 (type) + 8 (next offset) +
/// 8 (size) + 40 (reserved) + 4 (CRC-32) = 76. The teacher hard-codes this
/// as `0x4c` in `parse_segment`.
pub const SECTION_DESCRIPTOR_SIZE: u64 = 76;

/// Closed set of section types this container format defines (spec §4.1).
/// `Unknown` keeps the walker a "pure driver" (spec §4.2) even over a
/// section tag this crate doesn't otherwise interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionKind {
    Header,
    Header2,
    Volume,
    Disk,
    Sectors,
    Table,
    Table2,
    Next,
    Ltypes,
    Ltree,
    Session,
    Error2,
    Hash,
    Digest,
    Xheader,
    Xhash,
    Done,
    Unknown(String),
}

impl SectionKind {
    pub fn as_str(&self) -> &str {
        match self {
            SectionKind::Header => "header",
            SectionKind::Header2 => "header2",
            SectionKind::Volume => "volume",
            SectionKind::Disk => "disk",
            SectionKind::Sectors => "sectors",
            SectionKind::Table => "table",
            SectionKind::Table2 => "table2",
            SectionKind::Next => "next",
            SectionKind::Ltypes => "ltypes",
            SectionKind::Ltree => "ltree",
            SectionKind::Session => "session",
            SectionKind::Error2 => "error2",
            SectionKind::Hash => "hash",
            SectionKind::Digest => "digest",
            SectionKind::Xheader => "xheader",
            SectionKind::Xhash => "xhash",
            SectionKind::Done => "done",
            SectionKind::Unknown(tag) => tag.as_str(),
        }
    }

    pub fn from_tag(tag: &[u8; 16]) -> Self {
        let mut text = String::from_utf8_lossy(tag).into_owned();
        text.retain(|c| c != '\0');
        match text.as_str() {
            "header" => SectionKind::Header,
            "header2" => SectionKind::Header2,
            "volume" => SectionKind::Volume,
            "disk" => SectionKind::Disk,
            "sectors" => SectionKind::Sectors,
            "table" => SectionKind::Table,
            "table2" => SectionKind::Table2,
            "next" => SectionKind::Next,
            "ltypes" => SectionKind::Ltypes,
            "ltree" => SectionKind::Ltree,
            "session" => SectionKind::Session,
            "error2" => SectionKind::Error2,
            "hash" => SectionKind::Hash,
            "digest" => SectionKind::Digest,
            "xheader" => SectionKind::Xheader,
            "xhash" => SectionKind::Xhash,
            "done" => SectionKind::Done,
            _ => SectionKind::Unknown(text),
        }
    }

    pub fn to_tag(&self) -> [u8; 16] {
        let mut tag = [0u8; 16];
        let s = self.as_str().as_bytes();
        let len = s.len().min(16);
        tag[..len].copy_from_slice(&s[..len]);
        tag
    }
}

/// A parsed section descriptor: where the *next* section starts and how
/// large this one is (header-to-header-to-next inclusive, spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDescriptor {
    pub kind: SectionKind,
    pub next_section_offset: u64,
    pub section_size: u64,
}

impl SectionDescriptor {
    /// Read and CRC-verify a section descriptor at `offset`.
    pub fn read<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Self> {
        reader.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; SECTION_DESCRIPTOR_SIZE as usize];
        reader.read_exact(&mut buf)?;

        let expected_crc = crc::crc32(&buf[0..72]);
        let stored_crc = u32::from_le_bytes(buf[72..76].try_into().unwrap());
        if expected_crc != stored_crc {
            return Err(EwfError::corrupt(
                "section",
                format!(
                    "section descriptor CRC mismatch at offset {offset:#x}: stored {stored_crc:#x}, computed {expected_crc:#x}"
                ),
            ));
        }

        let mut tag = [0u8; 16];
        tag.copy_from_slice(&buf[0..16]);
        let next_section_offset = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let section_size = u64::from_le_bytes(buf[24..32].try_into().unwrap());

        Ok(Self {
            kind: SectionKind::from_tag(&tag),
            next_section_offset,
            section_size,
        })
    }

    /// Encode this descriptor (including its own CRC) to exactly
    /// [`SECTION_DESCRIPTOR_SIZE`] bytes.
    pub fn encode(&self) -> [u8; SECTION_DESCRIPTOR_SIZE as usize] {
        let mut buf = [0u8; SECTION_DESCRIPTOR_SIZE as usize];
        buf[0..16].copy_from_slice(&self.kind.to_tag());
        buf[16..24].copy_from_slice(&self.next_section_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.section_size.to_le_bytes());
        // buf[32..72] stays zeroed reserved padding.
        let crc = crc::crc32(&buf[0..72]);
        buf[72..76].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Write this descriptor at `offset`, leaving the writer positioned
    /// right after it (i.e. at the start of the section body).
    pub fn write_at<W: Write + Seek>(&self, writer: &mut W, offset: u64) -> Result<()> {
        writer.seek(SeekFrom::Start(offset))?;
        writer.write_all(&self.encode())?;
        Ok(())
    }
}

/// `volume`/`disk` section body (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSectionBody {
    pub media_type: u8,
    pub chunk_count: u32,
    pub chunk_count_high: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub amount_of_sectors: u32,
    pub media_flags: u8,
    pub error_granularity: u32,
    pub guid: [u8; 16],
}

impl VolumeSectionBody {
    pub const SIZE: usize = 94;

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(EwfError::corrupt("section", "volume section too short"));
        }
        Ok(Self {
            media_type: data[0],
            chunk_count: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            sectors_per_chunk: u32::from_le_bytes(data[8..12].try_into().unwrap()),
            bytes_per_sector: u32::from_le_bytes(data[12..16].try_into().unwrap()),
            amount_of_sectors: u32::from_le_bytes(data[16..20].try_into().unwrap()),
            error_granularity: u32::from_le_bytes(data[20..24].try_into().unwrap()),
            chunk_count_high: u32::from_le_bytes(data[24..28].try_into().unwrap()),
            media_flags: data[28],
            guid: data[29..45].try_into().unwrap(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        out[0] = self.media_type;
        out[4..8].copy_from_slice(&self.chunk_count.to_le_bytes());
        out[8..12].copy_from_slice(&self.sectors_per_chunk.to_le_bytes());
        out[12..16].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        out[16..20].copy_from_slice(&self.amount_of_sectors.to_le_bytes());
        out[20..24].copy_from_slice(&self.error_granularity.to_le_bytes());
        out[24..28].copy_from_slice(&self.chunk_count_high.to_le_bytes());
        out[28] = self.media_flags;
        out[29..45].copy_from_slice(&self.guid);
        let crc = crc::crc32(&out[0..Self::SIZE - 4]);
        out[Self::SIZE - 4..].copy_from_slice(&crc.to_le_bytes());
        out
    }
}

/// `table`/`table2` section header (before the per-chunk entries, spec
/// §4.1/§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    pub amount_of_offsets: u32,
    pub base_offset: u64,
}

impl TableHeader {
    pub const SIZE: usize = 24;

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(EwfError::corrupt("section", "table section too short"));
        }
        let amount_of_offsets = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let base_offset = u64::from_le_bytes(data[8..16].try_into().unwrap());
        Ok(Self {
            amount_of_offsets,
            base_offset,
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.amount_of_offsets.to_le_bytes());
        out[8..16].copy_from_slice(&self.base_offset.to_le_bytes());
        let crc = crc::crc32(&out[0..20]);
        out[20..24].copy_from_slice(&crc.to_le_bytes());
        out
    }
}

/// Decode a full `table`/`table2` section body into its header plus every
/// entry resolved to an absolute file offset, verifying the entries' CRC
/// (spec §4.3). Used by the read path; the write path only ever encodes.
pub fn decode_table_body(data: &[u8]) -> Result<(TableHeader, Vec<(u64, bool)>)> {
    let header = TableHeader::decode(data)?;
    let entries_start = TableHeader::SIZE;
    let entries_len = header.amount_of_offsets as usize * 4;
    let entries_end = entries_start + entries_len;
    if data.len() < entries_end + 4 {
        return Err(EwfError::corrupt(
            "section",
            "table section truncated before its declared offset count or trailing CRC",
        ));
    }

    let stored_crc = u32::from_le_bytes(data[entries_end..entries_end + 4].try_into().unwrap());
    let computed_crc = crc::crc32(&data[entries_start..entries_end]);
    if stored_crc != computed_crc {
        return Err(EwfError::corrupt(
            "section",
            "table entries CRC mismatch",
        ));
    }

    let mut offsets = Vec::with_capacity(header.amount_of_offsets as usize);
    for i in 0..header.amount_of_offsets as usize {
        let pos = entries_start + i * 4;
        let raw = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        let (relative, compressed) = decode_table_entry(raw);
        offsets.push((header.base_offset + relative as u64, compressed));
    }
    Ok((header, offsets))
}

/// Pack one table entry: low 31 bits = offset relative to `base_offset`,
/// high bit = compressed flag (spec §4.1).
pub fn encode_table_entry(relative_offset: u32, compressed: bool) -> u32 {
    let flag = if compressed { 0x8000_0000 } else { 0 };
    (relative_offset & 0x7FFF_FFFF) | flag
}

/// Unpack one table entry into `(relative_offset, compressed)`.
pub fn decode_table_entry(raw: u32) -> (u32, bool) {
    (raw & 0x7FFF_FFFF, raw & 0x8000_0000 != 0)
}

/// `error2` section: acquisition-error ranges (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error2Entry {
    pub start_sector: u64,
    pub amount_of_sectors: u32,
}

pub fn encode_error2_body(entries: &[Error2Entry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + entries.len() * 12 + 4);
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    let header_crc = crc::crc32(&out);
    out.extend_from_slice(&header_crc.to_le_bytes());
    for entry in entries {
        out.extend_from_slice(&entry.start_sector.to_le_bytes());
        out.extend_from_slice(&entry.amount_of_sectors.to_le_bytes());
    }
    let entries_start = 12;
    let entries_crc = crc::crc32(&out[entries_start..]);
    out.extend_from_slice(&entries_crc.to_le_bytes());
    out
}

pub fn decode_error2_body(data: &[u8]) -> Result<Vec<Error2Entry>> {
    if data.len() < 12 {
        return Err(EwfError::corrupt("section", "error2 section too short"));
    }
    let count = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let mut entries = Vec::with_capacity(count);
    let mut offset = 12;
    for _ in 0..count {
        if offset + 12 > data.len() {
            return Err(EwfError::corrupt(
                "section",
                "error2 section truncated before declared entry count",
            ));
        }
        let start_sector = u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap());
        let amount_of_sectors =
            u32::from_le_bytes(data[offset + 8..offset + 12].try_into().unwrap());
        entries.push(Error2Entry {
            start_sector,
            amount_of_sectors,
        });
        offset += 12;
    }
    Ok(entries)
}

/// `hash` section: MD5 + the undocumented trailing 16 bytes (Open Question
/// 2, `SPEC_FULL.md` §9) preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashSectionBody {
    pub md5: [u8; 16],
    pub reserved: [u8; 16],
}

impl HashSectionBody {
    pub const SIZE: usize = 36;

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(EwfError::corrupt("section", "hash section too short"));
        }
        Ok(Self {
            md5: data[0..16].try_into().unwrap(),
            reserved: data[16..32].try_into().unwrap(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        out[0..16].copy_from_slice(&self.md5);
        out[16..32].copy_from_slice(&self.reserved);
        let crc = crc::crc32(&out[0..32]);
        out[32..].copy_from_slice(&crc.to_le_bytes());
        out
    }
}

/// `digest` section (EnCase6/EWFX-class outputs, alongside `hash`): SHA1 +
/// MD5 + zero padding + trailing CRC32 (spec EXPANSION 4.1b). The core
/// never computes `sha1` — it is an opaque blob, round-tripped on read and
/// zero-filled on fresh writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSectionBody {
    pub sha1: [u8; 20],
    pub md5: [u8; 16],
}

impl DigestSectionBody {
    pub const SIZE: usize = 80;

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(EwfError::corrupt("section", "digest section too short"));
        }
        Ok(Self {
            sha1: data[0..20].try_into().unwrap(),
            md5: data[20..36].try_into().unwrap(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        out[0..20].copy_from_slice(&self.sha1);
        out[20..36].copy_from_slice(&self.md5);
        let crc = crc::crc32(&out[0..Self::SIZE - 4]);
        out[Self::SIZE - 4..].copy_from_slice(&crc.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn section_descriptor_roundtrips() {
        let descriptor = SectionDescriptor {
            kind: SectionKind::Volume,
            next_section_offset: 1000,
            section_size: 150,
        };
        let encoded = descriptor.encode();
        let mut cursor = Cursor::new(encoded.to_vec());
        let decoded = SectionDescriptor::read(&mut cursor, 0).unwrap();
        assert_eq!(decoded, descriptor);
    }

    #[test]
    fn section_descriptor_detects_crc_tamper() {
        let descriptor = SectionDescriptor {
            kind: SectionKind::Table,
            next_section_offset: 10,
            section_size: 20,
        };
        let mut encoded = descriptor.encode().to_vec();
        encoded[0] ^= 0xff; // flip a byte inside the CRC-covered header
        let mut cursor = Cursor::new(encoded);
        let err = SectionDescriptor::read(&mut cursor, 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptContainer);
    }

    #[test]
    fn section_kind_unknown_tag_is_preserved_not_rejected() {
        let mut tag = [0u8; 16];
        tag[..7].copy_from_slice(b"session");
        assert_eq!(SectionKind::from_tag(&tag), SectionKind::Session);

        let mut weird = [0u8; 16];
        weird[..4].copy_from_slice(b"zzzz");
        assert_eq!(
            SectionKind::from_tag(&weird),
            SectionKind::Unknown("zzzz".to_string())
        );
    }

    #[test]
    fn volume_section_roundtrips() {
        let body = VolumeSectionBody {
            media_type: 0x01,
            chunk_count: 10,
            chunk_count_high: 0,
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            amount_of_sectors: 640,
            media_flags: 0x03,
            error_granularity: 64,
            guid: [0xab; 16],
        };
        let encoded = body.encode();
        let decoded = VolumeSectionBody::decode(&encoded).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn table_entry_packs_compressed_flag_in_msb() {
        let raw = encode_table_entry(0x1234, true);
        assert_eq!(decode_table_entry(raw), (0x1234, true));
        let raw = encode_table_entry(0x1234, false);
        assert_eq!(decode_table_entry(raw), (0x1234, false));
    }

    #[test]
    fn table_body_decodes_absolute_offsets_from_base_offset() {
        let header = TableHeader {
            amount_of_offsets: 2,
            base_offset: 1000,
        };
        let mut body = header.encode().to_vec();
        body.extend_from_slice(&encode_table_entry(0, false).to_le_bytes());
        body.extend_from_slice(&encode_table_entry(64, true).to_le_bytes());
        let crc = crc::crc32(&body[TableHeader::SIZE..]);
        body.extend_from_slice(&crc.to_le_bytes());

        let (decoded_header, offsets) = decode_table_body(&body).unwrap();
        assert_eq!(decoded_header.amount_of_offsets, 2);
        assert_eq!(offsets, vec![(1000, false), (1064, true)]);
    }

    #[test]
    fn table_body_rejects_tampered_entries_crc() {
        let header = TableHeader {
            amount_of_offsets: 1,
            base_offset: 0,
        };
        let mut body = header.encode().to_vec();
        body.extend_from_slice(&encode_table_entry(0, false).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes()); // wrong CRC
        let err = decode_table_body(&body).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptContainer);
    }

    #[test]
    fn error2_body_roundtrips() {
        let entries = vec![
            Error2Entry {
                start_sector: 100,
                amount_of_sectors: 8,
            },
            Error2Entry {
                start_sector: 200,
                amount_of_sectors: 16,
            },
        ];
        let encoded = encode_error2_body(&entries);
        let decoded = decode_error2_body(&encoded).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn hash_section_preserves_reserved_bytes() {
        let body = HashSectionBody {
            md5: [0x11; 16],
            reserved: [0x22; 16],
        };
        let encoded = body.encode();
        let decoded = HashSectionBody::decode(&encoded).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn digest_section_roundtrips_sha1_and_md5() {
        let body = DigestSectionBody {
            sha1: [0x33; 20],
            md5: [0x44; 16],
        };
        let encoded = body.encode();
        assert_eq!(encoded.len(), DigestSectionBody::SIZE);
        let decoded = DigestSectionBody::decode(&encoded).unwrap();
        assert_eq!(decoded, body);
    }
}
