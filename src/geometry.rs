//! Media geometry — spec §3 "Media geometry", immutable after the first
//! `volume`/`disk` section is seen (read) or written (write-initialize).
//!
//! Generalizes the teacher's `EwfVolumeSection`, which only carried the four
//! fields it needed for reading (`chunk_count`, `sector_per_chunk`,
//! `bytes_per_sector`, `total_sector_count`) into the full volume/disk
//! payload the format actually defines, including media type/flags, GUID
//! and error granularity.

use crate::error::{EwfError, Result};

/// Kind of medium that was acquired (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Removable,
    Fixed,
    Optical,
    Memory,
    Unknown(u8),
}

impl From<u8> for MediaType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => MediaType::Removable,
            0x01 => MediaType::Fixed,
            0x03 => MediaType::Optical,
            0x10 => MediaType::Memory,
            v => MediaType::Unknown(v),
        }
    }
}

impl From<MediaType> for u8 {
    fn from(value: MediaType) -> Self {
        match value {
            MediaType::Removable => 0x00,
            MediaType::Fixed => 0x01,
            MediaType::Optical => 0x03,
            MediaType::Memory => 0x10,
            MediaType::Unknown(v) => v,
        }
    }
}

/// Bit flags carried in the volume section. Per Open Question 1
/// (`SPEC_FULL.md` §9), only bit 0 is interpreted; bit 1 is preserved
/// verbatim but not assigned a meaning by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaFlags(pub u8);

impl MediaFlags {
    pub const PHYSICAL: u8 = 0x01;
    pub const MEDIA_PRESENT: u8 = 0x02;

    pub fn is_physical(&self) -> bool {
        self.0 & Self::PHYSICAL != 0
    }

    pub fn media_present(&self) -> bool {
        self.0 & Self::MEDIA_PRESENT != 0
    }

    pub fn new(physical: bool, media_present: bool) -> Self {
        let mut bits = 0u8;
        if physical {
            bits |= Self::PHYSICAL;
        }
        if media_present {
            bits |= Self::MEDIA_PRESENT;
        }
        MediaFlags(bits)
    }
}

/// Immutable-after-open geometry of the acquired medium (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaGeometry {
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub amount_of_sectors: u64,
    pub media_type: MediaType,
    pub media_flags: MediaFlags,
    pub error_granularity: u32,
    pub guid: [u8; 16],
    /// `chunk_count` as declared in the volume section; combines the 32-bit
    /// field with the high-order extension per Open Question 3.
    pub chunk_count: u64,
}

impl Default for MediaGeometry {
    fn default() -> Self {
        Self {
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            amount_of_sectors: 0,
            media_type: MediaType::Fixed,
            media_flags: MediaFlags::new(true, true),
            error_granularity: 64,
            guid: [0u8; 16],
            chunk_count: 0,
        }
    }
}

impl MediaGeometry {
    /// Size (bytes) of a single chunk: `sectors_per_chunk * bytes_per_sector`.
    pub fn chunk_size(&self) -> usize {
        self.sectors_per_chunk as usize * self.bytes_per_sector as usize
    }

    /// Total media size in bytes.
    pub fn media_size(&self) -> u64 {
        self.amount_of_sectors * self.bytes_per_sector as u64
    }

    /// `ceil(media_size / chunk_size)`, per spec §4.5 write-initialization.
    pub fn amount_of_chunks(&self) -> u64 {
        let chunk_size = self.chunk_size() as u64;
        if chunk_size == 0 {
            return 0;
        }
        self.media_size().div_ceil(chunk_size)
    }

    /// Validates `sectors_per_chunk * bytes_per_sector` doesn't overflow and
    /// that both are non-zero, per spec §4.5 write-initialization.
    pub fn validate(&self) -> Result<()> {
        if self.sectors_per_chunk == 0 || self.bytes_per_sector == 0 {
            return Err(EwfError::invalid_argument(
                "geometry",
                "sectors_per_chunk and bytes_per_sector must be non-zero",
            ));
        }
        self.sectors_per_chunk
            .checked_mul(self.bytes_per_sector)
            .ok_or_else(|| {
                EwfError::invalid_argument("geometry", "chunk size overflows a u32")
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_is_sectors_times_bytes() {
        let geom = MediaGeometry {
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            ..Default::default()
        };
        assert_eq!(geom.chunk_size(), 32768);
    }

    #[test]
    fn amount_of_chunks_rounds_up() {
        let geom = MediaGeometry {
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            amount_of_sectors: 65, // one more sector than a single chunk holds
            ..Default::default()
        };
        assert_eq!(geom.amount_of_chunks(), 2);
    }

    #[test]
    fn media_flags_bit_zero_is_physical() {
        let flags = MediaFlags(0x01);
        assert!(flags.is_physical());
        assert!(!flags.media_present());
    }

    #[test]
    fn validate_rejects_zero_sectors_per_chunk() {
        let geom = MediaGeometry {
            sectors_per_chunk: 0,
            ..Default::default()
        };
        assert!(geom.validate().is_err());
    }
}
