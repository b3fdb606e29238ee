//! Checksums used by the container: CRC-32 over section descriptors and
//! table entries, Adler-32 over uncompressed chunk payloads.
//!
//! The two are deliberately distinct per spec §4.1/§4.4: section-level
//! integrity is a standard CRC-32 (computed here with `crc32fast`, the crate
//! this corpus reaches for — see `TotalImage`'s workspace dependencies),
//! while the trailing checksum appended to an *uncompressed* chunk is an
//! Adler-32 seeded at 1. No crate in this corpus provides Adler-32, so it is
//! hand-rolled below; the algorithm is a dozen lines and entirely standard
//! (the same construction zlib itself uses internally).

const MOD_ADLER: u32 = 65521;

/// CRC-32 (IEEE 802.3, the same polynomial `zlib`/`crc32fast` use) over `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Adler-32 checksum, seeded at 1 per spec §4.4 point 4 / §8 property 4.
pub fn adler32(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + byte as u32) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adler32_of_empty_is_one() {
        assert_eq!(adler32(&[]), 1);
    }

    #[test]
    fn adler32_known_vector() {
        // "Wikipedia" -> 0x11E60398 is the textbook worked example.
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc32_of_empty_is_zero() {
        assert_eq!(crc32(&[]), 0);
    }
}
