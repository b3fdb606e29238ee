//! MD5 over the decompressed media stream, pluggable per spec §1 ("hash
//! primitive implementations... treated as pluggable primitives").
//!
//! The write path (`write.rs`) is generic over [`RollingDigest`] rather than
//! calling the `md-5` crate directly, so a caller could swap in another MD5
//! implementation (or a hardware-accelerated one) without touching the
//! finalize logic. The default, [`Md5Digest`], wraps the `md-5` crate — the
//! same crate this corpus reaches for when it needs MD5 (see `TotalImage`'s
//! `md5`/`md-5` dependency).

use md5::{Digest, Md5};

/// Incrementally hashes the stream being written, producing the 16-byte MD5
/// recorded in the `hash` section on finalize (spec §4.5).
pub trait RollingDigest {
    fn update(&mut self, data: &[u8]);
    fn finalize(self) -> [u8; 16];
}

/// Default [`RollingDigest`] backed by the `md-5` crate.
#[derive(Default)]
pub struct Md5Digest {
    inner: Md5,
}

impl RollingDigest for Md5Digest {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.inner, data);
    }

    fn finalize(self) -> [u8; 16] {
        let result = self.inner.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&result);
        out
    }
}
