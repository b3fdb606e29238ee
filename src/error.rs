//! Error taxonomy for the EWF core.
//!
//! The reference implementation returns a sentinel (`-1`/`NULL`) and fills an
//! out-parameter error record; the Rust-native rendition of that same contract
//! is a `Result<T, EwfError>` everywhere, with `EwfError` carrying the kind, a
//! short message and the component that raised it. See spec §7.

use std::fmt;
use std::io;

/// Broad failure category. Chunk CRC mismatches are intentionally absent: per
/// spec §7 point 5 they are recoverable and are recorded into the CRC-error
/// list rather than returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-supplied null/out-of-range/wrong-state argument.
    InvalidArgument,
    /// Underlying file operation failed.
    Io,
    /// Signature, section-header CRC, or structural inconsistency.
    CorruptContainer,
    /// Chunk decompression failed.
    ChunkCorrupt,
    /// No valid `table`/`table2` covers the requested chunk.
    ChunkUnavailable,
    /// A section or format variant this crate does not implement.
    UnsupportedFormat,
    /// Allocation failure. Never constructed deliberately; kept so a caller
    /// matching exhaustively on `ErrorKind` has a complete taxonomy.
    OutOfMemory,
}

/// An error raised by the EWF core, tagged with the component that raised it.
#[derive(Debug)]
pub struct EwfError {
    kind: ErrorKind,
    component: &'static str,
    message: String,
}

impl EwfError {
    pub fn new(kind: ErrorKind, component: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            component,
            message: message.into(),
        }
    }

    pub fn invalid_argument(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, component, message)
    }

    pub fn corrupt(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CorruptContainer, component, message)
    }

    pub fn chunk_corrupt(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChunkCorrupt, component, message)
    }

    pub fn chunk_unavailable(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChunkUnavailable, component, message)
    }

    pub fn unsupported(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedFormat, component, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn component(&self) -> &'static str {
        self.component
    }
}

impl fmt::Display for EwfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:?}: {}", self.component, self.kind, self.message)
    }
}

impl std::error::Error for EwfError {}

impl From<io::Error> for EwfError {
    fn from(err: io::Error) -> Self {
        Self::new(ErrorKind::Io, "io", err.to_string())
    }
}

impl From<EwfError> for io::Error {
    fn from(err: EwfError) -> Self {
        let kind = match err.kind {
            ErrorKind::InvalidArgument => io::ErrorKind::InvalidInput,
            ErrorKind::Io => io::ErrorKind::Other,
            ErrorKind::CorruptContainer | ErrorKind::ChunkCorrupt => io::ErrorKind::InvalidData,
            ErrorKind::ChunkUnavailable => io::ErrorKind::NotFound,
            ErrorKind::UnsupportedFormat => io::ErrorKind::Unsupported,
            ErrorKind::OutOfMemory => io::ErrorKind::Other,
        };
        io::Error::new(kind, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EwfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_component_and_kind() {
        let err = EwfError::corrupt("section", "bad signature");
        let text = err.to_string();
        assert!(text.contains("section"));
        assert!(text.contains("bad signature"));
    }

    #[test]
    fn io_error_roundtrips_through_kind() {
        let err = EwfError::invalid_argument("handle", "offset out of range");
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);
    }
}
