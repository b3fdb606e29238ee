//! EWF output format variants and the per-format section plan that decides
//! which sections get written and how large a `table` may grow before it is
//! flushed (spec §4.3, §6 "Binary format").
//!
//! No teacher precedent exists for this (the teacher is read-only and
//! accepts whatever format a segment happens to be), so the shape follows
//! `TotalImage`'s `E01Compression`/`E01MediaType` `From<u8>` idiom: small
//! plain enums with a lookup method, not a trait-object strategy.

/// Which EWF variant to emit on write (spec §2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    EnCase1,
    EnCase2,
    EnCase3,
    EnCase4,
    EnCase5,
    EnCase6,
    Smart,
    Ftk,
    LinEn,
    Ewfx,
}

/// Per-format decisions about which sections are emitted and how the offset
/// table is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatPlan {
    /// Emit `header2` (UTF-16) in addition to `header` (ASCII).
    pub emit_header2: bool,
    /// Emit an `xheader` (XML) section.
    pub emit_xheader: bool,
    /// Emit a `digest` section alongside `hash`.
    pub emit_digest: bool,
    /// Emit an `xhash` (XML) section.
    pub emit_xhash: bool,
    /// Maximum offsets packed into one `table`/`table2` pair before a flush
    /// is forced (spec §4.3).
    pub max_offsets_per_table: usize,
}

impl Format {
    pub fn plan(self) -> FormatPlan {
        match self {
            Format::EnCase1 => FormatPlan {
                emit_header2: false,
                emit_xheader: false,
                emit_digest: false,
                emit_xhash: false,
                max_offsets_per_table: 16_375,
            },
            Format::EnCase2 | Format::EnCase3 | Format::EnCase4 => FormatPlan {
                emit_header2: true,
                emit_xheader: false,
                emit_digest: false,
                emit_xhash: false,
                max_offsets_per_table: 16_375,
            },
            Format::EnCase5 => FormatPlan {
                emit_header2: true,
                emit_xheader: false,
                emit_digest: true,
                emit_xhash: false,
                max_offsets_per_table: 16_384,
            },
            Format::EnCase6 => FormatPlan {
                emit_header2: true,
                emit_xheader: true,
                emit_digest: true,
                emit_xhash: true,
                max_offsets_per_table: 16_384,
            },
            Format::Smart | Format::Ftk => FormatPlan {
                emit_header2: false,
                emit_xheader: false,
                emit_digest: false,
                emit_xhash: false,
                max_offsets_per_table: 16_375,
            },
            Format::LinEn => FormatPlan {
                emit_header2: true,
                emit_xheader: false,
                emit_digest: false,
                emit_xhash: false,
                max_offsets_per_table: 16_375,
            },
            Format::Ewfx => FormatPlan {
                emit_header2: true,
                emit_xheader: true,
                emit_digest: true,
                emit_xhash: true,
                max_offsets_per_table: 16_384,
            },
        }
    }

    /// Whether this format records acquisition errors in `error2` (the
    /// modern section) versus the legacy `error` section (spec §6).
    pub fn uses_error2(self) -> bool {
        !matches!(self, Format::EnCase1)
    }
}
