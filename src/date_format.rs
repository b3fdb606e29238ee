//! Date-format conversion is named out of scope by spec §1 ("textual
//! metadata value tables and date-format conversion"); this module only
//! defines the interface `parse_header_values` (spec §6) needs, so a caller
//! can plug in the conversion their tooling already has.

/// Which header date representation the caller prefers (spec §6
/// `parse_header_values(date_format)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// Leave date fields untouched.
    Raw,
    /// `DD/MM/YYYY`.
    DayMonthYear,
    /// `MM/DD/YYYY`.
    MonthDayYear,
    /// ISO 8601.
    Iso8601,
}

/// Pluggable date formatter. The core never parses date semantics itself —
/// callers that need `m`/`u` (acquisition/system date) reformatted supply an
/// implementation; the default, [`PassthroughFormatter`], returns fields
/// unchanged.
pub trait DateFormatter {
    fn format(&self, raw_value: &str, format: DateFormat) -> String;
}

/// Default [`DateFormatter`]: returns the raw field verbatim regardless of
/// the requested [`DateFormat`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughFormatter;

impl DateFormatter for PassthroughFormatter {
    fn format(&self, raw_value: &str, _format: DateFormat) -> String {
        raw_value.to_string()
    }
}
