//! The header values table (spec §3 "Values table") and the `header`/
//! `header2` tab-separated wire codec.
//!
//! Interpreting *what* the identifiers mean (friendly labels, date parsing)
//! is explicitly out of scope (spec §1, "textual metadata value tables and
//! date-format conversion"); this module only keeps the structural,
//! insertion-ordered mapping and the raw codec, generalizing the teacher's
//! `EwfHeaderSection::decode`/`parse_metadata`/`table_to_map`.

use std::collections::HashMap;

/// Ordered identifier → value mapping, preserving insertion order so
/// `copy_header_values` (spec §6) round-trips byte-identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValuesTable {
    order: Vec<String>,
    values: HashMap<String, String>,
}

impl ValuesTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update `id`. Updating an existing identifier does not move
    /// it in iteration order.
    pub fn set(&mut self, id: impl Into<String>, value: impl Into<String>) {
        let id = id.into();
        if !self.values.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.values.insert(id, value.into());
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.values.get(id).map(|s| s.as_str())
    }

    /// Iterate `(identifier, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(move |id| (id.as_str(), self.values[id].as_str()))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Merge `other`'s identifiers in, overwriting duplicates (teacher's
    /// `header`+`header2` merge behavior: later-parsed wins).
    pub fn extend(&mut self, other: &ValuesTable) {
        for (id, value) in other.iter() {
            self.set(id, value);
        }
    }

    /// Decode the tab-separated two-row table body used by `header`/
    /// `header2`: a row of identifiers, then a row of values, ASCII or
    /// UTF-16LE. Directly generalizes the teacher's `decode`/`parse_metadata`.
    pub fn decode(raw: &[u8]) -> Self {
        let text = decode_text(raw);
        let lines: Vec<&str> = text
            .split(['\n', '\r'])
            .map(|l| l.trim_start_matches('\u{FEFF}'))
            .filter(|l| !l.trim().is_empty())
            .collect();

        let mut table = ValuesTable::new();
        for i in 0..lines.len().saturating_sub(1) {
            if lines[i].contains('\t') && lines[i + 1].contains('\t') {
                for (k, v) in lines[i].split('\t').zip(lines[i + 1].split('\t')) {
                    table.set(k.trim_matches('\0'), v.trim_matches('\0'));
                }
                return table;
            }
        }
        // Fallback: one `id<TAB>value` per line, as some older images use.
        for line in lines {
            if let Some((k, v)) = line.split_once('\t') {
                table.set(k.trim_matches('\0'), v.trim_matches('\0'));
            }
        }
        table
    }

    /// Encode as the tab-separated two-row body (ASCII), ready for zlib
    /// wrapping by the section writer.
    pub fn encode_ascii(&self) -> Vec<u8> {
        let ids: Vec<&str> = self.order.iter().map(|s| s.as_str()).collect();
        let vals: Vec<&str> = self
            .order
            .iter()
            .map(|id| self.values[id].as_str())
            .collect();
        let mut out = ids.join("\t").into_bytes();
        out.push(b'\n');
        out.extend(vals.join("\t").into_bytes());
        out.push(b'\n');
        out
    }
}

/// Decode raw bytes as UTF-8 first, then as UTF-16LE (teacher's
/// `EwfHeaderSection::decode`).
fn decode_text(raw: &[u8]) -> String {
    if let Ok(text) = String::from_utf8(raw.to_vec()) {
        return text;
    }
    if raw.len() % 2 == 0 {
        let utf16: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if let Ok(text) = String::from_utf16(&utf16) {
            return text;
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_ascii_table() {
        let raw = b"1\nc\tn\tm\nA\tB\t20260101\n";
        let table = ValuesTable::decode(raw);
        assert_eq!(table.get("c"), Some("A"));
        assert_eq!(table.get("n"), Some("B"));
    }

    #[test]
    fn encode_then_decode_preserves_order_and_values() {
        let mut table = ValuesTable::new();
        table.set("c", "A");
        table.set("n", "X");
        let encoded = table.encode_ascii();
        let decoded = ValuesTable::decode(&encoded);
        let original: Vec<_> = table.iter().collect();
        let roundtripped: Vec<_> = decoded.iter().collect();
        assert_eq!(original, roundtripped);
    }

    #[test]
    fn copy_header_values_preserves_insertion_order() {
        let mut src = ValuesTable::new();
        src.set("c", "A");
        src.set("e", "X");
        let mut dst = ValuesTable::new();
        dst.extend(&src);
        assert_eq!(
            dst.iter().collect::<Vec<_>>(),
            vec![("c", "A"), ("e", "X")]
        );
    }

    #[test]
    fn set_twice_keeps_original_position() {
        let mut table = ValuesTable::new();
        table.set("c", "A");
        table.set("e", "X");
        table.set("c", "B");
        assert_eq!(
            table.iter().collect::<Vec<_>>(),
            vec![("c", "B"), ("e", "X")]
        );
    }
}
