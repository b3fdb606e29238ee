//! Segment filename policy (spec §6 "filename generation callback").
//!
//! Filename policy is explicitly a caller concern (spec §1, "filename
//! generation policy beyond a callback"): the core only defines the
//! callback type and a default extension scheme, then hands control to the
//! caller for anything else (directory layout, base name choice). Segment
//! *discovery*, the inverse problem, follows the teacher's `find_files`,
//! which globs a parent directory for `basename.E??`.

use crate::error::{EwfError, Result};
use std::path::{Path, PathBuf};

/// What the caller needs to name the `n`th segment of an image.
#[derive(Debug, Clone, Copy)]
pub struct FilenameContext<'a> {
    pub base_stem: &'a str,
    /// 1-based segment number, matching the on-disk segment header field.
    pub segment_number: u16,
}

/// A pluggable segment filename generator (spec §6). The default,
/// [`default_extension`], reproduces the well-known `E01`-`E99`,
/// `EAA`-`EZZ`, ... scheme; callers with a different naming convention
/// (`.L01`, case-specific prefixes, ...) supply their own.
pub trait FilenamePolicy {
    fn filename(&self, ctx: &FilenameContext) -> Result<String>;
}

/// Default policy: `{base_stem}.{extension}` using [`default_extension`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFilenamePolicy;

impl FilenamePolicy for DefaultFilenamePolicy {
    fn filename(&self, ctx: &FilenameContext) -> Result<String> {
        Ok(format!("{}.{}", ctx.base_stem, default_extension(ctx.segment_number)?))
    }
}

/// The standard EWF segment extension scheme: `E01`-`E99`, then `EAA`-`EZZ`,
/// `FAA`-`FZZ`, ... up through `ZAA`-`ZZZ`.
pub fn default_extension(segment_number: u16) -> Result<String> {
    if segment_number == 0 {
        return Err(EwfError::invalid_argument(
            "filename",
            "segment_number must start at 1",
        ));
    }
    if segment_number <= 99 {
        return Ok(format!("E{:02}", segment_number));
    }
    let n = segment_number as u32 - 100;
    let per_first_letter = 26 * 26;
    let first_index = n / per_first_letter;
    if first_index >= 22 {
        return Err(EwfError::unsupported(
            "filename",
            "segment number exceeds the EWF segment extension space",
        ));
    }
    let rem = n % per_first_letter;
    let first = (b'E' + first_index as u8) as char;
    let second = (b'A' + (rem / 26) as u8) as char;
    let third = (b'A' + (rem % 26) as u8) as char;
    Ok(format!("{first}{second}{third}"))
}

/// Discover every segment belonging to the image that `first_segment_path`
/// is one file of, by globbing its parent directory for the same base name
/// with the last two characters of the extension wildcarded. Directly
/// generalizes the teacher's `find_files`.
pub fn discover_segment_paths(first_segment_path: &Path) -> Result<Vec<PathBuf>> {
    let canonical = first_segment_path
        .canonicalize()
        .map_err(|e| EwfError::invalid_argument("filename", format!("invalid path: {e}")))?;
    let filename = canonical
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| EwfError::invalid_argument("filename", "invalid file name"))?;
    if filename.len() < 2 {
        return Err(EwfError::invalid_argument(
            "filename",
            "file name too short to have a segment extension",
        ));
    }

    let base = &filename[..filename.len() - 2];
    let parent = canonical
        .parent()
        .ok_or_else(|| EwfError::invalid_argument("filename", "no parent directory"))?;
    let mut pattern_path = PathBuf::from(parent);
    pattern_path.push(format!("{base}??"));
    let pattern = pattern_path
        .to_str()
        .ok_or_else(|| EwfError::invalid_argument("filename", "invalid glob pattern"))?;

    let matches = glob::glob(pattern)
        .map_err(|e| EwfError::invalid_argument("filename", format!("glob error: {e}")))?;
    let mut paths: Vec<PathBuf> = matches.filter_map(std::result::Result::ok).collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_below_100_are_zero_padded() {
        assert_eq!(default_extension(1).unwrap(), "E01");
        assert_eq!(default_extension(99).unwrap(), "E99");
    }

    #[test]
    fn extension_rolls_over_into_letters_after_99() {
        assert_eq!(default_extension(100).unwrap(), "EAA");
        assert_eq!(default_extension(125).unwrap(), "EAZ");
        assert_eq!(default_extension(126).unwrap(), "EBA");
    }

    #[test]
    fn default_policy_joins_stem_and_extension() {
        let ctx = FilenameContext {
            base_stem: "case001",
            segment_number: 2,
        };
        assert_eq!(
            DefaultFilenamePolicy.filename(&ctx).unwrap(),
            "case001.E02"
        );
    }

    #[test]
    fn rejects_segment_number_zero() {
        assert!(default_extension(0).is_err());
    }
}
