//! Canonical sample identifiers.
//!
//! Keypoint files and translation tables name the same recording differently
//! (`video_0001_openpose.json` vs `video_0001`). Both sides are reduced to a
//! canonical key before joining:
//!
//! ```text
//! video_0001_openpose.json → video_0001
//! video_0001_front.npy     → video_0001
//! video_0001.json          → video_0001
//! ```

use std::path::Path;

/// Modality suffixes, checked in this order. The first match is stripped.
pub const DEFAULT_SUFFIXES: &[&str] = &["_openpose", "_front", "_panoptic", "_keypoints", "_pose"];

/// Canonicalize with [`DEFAULT_SUFFIXES`].
pub fn canonicalize_id(filename: &str) -> String {
    canonicalize_with(filename, DEFAULT_SUFFIXES)
}

/// Strip the extension, then at most one suffix from `suffixes`.
///
/// Only the file name component is considered, so full paths canonicalize the
/// same as bare names.
pub fn canonicalize_with<S: AsRef<str>>(filename: &str, suffixes: &[S]) -> String {
    let stem = file_stem(filename);
    for suffix in suffixes {
        let suffix = suffix.as_ref();
        if !suffix.is_empty()
            && let Some(stripped) = stem.strip_suffix(suffix)
        {
            return stripped.to_string();
        }
    }
    stem.to_string()
}

/// File name without its final extension. Dotfiles like `.hidden` keep their name.
fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}
