//! Common Utilities Module
//!
//! Small path helpers used by the scanner, the converters and the learner:
//! - extension extraction and normalization (`.png` form vs bare `png` form)
//! - hidden file detection
//! - sibling path construction for temporary outputs

use std::path::{Path, PathBuf};

/// Lowercase extension without the dot, or an empty string.
///
/// # Examples
/// ```
/// use std::path::Path;
/// use shared_utils::common_utils::get_extension_lowercase;
///
/// assert_eq!(get_extension_lowercase(Path::new("test.JPG")), "jpg");
/// assert_eq!(get_extension_lowercase(Path::new("noext")), "");
/// ```
pub fn get_extension_lowercase(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// Lowercase extension with a leading dot (`.png`), or an empty string.
pub fn dotted_extension(path: &Path) -> String {
    let ext = get_extension_lowercase(path);
    if ext.is_empty() {
        ext
    } else {
        format!(".{}", ext)
    }
}

/// Normalize a user-supplied extension to lowercase-with-dot.
///
/// # Examples
/// ```
/// use shared_utils::common_utils::normalize_extension;
///
/// assert_eq!(normalize_extension("JXL"), ".jxl");
/// assert_eq!(normalize_extension(".WebP"), ".webp");
/// ```
pub fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.');
    format!(".{}", trimmed.to_lowercase())
}

/// Case-insensitive membership test against bare extensions (`["jpg", "png"]`).
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    let ext = get_extension_lowercase(path);
    extensions.contains(&ext.as_str())
}

pub fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// `dir/photo.png` + `tmp.jxl` → `dir/photo.png.tmp.jxl`.
///
/// Keeping the full source name avoids collisions between `a.png` and `a.jpg`
/// processed in the same directory.
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Name of the directory holding `path`, used as the learner's folder key.
/// Files without a named parent map to `root`.
pub fn parent_folder_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string())
}
