//! Batch Processing Module
//!
//! Folder scanning and per-batch outcome counters.

use crate::common_utils::{dotted_extension, has_extension, is_hidden_file};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "jpe", "jfif", "tiff", "tif", "bmp", "gif", "webp", "heic", "heif",
    "avif", "jxl", "jp2", "ico", "icns", "tga", "dds",
];

/// Collect files under `dir` with one of `extensions` (bare, lowercase),
/// minus any whose dotted extension is listed in `skip_extensions`.
///
/// Hidden files are ignored. The result is sorted so batches run in a stable
/// order between invocations.
pub fn collect_files(
    dir: &Path,
    extensions: &[&str],
    skip_extensions: &[String],
    recursive: bool,
) -> Vec<PathBuf> {
    let walker = if recursive {
        WalkDir::new(dir).follow_links(true)
    } else {
        WalkDir::new(dir).max_depth(1)
    };

    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !is_hidden_file(e.path()))
        .filter(|e| has_extension(e.path(), extensions))
        .filter(|e| !skip_extensions.contains(&dotted_extension(e.path())))
        .map(|e| e.path().to_path_buf())
        .collect();

    files.sort();
    files
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<(PathBuf, String)>,
}

impl BatchResult {
    pub fn new() -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
        }
    }

    pub fn success(&mut self) {
        self.total += 1;
        self.succeeded += 1;
    }

    pub fn fail(&mut self, path: PathBuf, error: String) {
        self.total += 1;
        self.failed += 1;
        self.errors.push((path, error));
    }

    pub fn skip(&mut self) {
        self.total += 1;
        self.skipped += 1;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / self.total as f64) * 100.0
        }
    }
}

impl Default for BatchResult {
    fn default() -> Self {
        Self::new()
    }
}
