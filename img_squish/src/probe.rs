//! Header-level image inspection and folder scanning.

use crate::converter::gif::is_animated_gif;
use crate::error::Result;
use image::{ColorType, ImageDecoder, ImageReader};
use rayon::prelude::*;
use shared_utils::{collect_files, dotted_extension, IMAGE_EXTENSIONS};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions that already hold one of the candidate formats.
pub const OPTIMIZED_EXTENSIONS: &[&str] = &[".jxl", ".webp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Channel layout label, e.g. `RGB`, `RGBA`, `L`, `RGBA16`
    pub color_mode: String,
    pub animated: bool,
}

impl ImageInfo {
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

pub fn color_mode_name(color: ColorType) -> String {
    match color {
        ColorType::L8 => "L",
        ColorType::La8 => "LA",
        ColorType::Rgb8 => "RGB",
        ColorType::Rgba8 => "RGBA",
        ColorType::L16 => "L16",
        ColorType::La16 => "LA16",
        ColorType::Rgb16 => "RGB16",
        ColorType::Rgba16 => "RGBA16",
        ColorType::Rgb32F => "RGB32F",
        ColorType::Rgba32F => "RGBA32F",
        _ => "unknown",
    }
    .to_string()
}

/// Read dimensions and colour layout without decoding pixel data.
pub fn probe(path: &Path) -> Result<ImageInfo> {
    let decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let (width, height) = decoder.dimensions();
    let color_mode = color_mode_name(decoder.color_type());

    Ok(ImageInfo {
        width,
        height,
        color_mode,
        animated: is_animated_gif(path),
    })
}

fn has_jxl_signature(path: &Path) -> bool {
    let mut head = [0u8; 12];
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let n = file.read(&mut head).unwrap_or(0);
    // bare codestream or ISO BMFF container
    (n >= 2 && head[..2] == [0xFF, 0x0A])
        || (n == 12 && head == [0, 0, 0, 0x0C, b'J', b'X', b'L', b' ', 0x0D, 0x0A, 0x87, 0x0A])
}

/// A file counts as an image when its header can be parsed, or when it
/// carries the JPEG XL signature (which the decoder here does not read).
pub fn is_valid_image(path: &Path) -> bool {
    if dotted_extension(path) == ".jxl" {
        return has_jxl_signature(path);
    }
    match probe(path) {
        Ok(info) => info.width > 0 && info.height > 0,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Not a readable image");
            false
        }
    }
}

pub fn is_already_optimized(path: &Path) -> bool {
    OPTIMIZED_EXTENSIONS.contains(&dotted_extension(path).as_str())
}

/// Collect image files under `folder`, dropping `skip_extensions` and files
/// whose header does not parse. Sorted by path.
pub fn scan_folder(folder: &Path, recursive: bool, skip_extensions: &[String]) -> Vec<PathBuf> {
    let candidates = collect_files(folder, IMAGE_EXTENSIONS, skip_extensions, recursive);
    let total = candidates.len();

    let mut valid: Vec<PathBuf> = candidates
        .into_par_iter()
        .filter(|p| is_valid_image(p))
        .collect();
    valid.sort();

    info!(
        folder = %folder.display(),
        candidates = total,
        valid = valid.len(),
        recursive,
        "Scanned folder"
    );
    valid
}

/// Distinct dotted extensions present in `files`.
pub fn detect_formats(files: &[PathBuf]) -> BTreeSet<String> {
    files.iter().map(|p| dotted_extension(p)).collect()
}

pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
