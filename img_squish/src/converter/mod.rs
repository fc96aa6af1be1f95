//! Converter gateway
//!
//! Each target format sits behind [`FormatConverter`]. Callers go through
//! [`run_converter`], which turns every failure into an empty
//! [`ConversionResult`] and guarantees the destination file is gone afterwards.

pub mod gif;
pub mod jxl;
pub mod webp;

use crate::config::Config;
use serde::{Deserialize, Serialize};
use shared_utils::{remove_if_exists, verify_readable};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub use self::jxl::JxlConverter;
pub use self::webp::WebpConverter;

/// Candidate formats produced by conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    Jxl,
    Webp,
}

impl FormatTag {
    pub fn name(self) -> &'static str {
        match self {
            FormatTag::Jxl => "jxl",
            FormatTag::Webp => "webp",
        }
    }

    /// Dotted file extension of the kept file.
    pub fn extension(self) -> &'static str {
        match self {
            FormatTag::Jxl => ".jxl",
            FormatTag::Webp => ".webp",
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{0} is not available")]
    Unavailable(String),

    #[error("unsupported input: {0}")]
    Unsupported(String),

    #[error("{codec} exited with status {code:?}: {stderr}")]
    ExitStatus {
        codec: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{codec} timed out after {} s", .timeout.as_secs())]
    TimedOut { codec: String, timeout: Duration },

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("decoding failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec parameters shared by both converters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionParams {
    pub jpegxl_quality: u8,
    pub jpegxl_effort: u8,
    pub webp_method: u8,
    pub timeout: Duration,
    pub max_animated_frames: usize,
}

impl From<&Config> for ConversionParams {
    fn from(config: &Config) -> Self {
        Self {
            jpegxl_quality: config.jpegxl_quality,
            jpegxl_effort: config.jpegxl_effort,
            webp_method: config.webp_method,
            timeout: config.conversion_timeout(),
            max_animated_frames: config.max_animated_frames,
        }
    }
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Outcome of one conversion attempt; `output`/`size` are `None` on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub format: FormatTag,
    pub output: Option<PathBuf>,
    pub size: Option<u64>,
}

impl ConversionResult {
    pub fn failed(format: FormatTag) -> Self {
        Self {
            format,
            output: None,
            size: None,
        }
    }

    pub fn succeeded(format: FormatTag, output: PathBuf, size: u64) -> Self {
        Self {
            format,
            output: Some(output),
            size: Some(size),
        }
    }

    /// Size of a usable candidate, if any.
    pub fn candidate_size(&self) -> Option<u64> {
        match (&self.output, self.size) {
            (Some(_), Some(size)) => Some(size),
            _ => None,
        }
    }
}

pub trait FormatConverter: Send + Sync {
    fn format(&self) -> FormatTag;

    /// Write `destination` from `source`, returning the written size.
    fn convert(
        &self,
        source: &Path,
        destination: &Path,
        params: &ConversionParams,
    ) -> Result<u64, CodecError>;
}

/// Run one converter; failures become an empty result with no file left behind.
pub fn run_converter(
    converter: &dyn FormatConverter,
    source: &Path,
    destination: &Path,
    params: &ConversionParams,
) -> ConversionResult {
    let format = converter.format();

    let outcome = converter
        .convert(source, destination, params)
        .and_then(|_| verify_readable(destination).map_err(|e| CodecError::Encode(e.to_string())));

    match outcome {
        Ok(size) => {
            debug!(
                format = %format,
                source = %source.display(),
                size,
                "Conversion produced candidate"
            );
            ConversionResult::succeeded(format, destination.to_path_buf(), size)
        }
        Err(CodecError::Unsupported(reason)) => {
            debug!(
                format = %format,
                source = %source.display(),
                reason = %reason,
                "Conversion skipped"
            );
            remove_if_exists(destination);
            ConversionResult::failed(format)
        }
        Err(e) => {
            warn!(format = %format, source = %source.display(), error = %e, "Conversion failed");
            remove_if_exists(destination);
            ConversionResult::failed(format)
        }
    }
}
