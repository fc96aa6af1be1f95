//! JPEG XL through the `cjxl` command-line encoder.

use super::gif::is_animated_gif;
use super::{CodecError, ConversionParams, FormatConverter, FormatTag};
use shared_utils::{run_with_timeout, ProcessError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BINARY_NAME: &str = "cjxl";

/// Install locations checked when `cjxl` is not on `PATH`.
const FALLBACK_PATHS: &[&str] = &[
    "/opt/homebrew/bin/cjxl",
    "/usr/local/bin/cjxl",
    "/usr/bin/cjxl",
];

#[derive(Debug, Clone)]
pub struct JxlConverter {
    binary: Option<PathBuf>,
}

impl JxlConverter {
    /// Locate `cjxl` on `PATH`, then in common install locations.
    pub fn discover() -> Self {
        let binary = which::which(BINARY_NAME).ok().or_else(|| {
            FALLBACK_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.is_file())
        });

        match &binary {
            Some(path) => info!(path = %path.display(), "Found cjxl"),
            None => warn!("cjxl not found; JPEG XL candidates will be skipped"),
        }
        Self { binary }
    }

    pub fn with_binary(binary: Option<PathBuf>) -> Self {
        Self { binary }
    }

    pub fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    fn build_args(source: &Path, destination: &Path, params: &ConversionParams) -> Vec<String> {
        vec![
            "-q".to_string(),
            params.jpegxl_quality.to_string(),
            "-e".to_string(),
            params.jpegxl_effort.to_string(),
            // keep dash-prefixed file names from parsing as flags
            "--".to_string(),
            source.to_string_lossy().into_owned(),
            destination.to_string_lossy().into_owned(),
        ]
    }
}

impl FormatConverter for JxlConverter {
    fn format(&self) -> FormatTag {
        FormatTag::Jxl
    }

    fn convert(
        &self,
        source: &Path,
        destination: &Path,
        params: &ConversionParams,
    ) -> Result<u64, CodecError> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| CodecError::Unavailable(BINARY_NAME.to_string()))?;

        if is_animated_gif(source) {
            return Err(CodecError::Unsupported(
                "animated GIF cannot be stored as JPEG XL".to_string(),
            ));
        }

        let args = Self::build_args(source, destination, params);
        debug!(source = %source.display(), "Running cjxl");

        let outcome = run_with_timeout(binary, &args, params.timeout).map_err(|e| match e {
            ProcessError::Spawn { program, .. } => CodecError::Unavailable(program),
            ProcessError::TimedOut { program, timeout } => CodecError::TimedOut {
                codec: program,
                timeout,
            },
            ProcessError::Wait { source, .. } => CodecError::Io(source),
        })?;

        if !outcome.status.success() {
            return Err(CodecError::ExitStatus {
                codec: BINARY_NAME.to_string(),
                code: outcome.status.code(),
                stderr: outcome.stderr.trim().to_string(),
            });
        }

        let size = std::fs::metadata(destination)
            .map_err(|_| {
                CodecError::Encode("cjxl reported success but wrote no output".to_string())
            })?
            .len();
        Ok(size)
    }
}
