//! Dual-format conversion
//!
//! Both converters run concurrently on scoped threads and are always awaited.
//! Temporary outputs live next to the source as `<name>.tmp.jxl` and
//! `<name>.tmp.webp`.

use crate::converter::{
    run_converter, ConversionParams, ConversionResult, FormatConverter, FormatTag,
};
use shared_utils::{remove_if_exists, sibling_with_suffix};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

/// A candidate this much smaller than the original would let the second
/// conversion be skipped. Only logged; both results are always awaited.
pub const EARLY_EXIT_RATIO: f64 = 0.7;

pub struct DualConverter {
    jxl: Arc<dyn FormatConverter>,
    webp: Arc<dyn FormatConverter>,
    params: ConversionParams,
}

impl DualConverter {
    pub fn new(
        jxl: Arc<dyn FormatConverter>,
        webp: Arc<dyn FormatConverter>,
        params: ConversionParams,
    ) -> Self {
        Self { jxl, webp, params }
    }

    pub fn params(&self) -> &ConversionParams {
        &self.params
    }

    pub fn temp_path(source: &Path, format: FormatTag) -> PathBuf {
        sibling_with_suffix(source, &format!("tmp.{}", format.name()))
    }

    /// Convert `source` to both formats. Returns `(jxl, webp)`.
    pub fn convert(
        &self,
        source: &Path,
        original_size: u64,
    ) -> (ConversionResult, ConversionResult) {
        let jxl_dest = Self::temp_path(source, FormatTag::Jxl);
        let webp_dest = Self::temp_path(source, FormatTag::Webp);

        thread::scope(|s| {
            let jxl_task =
                s.spawn(|| run_converter(self.jxl.as_ref(), source, &jxl_dest, &self.params));
            let webp_task =
                s.spawn(|| run_converter(self.webp.as_ref(), source, &webp_dest, &self.params));

            let jxl = join_or_fail(jxl_task, FormatTag::Jxl, source, &jxl_dest);

            if let Some(size) = jxl.candidate_size() {
                if original_size > 0 && (size as f64) < original_size as f64 * EARLY_EXIT_RATIO {
                    debug!(
                        source = %source.display(),
                        jxl_size = size,
                        original_size,
                        "JXL already 30%+ smaller, still waiting for WebP"
                    );
                }
            }

            let webp = join_or_fail(webp_task, FormatTag::Webp, source, &webp_dest);
            (jxl, webp)
        })
    }
}

fn join_or_fail(
    handle: thread::ScopedJoinHandle<'_, ConversionResult>,
    format: FormatTag,
    source: &Path,
    dest: &Path,
) -> ConversionResult {
    match handle.join() {
        Ok(result) => result,
        Err(_) => {
            error!(format = %format, source = %source.display(), "Converter panicked");
            remove_if_exists(dest);
            ConversionResult::failed(format)
        }
    }
}
