//! Shared Utilities for the image-squisher tools
//!
//! Plumbing that does not depend on any particular image format:
//! - Logging setup and external tool records
//! - Codec subprocess execution with timeouts
//! - Worker pool sizing
//! - Folder scanning and batch counters
//! - Progress bar and summary report
//! - Verified, mtime-preserving file replacement
//! - Hang detection

pub mod batch;
pub mod codec_process;
pub mod common_utils;
pub mod hang_watch;
pub mod logging;
pub mod progress;
pub mod report;
pub mod safe_replace;
pub mod thread_manager;

pub use batch::{collect_files, BatchResult, IMAGE_EXTENSIONS};
pub use codec_process::{run_with_timeout, CodecProcess, ProcessError, ProcessOutcome};
pub use common_utils::{
    dotted_extension, get_extension_lowercase, has_extension, normalize_extension,
    parent_folder_name, sibling_with_suffix,
};
pub use hang_watch::{HangAlert, HangWatch, InFlightGuard, InFlightRegistry, InFlightTask};
pub use logging::{init_logging, log_external_tool, LogConfig};
pub use progress::{create_progress_bar, format_bytes, format_duration, percent_saved};
pub use report::{print_summary_report, render_summary_report, SummaryReport};
pub use safe_replace::{remove_if_exists, replace_original, verify_readable, ReplaceError};
pub use thread_manager::{resolve_worker_count, ThreadAllocation, WorkerSource};
