//! Per-image pipeline: convert both formats, select, learn.

use crate::converter::FormatTag;
use crate::learner::FormatLearner;
use crate::orchestrator::DualConverter;
use crate::probe::{file_size, is_already_optimized};
use crate::selection::{select, Winner};
use shared_utils::{dotted_extension, parent_folder_name};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One unit of work, fixed at scan time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTask {
    pub index: usize,
    pub path: PathBuf,
    pub original_size: u64,
}

impl ImageTask {
    /// Tasks in scan order, sizes read now.
    pub fn from_paths(paths: &[PathBuf]) -> Vec<ImageTask> {
        paths
            .iter()
            .enumerate()
            .map(|(index, path)| ImageTask {
                index,
                path: path.clone(),
                original_size: file_size(path),
            })
            .collect()
    }
}

/// Result of one task as shown in the run summary.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub index: usize,
    pub path: PathBuf,
    pub winner: Winner,
    pub original_size: u64,
    pub final_size: u64,
    pub final_path: PathBuf,
    pub duration: Duration,
    /// Set when the image could not be processed; the original is untouched
    pub error: Option<String>,
}

impl TaskReport {
    pub fn failed(task: &ImageTask, error: String, duration: Duration) -> Self {
        Self {
            index: task.index,
            path: task.path.clone(),
            winner: Winner::Original,
            original_size: task.original_size,
            final_size: task.original_size,
            final_path: task.path.clone(),
            duration,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn saved_bytes(&self) -> u64 {
        self.original_size.saturating_sub(self.final_size)
    }
}

/// Shared, read-only state every worker processes images with.
pub struct ImageProcessor {
    dual: DualConverter,
    learner: Arc<FormatLearner>,
    min_improvement_pct: f64,
}

impl ImageProcessor {
    pub fn new(dual: DualConverter, learner: Arc<FormatLearner>, min_improvement_pct: f64) -> Self {
        Self {
            dual,
            learner,
            min_improvement_pct,
        }
    }

    pub fn learner(&self) -> &FormatLearner {
        &self.learner
    }

    pub fn process(&self, task: &ImageTask) -> TaskReport {
        let start = Instant::now();
        let path = task.path.as_path();

        if is_already_optimized(path) {
            return self.already_optimized(task, start.elapsed());
        }

        if !path.is_file() {
            warn!(path = %path.display(), "Source vanished before processing");
            return TaskReport::failed(task, "source file is missing".to_string(), start.elapsed());
        }

        // profile before conversion; the source may be replaced afterwards
        let profile = self.learner.profile(path, task.original_size);
        if let Some(profile) = &profile {
            if let Some(predicted) = self.learner.predict(profile) {
                debug!(path = %path.display(), predicted = %predicted, "Learner prediction");
            }
        }

        let (jxl, webp) = self.dual.convert(path, task.original_size);
        let outcome = select(path, task.original_size, &jxl, &webp, self.min_improvement_pct);

        if outcome.success {
            if let Some(profile) = &profile {
                self.learner
                    .record(profile, outcome.winner, task.original_size, jxl.size, webp.size);
            }
        }

        let duration = start.elapsed();
        info!(
            path = %path.display(),
            folder = %parent_folder_name(path),
            kept = %outcome.winner,
            original_size = outcome.original_size,
            final_size = outcome.final_size,
            duration_secs = duration.as_secs_f64(),
            "Completed image"
        );

        TaskReport {
            index: task.index,
            path: task.path.clone(),
            winner: outcome.winner,
            original_size: outcome.original_size,
            final_size: outcome.final_size,
            final_path: outcome.final_path,
            duration,
            error: outcome.error,
        }
    }

    fn already_optimized(&self, task: &ImageTask, duration: Duration) -> TaskReport {
        let winner = match dotted_extension(&task.path).as_str() {
            ".jxl" => Winner::from(FormatTag::Jxl),
            _ => Winner::from(FormatTag::Webp),
        };
        debug!(path = %task.path.display(), format = %winner, "Already optimized, skipped");
        TaskReport {
            index: task.index,
            path: task.path.clone(),
            winner,
            original_size: task.original_size,
            final_size: task.original_size,
            final_path: task.path.clone(),
            duration,
            error: None,
        }
    }
}

/// Line printed for one image in the run summary.
pub fn describe_report(report: &TaskReport, total: usize) -> String {
    let name = report
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| report.path.display().to_string());
    let prefix = format!("[{}/{}] {}", report.index + 1, total, name);

    match &report.error {
        Some(error) => format!("{} ... ERROR (kept original): {}", prefix, error),
        None => format!(
            "{} ... {} kept ({} → {}, -{} / -{:.1}%)",
            prefix,
            report.winner.name().to_uppercase(),
            shared_utils::format_bytes(report.original_size),
            shared_utils::format_bytes(report.final_size),
            shared_utils::format_bytes(report.saved_bytes()),
            shared_utils::percent_saved(report.original_size, report.final_size),
        ),
    }
}
