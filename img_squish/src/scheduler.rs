//! Batch scheduler
//!
//! ```text
//! Idle ──► Dispatching ──► Draining ──► Done
//! ```
//!
//! Every task is pushed into a bounded queue before the workers start
//! pulling; the queue's sender is then dropped so workers exit once it is
//! empty. The calling thread drains the result channel with a bounded wait
//! per poll, feeding a [`HangWatch`] so a stalled batch is reported while it
//! keeps running. Results are put back in scan order for the summary.

use crate::notify::{Notification, Notifier};
use crate::processor::{ImageTask, TaskReport};
use crate::selection::Winner;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use shared_utils::{
    create_progress_bar, parent_folder_name, percent_saved, BatchResult, HangWatch,
    InFlightRegistry, SummaryReport,
};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Upper bound on a single result poll, whatever the hang timeout.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Dispatching,
    Draining,
    Done,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub workers: usize,
    pub hang_timeout: Duration,
    /// Hide the progress bar
    pub quiet: bool,
}

/// Totals of one batch, with per-image reports in scan order.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub reports: Vec<TaskReport>,
    pub result: BatchResult,
    pub kept: BTreeMap<Winner, usize>,
    /// Byte totals over successfully processed images
    pub original_bytes: u64,
    pub final_bytes: u64,
    pub duration: Duration,
    pub hang_alerts: usize,
}

impl BatchSummary {
    fn from_reports(reports: Vec<TaskReport>, duration: Duration, hang_alerts: usize) -> Self {
        let mut result = BatchResult::new();
        let mut kept: BTreeMap<Winner, usize> = Winner::ALL.iter().map(|w| (*w, 0)).collect();
        let (mut original_bytes, mut final_bytes) = (0u64, 0u64);

        for report in &reports {
            match &report.error {
                Some(e) => result.fail(report.path.clone(), e.clone()),
                None => {
                    result.success();
                    *kept.entry(report.winner).or_default() += 1;
                    original_bytes += report.original_size;
                    final_bytes += report.final_size;
                }
            }
        }

        Self {
            reports,
            result,
            kept,
            original_bytes,
            final_bytes,
            duration,
            hang_alerts,
        }
    }

    pub fn kept_as(&self, winner: Winner) -> usize {
        self.kept.get(&winner).copied().unwrap_or(0)
    }

    pub fn saved_bytes(&self) -> u64 {
        self.original_bytes.saturating_sub(self.final_bytes)
    }

    pub fn summary_report(&self) -> SummaryReport<'_> {
        SummaryReport {
            operation_name: "Image Squisher",
            result: &self.result,
            distribution: Winner::ALL
                .iter()
                .map(|w| (w.name().to_string(), self.kept_as(*w)))
                .collect(),
            input_bytes: self.original_bytes,
            output_bytes: self.final_bytes,
            duration: self.duration,
        }
    }

    pub fn completion_notification(&self) -> Notification {
        Notification::Completed {
            processed: self.reports.len(),
            errors: self.result.failed,
            saved_bytes: self.saved_bytes(),
            saved_pct: percent_saved(self.original_bytes, self.final_bytes),
        }
    }
}

pub struct BatchScheduler {
    options: SchedulerOptions,
    notifier: Arc<dyn Notifier>,
    phase: Phase,
}

impl BatchScheduler {
    pub fn new(options: SchedulerOptions, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            options,
            notifier,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn transition(&mut self, next: Phase) {
        debug!(from = ?self.phase, to = ?next, "Scheduler phase");
        self.phase = next;
    }

    fn poll_interval(&self) -> Duration {
        self.options.hang_timeout.min(MAX_POLL_INTERVAL)
    }

    /// Run `process` over every task on the worker pool.
    pub fn run<F>(&mut self, tasks: Vec<ImageTask>, process: F) -> BatchSummary
    where
        F: Fn(&ImageTask) -> TaskReport + Sync,
    {
        let start = Instant::now();
        let total = tasks.len();
        let workers = self.options.workers.max(1);

        self.transition(Phase::Dispatching);
        let (task_tx, task_rx) = bounded::<ImageTask>(total.max(1));
        for task in &tasks {
            // capacity equals the task count, so this never blocks
            if task_tx.send(task.clone()).is_err() {
                break;
            }
        }
        drop(task_tx);
        info!(tasks = total, workers, "Dispatched batch");

        let (result_tx, result_rx) = unbounded::<TaskReport>();
        let registry = InFlightRegistry::new();
        let mut slots: Vec<Option<TaskReport>> = vec![None; total];
        let mut hang_alerts = 0;

        thread::scope(|s| {
            let process = &process;
            for id in 0..workers {
                let tasks = task_rx.clone();
                let results = result_tx.clone();
                let registry = registry.clone();
                let spawned = thread::Builder::new()
                    .name(format!("squish-worker-{}", id))
                    .spawn_scoped(s, move || worker_loop(id, tasks, results, registry, process));
                if let Err(e) = spawned {
                    error!(worker = id, error = %e, "Failed to start worker");
                }
            }
            drop(result_tx);
            drop(task_rx);

            self.transition(Phase::Draining);
            hang_alerts = self.drain(total, &result_rx, &registry, &mut slots);
        });

        self.transition(Phase::Done);

        let reports: Vec<TaskReport> = slots
            .into_iter()
            .zip(&tasks)
            .map(|(slot, task)| {
                slot.unwrap_or_else(|| {
                    TaskReport::failed(task, "not processed".to_string(), Duration::ZERO)
                })
            })
            .collect();

        let summary = BatchSummary::from_reports(reports, start.elapsed(), hang_alerts);
        info!(
            processed = total,
            errors = summary.result.failed,
            saved_bytes = summary.saved_bytes(),
            duration_secs = summary.duration.as_secs_f64(),
            "Batch complete"
        );
        self.notifier.notify(&summary.completion_notification());
        summary
    }

    /// Collect results until every task reported or all workers are gone.
    /// Returns the number of hang alerts raised.
    fn drain(
        &self,
        total: usize,
        results: &Receiver<TaskReport>,
        registry: &InFlightRegistry,
        slots: &mut [Option<TaskReport>],
    ) -> usize {
        let pb = create_progress_bar(total as u64, "Squishing", self.options.quiet);
        let mut watch = HangWatch::new(self.options.hang_timeout, registry.clone());
        let poll = self.poll_interval();
        let mut received = 0;
        let mut alerts = 0;

        while received < total {
            match results.recv_timeout(poll) {
                Ok(report) => {
                    watch.record_progress();
                    received += 1;
                    pb.inc(1);
                    if let Some(name) = report.path.file_name() {
                        pb.set_message(name.to_string_lossy().into_owned());
                    }
                    if let Some(e) = &report.error {
                        error!(
                            path = %report.path.display(),
                            folder = %parent_folder_name(&report.path),
                            error = %e,
                            "Image failed, original kept"
                        );
                        self.notifier.notify(&Notification::image_error(&report.path, e));
                    }
                    let index = report.index;
                    match slots.get_mut(index) {
                        Some(slot) => *slot = Some(report),
                        None => warn!(index, "Result for unknown task index dropped"),
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(alert) = watch.check() {
                        alerts += 1;
                        warn!("Potential hang detected: {}", alert.describe());
                        self.notifier.notify(&Notification::hang(&alert));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    if received < total {
                        error!(received, total, "All workers exited before the batch finished");
                    }
                    break;
                }
            }
        }

        pb.finish_and_clear();
        alerts
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn worker_loop<F>(
    id: usize,
    tasks: Receiver<ImageTask>,
    results: Sender<TaskReport>,
    registry: InFlightRegistry,
    process: &F,
) where
    F: Fn(&ImageTask) -> TaskReport + Sync,
{
    for task in tasks.iter() {
        let start = Instant::now();
        let report = {
            let _in_flight = registry.begin(id, &task.path);
            match panic::catch_unwind(AssertUnwindSafe(|| process(&task))) {
                Ok(report) => report,
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    error!(
                        worker = id,
                        path = %task.path.display(),
                        panic = %msg,
                        "Worker caught panic"
                    );
                    TaskReport::failed(&task, format!("panic: {}", msg), start.elapsed())
                }
            }
        };
        if results.send(report).is_err() {
            break;
        }
    }
    debug!(worker = id, "Worker finished");
}
