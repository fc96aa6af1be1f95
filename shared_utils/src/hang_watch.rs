//! Hang detection for long batch runs
//!
//! Workers register the file they are working on through an RAII
//! [`InFlightGuard`]; the collecting thread owns a [`HangWatch`] that is told
//! about every completed task. When nothing completes for `timeout`, one
//! [`HangAlert`] is produced listing what each worker is stuck on, and the
//! window restarts so the same stall is not reported on every poll.

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightTask {
    pub worker: usize,
    pub path: PathBuf,
    pub started: DateTime<Local>,
}

/// Shared map of worker id → task currently being processed.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<Mutex<BTreeMap<usize, InFlightTask>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `worker` busy with `path` until the returned guard is dropped.
    pub fn begin(&self, worker: usize, path: &Path) -> InFlightGuard {
        let task = InFlightTask {
            worker,
            path: path.to_path_buf(),
            started: Local::now(),
        };
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(worker, task);
        InFlightGuard {
            registry: self.clone(),
            worker,
        }
    }

    pub fn snapshot(&self) -> Vec<InFlightTask> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn finish(&self, worker: usize) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&worker);
    }
}

/// Clears the worker's entry on drop, including during unwinding.
pub struct InFlightGuard {
    registry: InFlightRegistry,
    worker: usize,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.finish(self.worker);
    }
}

#[derive(Debug, Clone)]
pub struct HangAlert {
    pub idle_for: Duration,
    pub detected_at: DateTime<Local>,
    pub in_flight: Vec<InFlightTask>,
}

impl HangAlert {
    pub fn describe(&self) -> String {
        let mut msg = format!(
            "No image finished for {}s (at {})",
            self.idle_for.as_secs(),
            self.detected_at.format("%Y-%m-%d %H:%M:%S")
        );
        for task in &self.in_flight {
            msg.push_str(&format!(
                "\n  worker {} busy since {}: {}",
                task.worker,
                task.started.format("%H:%M:%S"),
                task.path.display()
            ));
        }
        msg
    }
}

#[derive(Debug)]
pub struct HangWatch {
    timeout: Duration,
    last_progress: Instant,
    registry: InFlightRegistry,
}

impl HangWatch {
    pub fn new(timeout: Duration, registry: InFlightRegistry) -> Self {
        Self {
            timeout,
            last_progress: Instant::now(),
            registry,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A task completed; restart the window.
    pub fn record_progress(&mut self) {
        self.last_progress = Instant::now();
    }

    pub fn check(&mut self) -> Option<HangAlert> {
        self.check_at(Instant::now())
    }

    /// Returns an alert if `now` is at least `timeout` past the last progress.
    /// Raising an alert restarts the window at `now`.
    pub fn check_at(&mut self, now: Instant) -> Option<HangAlert> {
        let idle_for = now.saturating_duration_since(self.last_progress);
        if idle_for < self.timeout {
            return None;
        }
        self.last_progress = now;
        Some(HangAlert {
            idle_for,
            detected_at: Local::now(),
            in_flight: self.registry.snapshot(),
        })
    }
}
