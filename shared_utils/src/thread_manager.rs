//! Worker pool sizing
//!
//! The pool size comes from, in priority order:
//! - an explicit command-line override
//! - the configured thread count
//! - the number of logical CPUs
//!
//! and is always capped at the number of tasks, so a folder of three images
//! never starts sixteen idle workers.

use std::sync::OnceLock;

/// Cached logical CPU count for this system
static AVAILABLE_CPUS: OnceLock<usize> = OnceLock::new();

/// Where the worker count came from, kept for the start-up log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSource {
    Override,
    Configured,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadAllocation {
    /// Number of worker threads pulling from the task queue
    pub workers: usize,
    pub source: WorkerSource,
}

pub fn available_cpus() -> usize {
    *AVAILABLE_CPUS.get_or_init(|| num_cpus::get().max(1))
}

/// Resolve the pool size. Zero requests are treated as absent.
pub fn resolve_worker_count(
    override_threads: Option<usize>,
    configured_threads: Option<usize>,
    task_count: usize,
) -> ThreadAllocation {
    let (requested, source) = match (
        override_threads.filter(|&n| n > 0),
        configured_threads.filter(|&n| n > 0),
    ) {
        (Some(n), _) => (n, WorkerSource::Override),
        (None, Some(n)) => (n, WorkerSource::Configured),
        (None, None) => (available_cpus(), WorkerSource::Auto),
    };

    ThreadAllocation {
        workers: requested.min(task_count.max(1)),
        source,
    }
}
