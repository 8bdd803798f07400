//! Daemon-level metrics (aggregate across all containers).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Storage for daemon-wide metrics.
///
/// All counters are monotonic (never decrease).
#[derive(Clone, Default)]
pub(crate) struct DaemonMetricsStorage {
    /// Containers created since daemon startup
    pub(crate) containers_created: Arc<AtomicU64>,
    /// Successful starts, including policy restarts
    pub(crate) containers_started: Arc<AtomicU64>,
    /// Starts that failed after setup began
    pub(crate) start_failures: Arc<AtomicU64>,
    /// Observed process exits
    pub(crate) containers_exited: Arc<AtomicU64>,
    pub(crate) containers_removed: Arc<AtomicU64>,
    pub(crate) execs_started: Arc<AtomicU64>,
    pub(crate) images_committed: Arc<AtomicU64>,
}

impl DaemonMetricsStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle for querying daemon-wide metrics.
///
/// Cloneable, lightweight handle (only Arc pointers).
#[derive(Clone)]
pub struct DaemonMetrics {
    storage: DaemonMetricsStorage,
}

impl DaemonMetrics {
    pub(crate) fn new(storage: DaemonMetricsStorage) -> Self {
        Self { storage }
    }

    /// Total containers created since daemon startup.
    pub fn containers_created_total(&self) -> u64 {
        self.storage.containers_created.load(Ordering::Relaxed)
    }

    /// Total successful starts, restarts included.
    pub fn containers_started_total(&self) -> u64 {
        self.storage.containers_started.load(Ordering::Relaxed)
    }

    pub fn start_failures_total(&self) -> u64 {
        self.storage.start_failures.load(Ordering::Relaxed)
    }

    pub fn containers_exited_total(&self) -> u64 {
        self.storage.containers_exited.load(Ordering::Relaxed)
    }

    pub fn containers_removed_total(&self) -> u64 {
        self.storage.containers_removed.load(Ordering::Relaxed)
    }

    /// Number of container processes currently alive.
    ///
    /// Calculated as: containers_started - containers_exited
    pub fn num_running_containers(&self) -> u64 {
        self.containers_started_total()
            .saturating_sub(self.containers_exited_total())
    }

    pub fn execs_started_total(&self) -> u64 {
        self.storage.execs_started.load(Ordering::Relaxed)
    }

    pub fn images_committed_total(&self) -> u64 {
        self.storage.images_committed.load(Ordering::Relaxed)
    }
}
