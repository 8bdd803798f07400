//! Daemon-wide counters.

mod daemon_metrics;

pub use daemon_metrics::DaemonMetrics;
pub(crate) use daemon_metrics::DaemonMetricsStorage;
