//! Daemon-wide defaults.

/// Container lifecycle defaults.
pub mod container {
    /// Seconds to wait after the stop signal before killing.
    pub const DEFAULT_STOP_TIMEOUT_SECS: i64 = 10;

    /// Signal sent on a graceful stop when the config names none.
    pub const DEFAULT_STOP_SIGNAL: &str = "SIGTERM";

    /// Exit code recorded when a start fails after partial setup.
    pub const START_FAILED_EXIT_CODE: i32 = 128;

    /// Exit code recorded for containers found running when the daemon restarts.
    pub const DAEMON_RESTART_EXIT_CODE: i32 = 255;

    /// Smallest memory limit accepted on create (6 MiB).
    pub const MIN_MEMORY_LIMIT_BYTES: i64 = 6 * 1024 * 1024;

    /// Smallest non-zero healthcheck duration (1ms).
    pub const MIN_HEALTHCHECK_DURATION_NANOS: i64 = 1_000_000;
}

/// Exec session defaults.
pub mod exec {
    /// Interval between exec garbage-collection sweeps.
    pub const GC_INTERVAL_SECS: u64 = 300;
}

/// Volume defaults.
pub mod volume {
    /// Name of the bundled driver.
    pub const DEFAULT_DRIVER: &str = "local";

    /// Subdirectory holding a local volume's data.
    pub const DATA_DIR: &str = "_data";
}

/// Restart manager tuning.
pub mod restart {
    /// First backoff delay in milliseconds.
    pub const BACKOFF_START_MS: u64 = 100;

    /// Backoff ceiling in milliseconds.
    pub const BACKOFF_MAX_MS: u64 = 60_000;

    /// A run at least this long resets the backoff.
    pub const RESET_AFTER_SECS: u64 = 10;
}
