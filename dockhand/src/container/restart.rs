//! Restart policy evaluation with exponential backoff.

use std::time::Duration;

use dockhand_shared::constants::restart::{BACKOFF_MAX_MS, BACKOFF_START_MS, RESET_AFTER_SECS};

use super::config::{RestartPolicy, RestartPolicyName};

#[derive(Debug, Clone)]
pub(crate) struct RestartManager {
    policy: RestartPolicy,
    restart_count: u32,
    timeout: Duration,
    canceled: bool,
}

impl RestartManager {
    pub(crate) fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            restart_count: 0,
            timeout: Duration::ZERO,
            canceled: false,
        }
    }

    pub(crate) fn set_policy(&mut self, policy: RestartPolicy) {
        self.policy = policy;
    }

    /// Re-arm after an explicit start: retry budget and backoff start over.
    pub(crate) fn reset(&mut self) {
        self.canceled = false;
        self.restart_count = 0;
        self.timeout = Duration::ZERO;
    }

    /// Suppress any further restarts until the next [`reset`](Self::reset).
    pub(crate) fn cancel(&mut self) {
        self.canceled = true;
    }

    pub(crate) fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Decide whether a container that exited with `exit_code` after running
    /// for `ran_for` should be restarted, and after which delay.
    pub(crate) fn should_restart(
        &mut self,
        exit_code: i32,
        manually_stopped: bool,
        ran_for: Duration,
    ) -> Option<Duration> {
        if self.canceled {
            return None;
        }

        if ran_for >= Duration::from_secs(RESET_AFTER_SECS) {
            self.timeout = Duration::ZERO;
        }
        let max = Duration::from_millis(BACKOFF_MAX_MS);
        self.timeout = if self.timeout.is_zero() {
            Duration::from_millis(BACKOFF_START_MS)
        } else {
            (self.timeout * 2).min(max)
        };

        let restart = match self.policy.name {
            RestartPolicyName::No => false,
            RestartPolicyName::Always => true,
            RestartPolicyName::UnlessStopped => !manually_stopped,
            RestartPolicyName::OnFailure => {
                let max_retries = self.policy.maximum_retry_count;
                let under_limit =
                    max_retries == 0 || i64::from(self.restart_count) < max_retries;
                under_limit && exit_code != 0
            }
        };

        if !restart {
            return None;
        }
        self.restart_count += 1;
        Some(self.timeout)
    }
}
