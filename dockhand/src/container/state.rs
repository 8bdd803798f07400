//! Container lifecycle state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dockhand_shared::errors::{DockhandError, DockhandResult};

/// Lifecycle status of a container.
///
/// ```text
/// Created ──start──> Running <──pause/unpause──> Paused
///    │                  │  ▲
///    │                exit │ restart
///    │                  ▼  │
///    │              Restarting
///    ▼                  │
/// Exited <──────────────┘  (any active state on exit/stop)
///
/// Dead: removal failed part-way; only removal is allowed.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
}

impl ContainerStatus {
    /// A process exists (or is about to be restarted).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ContainerStatus::Running | ContainerStatus::Paused | ContainerStatus::Restarting
        )
    }

    pub fn can_start(self) -> bool {
        matches!(self, ContainerStatus::Created | ContainerStatus::Exited)
    }

    pub fn can_transition_to(self, next: ContainerStatus) -> bool {
        use ContainerStatus::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Created, Exited)
                | (Created, Dead)
                | (Running, Paused)
                | (Running, Restarting)
                | (Running, Exited)
                | (Running, Dead)
                | (Paused, Running)
                | (Paused, Exited)
                | (Paused, Dead)
                | (Restarting, Running)
                | (Restarting, Exited)
                | (Restarting, Dead)
                | (Exited, Running)
                | (Exited, Dead)
        )
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
        };
        write!(f, "{}", s)
    }
}

/// Mutable lifecycle state, persisted with the container snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub status: ContainerStatus,
    pub pid: Option<u32>,
    pub exit_code: i32,
    /// Last start or runtime error.
    #[serde(default)]
    pub error: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Orthogonal to `status`: set while a removal runs, blocks every
    /// other transition.
    #[serde(default)]
    pub removal_in_progress: bool,
    /// Stopped through the API; `unless-stopped` will not restart it.
    #[serde(default)]
    pub manually_stopped: bool,
    #[serde(default)]
    pub restart_count: u32,
}

impl Default for ContainerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerState {
    pub fn new() -> Self {
        Self {
            status: ContainerStatus::Created,
            pid: None,
            exit_code: 0,
            error: String::new(),
            started_at: None,
            finished_at: None,
            removal_in_progress: false,
            manually_stopped: false,
            restart_count: 0,
        }
    }

    /// Validate and apply a status change.
    pub fn transition_to(&mut self, next: ContainerStatus) -> DockhandResult<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(DockhandError::InvalidState(format!(
                "cannot transition from {} to {}",
                self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn set_running(&mut self, pid: u32) -> DockhandResult<()> {
        self.transition_to(ContainerStatus::Running)?;
        self.pid = Some(pid);
        self.exit_code = 0;
        self.error.clear();
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn set_stopped(&mut self, exit_code: i32) -> DockhandResult<()> {
        self.transition_to(ContainerStatus::Exited)?;
        self.pid = None;
        self.exit_code = exit_code;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn set_restarting(&mut self, exit_code: i32) -> DockhandResult<()> {
        self.transition_to(ContainerStatus::Restarting)?;
        self.pid = None;
        self.exit_code = exit_code;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Record a failed start. The status stays `Created` for a container
    /// that never ran, otherwise it becomes `Exited`.
    pub fn set_start_failed(&mut self, exit_code: i32, error: &str) {
        if self.status != ContainerStatus::Created {
            self.status = ContainerStatus::Exited;
        }
        self.pid = None;
        self.exit_code = exit_code;
        self.error = error.to_string();
        self.finished_at = Some(Utc::now());
    }

    /// Mark removal as started. Returns `false` if it already was.
    pub fn set_removal_in_progress(&mut self) -> bool {
        if self.removal_in_progress {
            return false;
        }
        self.removal_in_progress = true;
        true
    }

    pub fn reset_removal_in_progress(&mut self) {
        self.removal_in_progress = false;
    }

    pub fn set_dead(&mut self) {
        self.status = ContainerStatus::Dead;
        self.pid = None;
    }

    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status == ContainerStatus::Paused
    }

    /// Human-readable summary, e.g. `Up since ...` or `Exited (1)`.
    pub fn describe(&self) -> String {
        match self.status {
            ContainerStatus::Running | ContainerStatus::Paused => {
                let since = self
                    .started_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                if self.status == ContainerStatus::Paused {
                    format!("Up since {} (Paused)", since)
                } else {
                    format!("Up since {}", since)
                }
            }
            ContainerStatus::Restarting => format!("Restarting ({})", self.exit_code),
            ContainerStatus::Exited => format!("Exited ({})", self.exit_code),
            ContainerStatus::Created => "Created".to_string(),
            ContainerStatus::Dead => "Dead".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = ContainerState::new();
        assert_eq!(state.status, ContainerStatus::Created);
        assert!(state.status.can_start());
        assert!(!state.status.is_active());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut state = ContainerState::new();
        state.set_running(42).unwrap();
        assert_eq!(state.pid, Some(42));

        state.transition_to(ContainerStatus::Paused).unwrap();
        assert!(state.transition_to(ContainerStatus::Restarting).is_err());
        state.transition_to(ContainerStatus::Running).unwrap();

        state.set_restarting(1).unwrap();
        state.set_running(43).unwrap();
        state.set_stopped(137).unwrap();
        assert_eq!(state.exit_code, 137);
        assert_eq!(state.pid, None);
        assert!(state.status.can_start());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut state = ContainerState::new();
        assert!(state.transition_to(ContainerStatus::Paused).is_err());
        assert!(state.transition_to(ContainerStatus::Restarting).is_err());

        state.set_dead();
        assert!(state.transition_to(ContainerStatus::Running).is_err());
        assert!(!state.status.can_start());
    }

    #[test]
    fn test_start_failed_keeps_created() {
        let mut state = ContainerState::new();
        state.set_start_failed(128, "boom");
        assert_eq!(state.status, ContainerStatus::Created);
        assert_eq!(state.exit_code, 128);

        state.set_running(1).unwrap();
        state.set_stopped(0).unwrap();
        state.set_start_failed(128, "boom again");
        assert_eq!(state.status, ContainerStatus::Exited);
        assert_eq!(state.error, "boom again");
    }

    #[test]
    fn test_removal_flag_is_exclusive() {
        let mut state = ContainerState::new();
        assert!(state.set_removal_in_progress());
        assert!(!state.set_removal_in_progress());
        state.reset_removal_in_progress();
        assert!(state.set_removal_in_progress());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ContainerStatus::Restarting).unwrap();
        assert_eq!(json, "\"restarting\"");
    }
}
