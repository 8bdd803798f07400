//! Pause and unpause.

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::rt_impl::DaemonImpl;
use crate::container::ContainerStatus;

impl DaemonImpl {
    pub(crate) async fn container_pause(&self, key: &str) -> DockhandResult<()> {
        let handle = self.container(key)?;
        let _op = handle.op_lock.lock().await;
        let id = handle.id().clone();

        let (status, removing) = handle.with(|c| (c.status(), c.state.removal_in_progress));
        if removing {
            return Err(DockhandError::Conflict(format!(
                "Container {} is marked for removal",
                id
            )));
        }
        match status {
            ContainerStatus::Running => {}
            ContainerStatus::Paused => {
                return Err(DockhandError::InvalidState(format!(
                    "Container {} is already paused",
                    id
                )));
            }
            ContainerStatus::Restarting => {
                return Err(DockhandError::InvalidState(format!(
                    "Container {} is restarting, wait until the container is running",
                    id
                )));
            }
            _ => {
                return Err(DockhandError::InvalidState(format!(
                    "Container {} is not running",
                    id
                )));
            }
        }

        self.supervisor.pause(&id).await?;
        handle.update(|c| c.state.transition_to(ContainerStatus::Paused))?;
        self.checkpoint_logged(&handle);
        handle.with(|c| self.events.log_container_event(c, "pause"));
        tracing::info!(container_id = %id, "Paused container");
        Ok(())
    }

    pub(crate) async fn container_unpause(&self, key: &str) -> DockhandResult<()> {
        let handle = self.container(key)?;
        let _op = handle.op_lock.lock().await;
        let id = handle.id().clone();

        if handle.status() != ContainerStatus::Paused {
            return Err(DockhandError::InvalidState(format!(
                "Container {} is not paused",
                id
            )));
        }

        self.supervisor.resume(&id).await?;
        handle.update(|c| c.state.transition_to(ContainerStatus::Running))?;
        self.checkpoint_logged(&handle);
        handle.with(|c| self.events.log_container_event(c, "unpause"));
        tracing::info!(container_id = %id, "Unpaused container");
        Ok(())
    }
}
