//! Rebuild in-memory state from disk at startup.

use std::sync::Arc;

use futures::future::join_all;

use dockhand_shared::constants::container::DAEMON_RESTART_EXIT_CODE;

use super::remove::RemoveOptions;
use super::rt_impl::DaemonImpl;
use crate::container::{Container, ContainerHandle, RestartPolicyName, SharedHandle};

impl DaemonImpl {
    /// Load every container snapshot and bring it to a consistent state.
    ///
    /// Processes do not survive a daemon restart, so containers recorded as
    /// active are marked exited. Interrupted removals are finished and
    /// always-restart containers are started again. Layers nothing claimed
    /// are collected at the end.
    pub(crate) async fn restore(self: &Arc<Self>) {
        let mut to_remove = Vec::new();
        let mut to_restart = Vec::new();

        for container in Container::load_all(&self.layout) {
            let Some(handle) = self.restore_container(container) else {
                continue;
            };
            let (removing, policy, manually_stopped) = handle.with(|c| {
                (
                    c.state.removal_in_progress,
                    c.host_config.restart_policy.name,
                    c.state.manually_stopped,
                )
            });
            if removing {
                to_remove.push(handle);
                continue;
            }
            self.prepare_mount_points(&handle);
            let restart = match policy {
                RestartPolicyName::Always => true,
                RestartPolicyName::UnlessStopped => !manually_stopped,
                _ => false,
            };
            if restart {
                to_restart.push(handle);
            }
        }

        for handle in to_remove {
            handle.update(|c| c.state.reset_removal_in_progress());
            let options = RemoveOptions {
                force: true,
                remove_volumes: true,
            };
            if let Err(e) = self.container_remove(handle.id().as_str(), options).await {
                tracing::warn!(container_id = %handle.id(), error = %e, "Failed to finish interrupted removal");
            }
        }

        let restarts = to_restart.into_iter().map(|handle| {
            let daemon = Arc::clone(self);
            async move {
                if let Err(e) = daemon.container_start(handle.id().as_str()).await {
                    tracing::warn!(container_id = %handle.id(), error = %e, "Failed to restart container on restore");
                }
            }
        });
        join_all(restarts).await;

        match self.layers.collect_orphans() {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!(count = removed.len(), "Removed orphaned layers")
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to collect orphaned layers"),
        }
        tracing::info!(containers = self.containers.len(), "Restored containers");
    }

    fn restore_container(&self, mut container: Container) -> Option<SharedHandle> {
        let id = container.id.clone();

        if let Err(e) = self.containers.reserve_name(&container.name, &id) {
            tracing::warn!(container_id = %id, error = %e, "Skipping container with conflicting name");
            return None;
        }

        let rw_layer = match self.layers.get_rw_layer(&container.rw_layer) {
            Ok(layer) => Some(layer),
            Err(e) => {
                tracing::warn!(container_id = %id, error = %e, "Read-write layer missing");
                None
            }
        };

        let was_active = container.status().is_active();
        if was_active && let Err(e) = container.state.set_stopped(DAEMON_RESTART_EXIT_CODE) {
            tracing::warn!(container_id = %id, error = %e, "Unexpected state on restore");
        }
        if let Some(layer) = &rw_layer {
            while self.layers.is_mounted(layer) {
                if let Err(e) = self.layers.unmount(layer) {
                    tracing::warn!(container_id = %id, error = %e, "Failed to unmount on restore");
                    break;
                }
            }
        }

        let handle = ContainerHandle::new(container, rw_layer);
        if was_active {
            self.checkpoint_logged(&handle);
        }
        self.containers.add(handle.clone());
        tracing::debug!(container_id = %id, "Restored container");
        Some(handle)
    }
}
