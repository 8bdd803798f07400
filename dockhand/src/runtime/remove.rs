//! Container removal.

use std::collections::BTreeMap;
use std::sync::Arc;

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::rt_impl::DaemonImpl;
use crate::container::{Container, ContainerStatus, SharedHandle};
use crate::metrics::DaemonMetricsStorage;
use crate::supervisor::Signal;

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Kill a running container first.
    pub force: bool,
    /// Also remove anonymous volumes. Named volumes are kept.
    pub remove_volumes: bool,
}

fn running_conflict(id: &str, status: ContainerStatus) -> DockhandError {
    DockhandError::Conflict(format!(
        "You cannot remove a {} container {}. Stop the container before attempting removal or force remove",
        status, id
    ))
}

impl DaemonImpl {
    /// Remove a container. Removing an id that is already gone, or one whose
    /// removal is in flight, succeeds without doing anything.
    pub(crate) async fn container_remove(
        self: &Arc<Self>,
        key: &str,
        options: RemoveOptions,
    ) -> DockhandResult<()> {
        let handle = match self.container(key) {
            Ok(handle) => handle,
            Err(e) if e.is_not_found() && self.containers.was_removed(key) => return Ok(()),
            Err(e) => return Err(e),
        };

        let status = handle.status();
        if status.is_active() && !options.force {
            return Err(running_conflict(handle.id().as_str(), status));
        }
        if !handle.update(|c| c.state.set_removal_in_progress()) {
            tracing::debug!(container_id = %handle.id(), "Removal already in progress");
            return Ok(());
        }
        self.checkpoint_logged(&handle);

        let daemon = Arc::clone(self);
        tokio::spawn(async move {
            let _op = handle.op_lock.lock().await;
            daemon.remove_locked(&handle, options).await
        })
        .await
        .map_err(|e| DockhandError::Internal(format!("remove task failed: {}", e)))?
    }

    pub(crate) async fn remove_locked(
        &self,
        handle: &SharedHandle,
        options: RemoveOptions,
    ) -> DockhandResult<()> {
        let id = handle.id().clone();

        // The state may have changed while waiting for the op lock
        let status = handle.status();
        if status.is_active() {
            if !options.force {
                handle.update(|c| c.state.reset_removal_in_progress());
                self.checkpoint_logged(handle);
                return Err(running_conflict(id.as_str(), status));
            }
            if let Err(e) = self.force_stop(handle).await {
                handle.update(|c| c.state.reset_removal_in_progress());
                self.checkpoint_logged(handle);
                return Err(DockhandError::Engine(format!(
                    "Could not kill running container {}, cannot remove - {}",
                    id, e
                )));
            }
        }

        if let Err(e) = self.cleanup_container(handle, options).await {
            handle.update(|c| {
                c.state.set_dead();
                c.state.reset_removal_in_progress();
                c.state.error = e.to_string();
            });
            self.checkpoint_logged(handle);
            tracing::warn!(container_id = %id, error = %e, "Removal failed, container marked dead");
            return Err(e);
        }

        DaemonMetricsStorage::incr(&self.metrics.containers_removed);
        handle.with(|c| self.events.log_container_event(c, "destroy"));
        tracing::info!(container_id = %id, "Removed container");
        Ok(())
    }

    async fn force_stop(&self, handle: &SharedHandle) -> DockhandResult<()> {
        handle.restart_manager().cancel();
        handle.cancel_run();
        if handle.status() == ContainerStatus::Restarting {
            handle.update(|c| {
                let exit_code = c.state.exit_code;
                c.state.set_stopped(exit_code)
            })?;
            return Ok(());
        }
        let mut rx = handle.subscribe();
        self.kill_and_wait(handle, &mut rx).await
    }

    /// Tear down in an order that leaves a recoverable record on failure:
    /// execs, volumes, read-write layer, snapshot, registry entry.
    async fn cleanup_container(
        &self,
        handle: &SharedHandle,
        options: RemoveOptions,
    ) -> DockhandResult<()> {
        let id = handle.id().clone();

        handle.update(|c| c.exec_ids.clear());
        for session in self.execs.for_container(&id) {
            let (exec_id, running) = {
                let s = session.lock();
                (s.id.clone(), s.running)
            };
            if running
                && let Err(e) = self.supervisor.exec_signal(&id, &exec_id, Signal::SIGKILL).await
            {
                tracing::debug!(container_id = %id, exec_id = %exec_id, error = %e, "Failed to kill exec");
            }
            self.execs.delete(&exec_id);
        }

        let mounts = handle.with(|c| c.mount_points.clone());
        for mp in mounts.values().filter(|m| m.is_volume()) {
            self.volumes.dereference(&mp.name, id.as_str());
            if options.remove_volumes && !mp.named {
                match self.volumes.remove(&mp.name) {
                    Ok(()) => self
                        .events
                        .log_volume_event(&mp.name, "destroy", BTreeMap::new()),
                    Err(e) if e.is_in_use() || e.is_not_found() => {
                        tracing::debug!(volume = %mp.name, error = %e, "Keeping volume")
                    }
                    Err(e) => tracing::warn!(volume = %mp.name, error = %e, "Failed to remove volume"),
                }
            }
        }
        handle.update(|c| c.replace_mount_points(BTreeMap::new()));

        if let Some(layer) = handle.take_rw_layer() {
            while self.layers.is_mounted(&layer) {
                if let Err(e) = self.layers.unmount(&layer) {
                    handle.set_rw_layer(layer);
                    return Err(e);
                }
            }
            if let Err(e) = self.layers.release_rw_layer(layer.clone()) {
                // Keep the handle so a retry can release it
                handle.set_rw_layer(layer);
                return Err(e);
            }
        }

        Container::remove_from_disk(&self.layout, &id)?;
        self.containers.remove(&id);
        Ok(())
    }
}
