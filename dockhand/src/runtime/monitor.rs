//! Exit handling and policy restarts.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::rt_impl::DaemonImpl;
use crate::container::{ContainerStatus, SharedHandle};
use crate::metrics::DaemonMetricsStorage;
use crate::runtime::remove::RemoveOptions;

/// Exit code recorded when the supervisor lost track of the process.
const UNKNOWN_EXIT_CODE: i32 = 255;

impl DaemonImpl {
    /// Watch the main process of a freshly started container.
    pub(crate) fn spawn_monitor(self: &Arc<Self>, handle: SharedHandle) {
        let daemon = Arc::clone(self);
        let token = handle.run_token();
        tokio::spawn(async move {
            let exit_code = match daemon.supervisor.wait(handle.id()).await {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(container_id = %handle.id(), error = %e, "Lost track of container process");
                    UNKNOWN_EXIT_CODE
                }
            };
            daemon.handle_exit(handle, exit_code, token).await;
        });
    }

    async fn handle_exit(self: Arc<Self>, handle: SharedHandle, exit_code: i32, token: CancellationToken) {
        let id = handle.id().clone();
        DaemonMetricsStorage::incr(&self.metrics.containers_exited);

        let (ran_for, manually_stopped, removing, auto_remove) = handle.with(|c| {
            let ran_for = c
                .state
                .started_at
                .and_then(|t| (Utc::now() - t).to_std().ok())
                .unwrap_or_default();
            (
                ran_for,
                c.state.manually_stopped,
                c.state.removal_in_progress,
                c.host_config.auto_remove,
            )
        });

        let delay = if removing || token.is_cancelled() {
            None
        } else {
            let shutting_down = self.shutdown_token.is_cancelled();
            handle
                .restart_manager()
                .should_restart(exit_code, manually_stopped || shutting_down, ran_for)
        };

        let rw_layer = handle.rw_layer();
        handle.set_rootfs(None);
        let updated = handle.update(|c| {
            if let Some(layer) = &rw_layer
                && let Err(e) = self.layers.unmount(layer)
            {
                tracing::warn!(container_id = %c.id, error = %e, "Failed to unmount exited container");
            }
            match delay {
                Some(_) => c.state.set_restarting(exit_code),
                None => c.state.set_stopped(exit_code),
            }
        });
        if let Err(e) = updated {
            tracing::warn!(container_id = %id, error = %e, "Unexpected state on exit");
        }
        self.checkpoint_logged(&handle);
        handle.with(|c| {
            self.events.log_container_event_with(
                c,
                "die",
                BTreeMap::from([("exitCode".to_string(), exit_code.to_string())]),
            )
        });
        tracing::info!(container_id = %id, exit_code, "Container exited");

        let Some(delay) = delay else {
            if auto_remove && !removing {
                let options = RemoveOptions {
                    force: false,
                    remove_volumes: true,
                };
                if let Err(e) = self.container_remove(id.as_str(), options).await {
                    tracing::warn!(container_id = %id, error = %e, "Auto-remove failed");
                }
            }
            return;
        };

        tracing::info!(container_id = %id, delay_ms = delay.as_millis() as u64, "Restarting container");
        tokio::select! {
            _ = token.cancelled() => {}
            _ = self.shutdown_token.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }

        let _op = handle.op_lock.lock().await;
        if token.is_cancelled() || self.shutdown_token.is_cancelled() {
            // Stop or remove raced the delay; settle a still-pending restart
            let settled = handle.update(|c| {
                if c.status() == ContainerStatus::Restarting {
                    c.state.set_stopped(exit_code).is_ok()
                } else {
                    false
                }
            });
            if settled {
                self.checkpoint_logged(&handle);
            }
            return;
        }
        if handle.status() != ContainerStatus::Restarting {
            return;
        }
        if let Err(e) = self.start_locked(&handle, true).await {
            tracing::warn!(container_id = %id, error = %e, "Failed to restart container");
        }
    }
}
