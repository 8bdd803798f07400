//! Stop, kill and wait.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::rt_impl::DaemonImpl;
use crate::container::{ContainerStatus, SharedHandle, StatusEvent};
use crate::supervisor::{Signal, parse_signal};

fn has_process(status: ContainerStatus) -> bool {
    matches!(status, ContainerStatus::Running | ContainerStatus::Paused)
}

/// Wait until the process is gone. `None` waits forever. Returns false on
/// timeout.
async fn wait_stopped(rx: &mut watch::Receiver<StatusEvent>, timeout: Option<Duration>) -> bool {
    let wait = rx.wait_for(|e| !has_process(e.status));
    match timeout {
        None => {
            let _ = wait.await;
            true
        }
        Some(limit) => tokio::time::timeout(limit, wait).await.is_ok(),
    }
}

impl DaemonImpl {
    /// Stop a running container: stop signal, grace period, then SIGKILL.
    ///
    /// `timeout` overrides the container's stop timeout; negative waits
    /// forever. Runs to completion even if the caller goes away.
    pub(crate) async fn container_stop(
        self: &Arc<Self>,
        key: &str,
        timeout: Option<i64>,
    ) -> DockhandResult<()> {
        let handle = self.container(key)?;
        let daemon = Arc::clone(self);
        tokio::spawn(async move {
            let _op = handle.op_lock.lock().await;
            daemon.stop_locked(&handle, timeout).await
        })
        .await
        .map_err(|e| DockhandError::Internal(format!("stop task failed: {}", e)))?
    }

    pub(crate) async fn stop_locked(
        &self,
        handle: &SharedHandle,
        timeout: Option<i64>,
    ) -> DockhandResult<()> {
        let id = handle.id().clone();
        let status = handle.status();

        handle.restart_manager().cancel();
        match status {
            ContainerStatus::Running | ContainerStatus::Paused => {}
            ContainerStatus::Restarting => {
                // No process; drop the pending restart
                handle.cancel_run();
                handle.update(|c| {
                    c.state.manually_stopped = true;
                    let exit_code = c.state.exit_code;
                    c.state.set_stopped(exit_code)
                })?;
                self.checkpoint_logged(handle);
                handle.with(|c| self.events.log_container_event(c, "stop"));
                tracing::info!(container_id = %id, "Cancelled pending restart");
                return Ok(());
            }
            _ => {
                return Err(DockhandError::InvalidState(format!(
                    "Container {} is not running",
                    id
                )));
            }
        }

        let (signal, grace) = handle.update(|c| {
            c.state.manually_stopped = true;
            let grace = timeout.unwrap_or_else(|| c.stop_timeout(Some(self.options.default_stop_timeout_secs)));
            (c.stop_signal().to_string(), grace)
        });
        self.checkpoint_logged(handle);
        let signal = parse_signal(&signal).unwrap_or_else(|e| {
            tracing::warn!(container_id = %id, error = %e, "Invalid stop signal, using SIGTERM");
            Signal::SIGTERM
        });

        let mut rx = handle.subscribe();
        tracing::info!(container_id = %id, signal = %signal, timeout = grace, "Stopping container");
        if let Err(e) = self.supervisor.signal(&id, signal).await {
            tracing::warn!(container_id = %id, error = %e, "Failed to send stop signal");
        }
        if status == ContainerStatus::Paused
            && let Err(e) = self.supervisor.resume(&id).await
        {
            tracing::warn!(container_id = %id, error = %e, "Failed to resume paused container for stop");
        }

        let limit = u64::try_from(grace).ok().map(Duration::from_secs);
        if !wait_stopped(&mut rx, limit).await {
            tracing::info!(container_id = %id, "Stop timeout exceeded, killing container");
            self.kill_and_wait(handle, &mut rx).await?;
        }

        handle.with(|c| self.events.log_container_event(c, "stop"));
        tracing::info!(container_id = %id, "Stopped container");
        Ok(())
    }

    /// SIGKILL and wait for the exit to be recorded.
    pub(crate) async fn kill_and_wait(
        &self,
        handle: &SharedHandle,
        rx: &mut watch::Receiver<StatusEvent>,
    ) -> DockhandResult<()> {
        if let Err(e) = self.supervisor.signal(handle.id(), Signal::SIGKILL).await {
            // The process may have exited on its own in the meantime
            if has_process(handle.status()) {
                return Err(DockhandError::Engine(format!(
                    "Could not kill container {}: {}",
                    handle.id(),
                    e
                )));
            }
        }
        wait_stopped(rx, None).await;
        Ok(())
    }

    /// Send `signal` (default SIGKILL) to the main process.
    pub(crate) async fn container_kill(&self, key: &str, signal: Option<&str>) -> DockhandResult<()> {
        let handle = self.container(key)?;
        let signal = match signal {
            Some(s) => parse_signal(s)?,
            None => Signal::SIGKILL,
        };
        if !has_process(handle.status()) {
            return Err(DockhandError::InvalidState(format!(
                "Container {} is not running",
                handle.id()
            )));
        }
        if signal == Signal::SIGKILL {
            handle.restart_manager().cancel();
            handle.update(|c| c.state.manually_stopped = true);
        }
        self.supervisor.signal(handle.id(), signal).await?;
        handle.with(|c| self.events.log_container_event(c, "kill"));
        Ok(())
    }

    /// Block until the container is not running; returns its exit code.
    pub(crate) async fn container_wait(&self, key: &str) -> DockhandResult<i32> {
        let handle = self.container(key)?;
        let mut rx = handle.subscribe();
        let event = match rx.wait_for(|e| !e.status.is_active()).await {
            Ok(event) => *event,
            Err(_) => return Err(DockhandError::Internal("container status channel closed".into())),
        };
        Ok(event.exit_code)
    }
}
