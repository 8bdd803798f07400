//! Exec sessions and their garbage collection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::rt_impl::DaemonImpl;
use crate::container::{ContainerStatus, SharedHandle};
use crate::exec::{self, ExecConfig, ExecInspect, ExecSession};
use crate::metrics::DaemonMetricsStorage;
use crate::runtime::types::ExecId;
use crate::supervisor::ExecSpec;
use crate::util::generate_id;

/// Container must be running, not paused, not restarting, not being removed.
fn check_exec_target(handle: &SharedHandle) -> DockhandResult<()> {
    let (status, removing) = handle.with(|c| (c.status(), c.state.removal_in_progress));
    let id = handle.id();
    if removing {
        return Err(DockhandError::Conflict(format!(
            "Container {} is marked for removal",
            id
        )));
    }
    match status {
        ContainerStatus::Running => Ok(()),
        ContainerStatus::Paused => Err(DockhandError::InvalidState(format!(
            "Container {} is paused, unpause the container before exec",
            id
        ))),
        ContainerStatus::Restarting => Err(DockhandError::InvalidState(format!(
            "Container {} is restarting, wait until the container is running",
            id
        ))),
        _ => Err(DockhandError::InvalidState(format!(
            "Container {} is not running",
            id
        ))),
    }
}

impl DaemonImpl {
    pub(crate) fn exec_create(&self, key: &str, config: ExecConfig) -> DockhandResult<ExecId> {
        if config.cmd.is_empty() {
            return Err(DockhandError::InvalidParameter(
                "No exec command specified".into(),
            ));
        }
        let handle = self.container(key)?;
        check_exec_target(&handle)?;

        let exec_id = generate_id();
        let action = format!("exec_create: {}", config.cmd.join(" "));
        self.execs
            .add(ExecSession::new(exec_id.clone(), handle.id().clone(), config));
        handle.update(|c| c.exec_ids.insert(exec_id.clone()));
        handle.with(|c| self.events.log_container_event(c, &action));
        tracing::debug!(container_id = %handle.id(), exec_id = %exec_id, "Created exec session");
        Ok(exec_id)
    }

    /// Launch a created session. Returns once the process runs; the exit is
    /// recorded in the background.
    pub(crate) async fn exec_start(self: &Arc<Self>, exec_id: &str) -> DockhandResult<()> {
        let session = self.execs.get(exec_id)?;
        let (container_id, config) = {
            let s = session.lock();
            if s.running {
                return Err(DockhandError::Conflict(format!(
                    "Exec {} is already running",
                    exec_id
                )));
            }
            if s.started {
                return Err(DockhandError::Conflict(format!(
                    "Exec {} has already run",
                    exec_id
                )));
            }
            (s.container_id.clone(), s.config.clone())
        };

        let handle = self.container(container_id.as_str())?;
        check_exec_target(&handle)?;
        let rootfs = handle.rootfs().ok_or_else(|| {
            DockhandError::InvalidState(format!("Container {} is not running", container_id))
        })?;

        let (mut env, working_dir, user) = handle.with(|c| {
            (
                c.config.env.clone(),
                c.config.working_dir.clone(),
                c.config.user.clone(),
            )
        });
        env.extend(config.env.iter().cloned());
        let spec = ExecSpec {
            container_id: container_id.clone(),
            exec_id: exec_id.to_string(),
            args: config.cmd.clone(),
            env,
            working_dir: if config.working_dir.is_empty() {
                working_dir
            } else {
                config.working_dir.clone()
            },
            user: if config.user.is_empty() {
                user
            } else {
                config.user.clone()
            },
            tty: config.tty,
            privileged: config.privileged,
            rootfs: rootfs.upper,
        };

        let pid = self.supervisor.exec_start(spec).await?;
        session.lock().set_running(pid);
        DaemonMetricsStorage::incr(&self.metrics.execs_started);
        handle.with(|c| {
            self.events
                .log_container_event(c, &format!("exec_start: {}", config.cmd.join(" ")))
        });
        tracing::info!(container_id = %container_id, exec_id = %exec_id, pid, "Started exec");

        let daemon = Arc::clone(self);
        let exec_id = exec_id.to_string();
        tokio::spawn(async move {
            let exit_code = match daemon.supervisor.exec_wait(&container_id, &exec_id).await {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(exec_id = %exec_id, error = %e, "Lost track of exec process");
                    -1
                }
            };
            session.lock().set_exited(exit_code);
            if let Ok(handle) = daemon.container(container_id.as_str()) {
                handle.update(|c| c.exec_ids.remove(&exec_id));
                handle.with(|c| {
                    daemon.events.log_container_event_with(
                        c,
                        "exec_die",
                        [
                            ("execID".to_string(), exec_id.clone()),
                            ("exitCode".to_string(), exit_code.to_string()),
                        ]
                        .into(),
                    )
                });
            }
            tracing::debug!(exec_id = %exec_id, exit_code, "Exec exited");
        });
        Ok(())
    }

    pub(crate) fn exec_inspect(&self, exec_id: &str) -> DockhandResult<ExecInspect> {
        Ok(self.execs.get(exec_id)?.lock().inspect())
    }

    pub(crate) async fn exec_resize(&self, exec_id: &str, height: u16, width: u16) -> DockhandResult<()> {
        let session = self.execs.get(exec_id)?;
        let (container_id, running) = {
            let s = session.lock();
            (s.container_id.clone(), s.running)
        };
        if !running {
            return Err(DockhandError::InvalidState(format!(
                "Exec {} is not running",
                exec_id
            )));
        }
        self.supervisor
            .exec_resize(&container_id, exec_id, height, width)
            .await
    }

    /// Wait for a started session to exit.
    pub(crate) async fn exec_wait(&self, exec_id: &str) -> DockhandResult<i32> {
        let mut rx = self.execs.get(exec_id)?.lock().subscribe_exit();
        match rx.wait_for(Option::is_some).await {
            Ok(code) => Ok((*code).unwrap_or_default()),
            Err(_) => Err(DockhandError::Internal("exec status channel closed".into())),
        }
    }

    /// One GC sweep over a snapshot of exec ids still attached to containers.
    pub(crate) fn collect_execs(&self) -> usize {
        let live: HashSet<ExecId> = self
            .containers
            .list()
            .iter()
            .flat_map(|h| h.with(|c| c.exec_ids.iter().cloned().collect::<Vec<_>>()))
            .collect();
        exec::collect(&self.execs, &live)
    }

    /// Periodic exec GC until shutdown.
    pub(crate) fn spawn_exec_gc(self: &Arc<Self>) {
        let daemon = Arc::clone(self);
        let period = Duration::from_secs(self.options.exec_gc_interval_secs.max(1));
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = daemon.shutdown_token.cancelled() => break,
                    _ = interval.tick() => {
                        daemon.collect_execs();
                    }
                }
            }
            tracing::debug!("Exec GC stopped");
        });
        self.track_background(task);
    }
}
