//! Container start.

use std::collections::BTreeMap;
use std::sync::Arc;

use dockhand_shared::constants::container::START_FAILED_EXIT_CODE;
use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::rt_impl::DaemonImpl;
use crate::container::links::{link_env, parse_link};
use crate::container::validate::validate_runtime;
use crate::container::{ContainerStatus, SharedHandle, env_key};
use crate::layer::RwLayer;
use crate::metrics::DaemonMetricsStorage;
use crate::supervisor::ProcessSpec;

const DEFAULT_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Append `entries`, replacing earlier values of the same key.
fn merge_env(env: &mut Vec<String>, entries: impl IntoIterator<Item = String>) {
    for entry in entries {
        let key = env_key(&entry).to_string();
        env.retain(|e| env_key(e) != key);
        env.push(entry);
    }
}

impl DaemonImpl {
    /// Start a created or exited container.
    pub(crate) async fn container_start(self: &Arc<Self>, key: &str) -> DockhandResult<()> {
        let handle = self.container(key)?;
        let _op = handle.op_lock.lock().await;
        self.start_locked(&handle, false).await
    }

    /// Start with the op lock held. `restart` is set by the restart manager.
    pub(crate) async fn start_locked(
        self: &Arc<Self>,
        handle: &SharedHandle,
        restart: bool,
    ) -> DockhandResult<()> {
        let id = handle.id().clone();
        let (status, removing) = handle.with(|c| (c.status(), c.state.removal_in_progress));

        if removing || status == ContainerStatus::Dead {
            return Err(DockhandError::Conflict(format!(
                "Container {} is marked for removal and cannot be started",
                id
            )));
        }
        match status {
            ContainerStatus::Restarting if restart => {}
            ContainerStatus::Created | ContainerStatus::Exited if !restart => {}
            ContainerStatus::Paused => {
                return Err(DockhandError::InvalidState(format!(
                    "Cannot start a paused container {}, try unpause instead",
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
                    "Container {} is already running",
                    id
                )));
            }
        }

        let host_config = handle.with(|c| c.host_config.clone());
        validate_runtime(&host_config, &self.capabilities)?;

        if !restart {
            handle.reset_run_token();
            let mut rm = handle.restart_manager();
            rm.set_policy(host_config.restart_policy);
            rm.reset();
            drop(rm);
            handle.update(|c| c.state.manually_stopped = false);
        }

        let rw_layer = handle.rw_layer().ok_or_else(|| {
            DockhandError::Internal(format!("container {} has no read-write layer", id))
        })?;

        // Setup from here on is undone by start_failed
        let started = match self.layers.mount(&rw_layer) {
            Ok(rootfs) => match self.build_process_spec(handle, rootfs.clone()) {
                Ok(spec) => {
                    handle.set_rootfs(Some(rootfs));
                    self.supervisor.start(spec).await
                }
                Err(e) => Err(e),
            },
            Err(e) => {
                self.start_failed(handle, None, &e);
                return Err(e);
            }
        };

        let pid = match started {
            Ok(pid) => pid,
            Err(e) => {
                self.start_failed(handle, Some(&rw_layer), &e);
                return Err(e);
            }
        };

        let restart_count = handle.restart_manager().restart_count();
        if let Err(e) = handle.update(|c| {
            c.state.restart_count = restart_count;
            c.state.set_running(pid)
        }) {
            tracing::error!(container_id = %id, error = %e, "Process started in unexpected state");
        }
        self.checkpoint_logged(handle);
        DaemonMetricsStorage::incr(&self.metrics.containers_started);
        handle.with(|c| {
            let action = if restart { "restart" } else { "start" };
            self.events.log_container_event(c, action)
        });
        tracing::info!(container_id = %id, pid, restart, "Started container");

        self.spawn_monitor(handle.clone());
        Ok(())
    }

    fn build_process_spec(
        &self,
        handle: &SharedHandle,
        rootfs: crate::layer::RootfsMount,
    ) -> DockhandResult<ProcessSpec> {
        let mounts = self.setup_mounts(handle)?;
        let links = self.linked_env(handle)?;
        let container = handle.snapshot();

        let hostname = if container.config.hostname.is_empty() {
            container.id.short().to_string()
        } else {
            container.config.hostname.clone()
        };

        let mut env = vec![DEFAULT_PATH.to_string(), format!("HOSTNAME={}", hostname)];
        if container.config.tty {
            env.push("TERM=xterm".into());
        }
        merge_env(&mut env, links);
        merge_env(&mut env, container.config.env.iter().cloned());

        Ok(ProcessSpec {
            container_id: container.id.clone(),
            args: container.config.command_line(),
            env,
            working_dir: container.config.working_dir.clone(),
            user: container.config.user.clone(),
            tty: container.config.tty,
            rootfs,
            mounts,
            tmpfs: container.host_config.tmpfs.clone().into_iter().collect(),
            resources: container.host_config.resources.clone(),
            hostname,
        })
    }

    /// Environment contributed by `--link` targets, which must be running.
    fn linked_env(&self, handle: &SharedHandle) -> DockhandResult<Vec<String>> {
        let (parent, links) = handle.with(|c| (c.name.clone(), c.host_config.links.clone()));
        let mut env = Vec::new();
        for spec in &links {
            let (name, alias) = parse_link(spec)?;
            let target = self.container(&name).map_err(|_| {
                DockhandError::NotFound(format!("Could not get container for {}", name))
            })?;
            let (running, target_env) =
                target.with(|c| (c.state.is_running(), c.config.env.clone()));
            if !running {
                return Err(DockhandError::InvalidState(format!(
                    "Cannot link to a non running container: /{} AS /{}/{}",
                    name, parent, alias
                )));
            }
            env.extend(link_env(&parent, &alias, &target_env));
        }
        Ok(env)
    }

    /// Record a failed start: synthetic exit code, `die` event, unmount.
    fn start_failed(&self, handle: &SharedHandle, mounted: Option<&RwLayer>, error: &DockhandError) {
        handle.set_rootfs(None);
        if let Some(layer) = mounted
            && let Err(e) = self.layers.unmount(layer)
        {
            tracing::warn!(container_id = %handle.id(), error = %e, "Failed to unmount after failed start");
        }
        let message = error.to_string();
        handle.update(|c| c.state.set_start_failed(START_FAILED_EXIT_CODE, &message));
        self.checkpoint_logged(handle);
        DaemonMetricsStorage::incr(&self.metrics.start_failures);
        handle.with(|c| {
            self.events.log_container_event_with(
                c,
                "die",
                BTreeMap::from([("exitCode".to_string(), START_FAILED_EXIT_CODE.to_string())]),
            )
        });
        tracing::warn!(container_id = %handle.id(), error = %message, "Container failed to start");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_env_later_wins() {
        let mut env = vec!["PATH=/bin".to_string(), "A=1".to_string()];
        merge_env(&mut env, ["A=2".to_string(), "B=3".to_string()]);
        merge_env(&mut env, ["PATH=/usr/bin".to_string()]);
        assert_eq!(env, vec!["A=2", "B=3", "PATH=/usr/bin"]);
    }
}
