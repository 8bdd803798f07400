//! Runs container processes directly on the host, without isolation.
//!
//! Useful for development and tests of the daemon itself. The rootfs upper
//! directory becomes the working directory root.

use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::process::{Child, Command};

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::{ExecSpec, ProcessSpec, Supervisor, signal_exit_code};
use crate::runtime::types::ContainerId;

struct Process {
    pid: u32,
    child: Option<Child>,
}

#[derive(Default)]
pub struct HostSupervisor {
    containers: Mutex<HashMap<ContainerId, Process>>,
    execs: Mutex<HashMap<(ContainerId, String), Process>>,
}

impl HostSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn(args: &[String], env: &[String], root: &Path, working_dir: &str) -> DockhandResult<Child> {
        let Some((program, rest)) = args.split_first() else {
            return Err(DockhandError::InvalidParameter("No command specified".into()));
        };

        let candidate = root.join(working_dir.trim_start_matches('/'));
        let cwd = if candidate.is_dir() { candidate } else { root.to_path_buf() };

        let mut cmd = Command::new(program);
        cmd.args(rest)
            .env_clear()
            .envs(env.iter().filter_map(|e| e.split_once('=')))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        cmd.spawn()
            .map_err(|e| DockhandError::Engine(format!("failed to start {}: {}", program, e)))
    }

    fn exit_code(status: ExitStatus) -> i32 {
        use std::os::unix::process::ExitStatusExt;
        match (status.code(), status.signal()) {
            (Some(code), _) => code,
            (None, Some(sig)) => Signal::try_from(sig).map_or(128 + sig, signal_exit_code),
            (None, None) => -1,
        }
    }

    fn send(pid: u32, signal: Signal) -> DockhandResult<()> {
        let pid = i32::try_from(pid)
            .map_err(|_| DockhandError::Internal(format!("pid out of range: {}", pid)))?;
        kill(Pid::from_raw(pid), signal)
            .map_err(|e| DockhandError::Engine(format!("failed to send {}: {}", signal, e)))
    }

    fn pid_of(&self, id: &ContainerId) -> DockhandResult<u32> {
        self.containers
            .lock()
            .get(id)
            .map(|p| p.pid)
            .ok_or_else(|| DockhandError::InvalidState(format!("Container {} is not running", id)))
    }

    fn exec_pid(&self, id: &ContainerId, exec_id: &str) -> DockhandResult<u32> {
        self.execs
            .lock()
            .get(&(id.clone(), exec_id.to_string()))
            .map(|p| p.pid)
            .ok_or_else(|| DockhandError::InvalidState(format!("exec {} is not running", exec_id)))
    }
}

#[async_trait]
impl Supervisor for HostSupervisor {
    async fn start(&self, spec: ProcessSpec) -> DockhandResult<u32> {
        let child = Self::spawn(&spec.args, &spec.env, &spec.rootfs.upper, &spec.working_dir)?;
        let pid = child
            .id()
            .ok_or_else(|| DockhandError::Engine("process exited before reporting a pid".into()))?;
        tracing::debug!(container_id = %spec.container_id, pid, "Host process started");
        self.containers.lock().insert(
            spec.container_id,
            Process {
                pid,
                child: Some(child),
            },
        );
        Ok(pid)
    }

    async fn wait(&self, container_id: &ContainerId) -> DockhandResult<i32> {
        let child = self
            .containers
            .lock()
            .get_mut(container_id)
            .and_then(|p| p.child.take());
        let Some(mut child) = child else {
            return Err(DockhandError::InvalidState(format!(
                "Container {} has no process to wait on",
                container_id
            )));
        };
        let status = child.wait().await;
        self.containers.lock().remove(container_id);
        Ok(Self::exit_code(status?))
    }

    async fn signal(&self, container_id: &ContainerId, signal: Signal) -> DockhandResult<()> {
        Self::send(self.pid_of(container_id)?, signal)
    }

    async fn pause(&self, container_id: &ContainerId) -> DockhandResult<()> {
        Self::send(self.pid_of(container_id)?, Signal::SIGSTOP)
    }

    async fn resume(&self, container_id: &ContainerId) -> DockhandResult<()> {
        Self::send(self.pid_of(container_id)?, Signal::SIGCONT)
    }

    async fn exec_start(&self, spec: ExecSpec) -> DockhandResult<u32> {
        self.pid_of(&spec.container_id)?;
        let child = Self::spawn(&spec.args, &spec.env, &spec.rootfs, &spec.working_dir)?;
        let pid = child
            .id()
            .ok_or_else(|| DockhandError::Engine("exec exited before reporting a pid".into()))?;
        self.execs.lock().insert(
            (spec.container_id, spec.exec_id),
            Process {
                pid,
                child: Some(child),
            },
        );
        Ok(pid)
    }

    async fn exec_wait(&self, container_id: &ContainerId, exec_id: &str) -> DockhandResult<i32> {
        let key = (container_id.clone(), exec_id.to_string());
        let child = self.execs.lock().get_mut(&key).and_then(|p| p.child.take());
        let Some(mut child) = child else {
            return Err(DockhandError::InvalidState(format!(
                "exec {} has no process to wait on",
                exec_id
            )));
        };
        let status = child.wait().await;
        self.execs.lock().remove(&key);
        Ok(Self::exit_code(status?))
    }

    async fn exec_signal(
        &self,
        container_id: &ContainerId,
        exec_id: &str,
        signal: Signal,
    ) -> DockhandResult<()> {
        Self::send(self.exec_pid(container_id, exec_id)?, signal)
    }

    async fn exec_resize(
        &self,
        _container_id: &ContainerId,
        exec_id: &str,
        _height: u16,
        _width: u16,
    ) -> DockhandResult<()> {
        Err(DockhandError::Unsupported(format!(
            "exec {} has no terminal to resize",
            exec_id
        )))
    }
}
