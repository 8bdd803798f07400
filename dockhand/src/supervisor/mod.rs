//! Boundary to whatever actually runs container processes.
//!
//! The daemon core only asks a [`Supervisor`] to start, signal and wait on
//! processes; isolation is the supervisor's concern.

mod host;

use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
pub use nix::sys::signal::Signal;

use dockhand_shared::errors::{DockhandError, DockhandResult};

use crate::container::Resources;
use crate::layer::RootfsMount;
use crate::runtime::types::ContainerId;
use crate::volumes::MountPoint;

pub use host::HostSupervisor;

/// Everything needed to launch a container's main process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub container_id: ContainerId,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub user: String,
    pub tty: bool,
    pub rootfs: RootfsMount,
    pub mounts: Vec<MountPoint>,
    /// tmpfs destination -> options.
    pub tmpfs: Vec<(String, String)>,
    pub resources: Resources,
    pub hostname: String,
}

/// A process started inside a running container.
#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub container_id: ContainerId,
    pub exec_id: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub user: String,
    pub tty: bool,
    pub privileged: bool,
    /// Root of the container filesystem.
    pub rootfs: PathBuf,
}

#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Launch the main process; returns its pid.
    async fn start(&self, spec: ProcessSpec) -> DockhandResult<u32>;

    /// Wait for the main process to exit and return its exit code.
    async fn wait(&self, container_id: &ContainerId) -> DockhandResult<i32>;

    async fn signal(&self, container_id: &ContainerId, signal: Signal) -> DockhandResult<()>;

    async fn pause(&self, container_id: &ContainerId) -> DockhandResult<()>;

    async fn resume(&self, container_id: &ContainerId) -> DockhandResult<()>;

    async fn exec_start(&self, spec: ExecSpec) -> DockhandResult<u32>;

    async fn exec_wait(&self, container_id: &ContainerId, exec_id: &str) -> DockhandResult<i32>;

    async fn exec_signal(
        &self,
        container_id: &ContainerId,
        exec_id: &str,
        signal: Signal,
    ) -> DockhandResult<()>;

    async fn exec_resize(
        &self,
        container_id: &ContainerId,
        exec_id: &str,
        height: u16,
        width: u16,
    ) -> DockhandResult<()>;
}

/// Parse `SIGTERM`, `TERM` or a signal number.
pub fn parse_signal(s: &str) -> DockhandResult<Signal> {
    let invalid = || DockhandError::InvalidParameter(format!("Invalid signal: {}", s));
    if let Ok(n) = s.parse::<i32>() {
        return Signal::try_from(n).map_err(|_| invalid());
    }
    let upper = s.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };
    Signal::from_str(&name).map_err(|_| invalid())
}

/// Exit code of a process killed by `signal`.
pub fn signal_exit_code(signal: Signal) -> i32 {
    128 + signal as i32
}
