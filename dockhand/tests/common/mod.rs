//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::watch;

use dockhand::digest::ImageId;
use dockhand::layer::LayerStore;
use dockhand::runtime::options::{DaemonOptions, HostCapabilities};
use dockhand::supervisor::{ExecSpec, ProcessSpec, Signal, Supervisor, signal_exit_code};
use dockhand::{ContainerConfig, ContainerId, Daemon, DockhandError, DockhandResult, HostConfig};

pub const BASE_IMAGE: &str = "base:latest";

/// A scripted process: exits when told to, or on a terminating signal.
struct FakeProcess {
    pid: u32,
    exit_tx: watch::Sender<Option<i32>>,
    paused: bool,
}

impl FakeProcess {
    fn exited(&self) -> bool {
        self.exit_tx.borrow().is_some()
    }
}

/// Supervisor that runs nothing.
///
/// A command of `exit <code>` exits immediately with that code; any other
/// command runs until [`FakeSupervisor::exit`] or a signal. SIGTERM exits
/// with 143 unless `ignore_term` is set; SIGKILL always exits with 137.
#[derive(Default)]
pub struct FakeSupervisor {
    next_pid: AtomicU32,
    processes: Mutex<HashMap<ContainerId, FakeProcess>>,
    execs: Mutex<HashMap<String, FakeProcess>>,
    starts: Mutex<Vec<ProcessSpec>>,
    exec_starts: Mutex<Vec<ExecSpec>>,
    signals: Mutex<Vec<(ContainerId, Signal)>>,
    pub ignore_term: AtomicBool,
    pub fail_start: AtomicBool,
}

fn scripted_exit(args: &[String]) -> Option<i32> {
    match args {
        [cmd, code, ..] if cmd == "exit" => code.parse().ok(),
        [cmd] if cmd == "exit" => Some(0),
        _ => None,
    }
}

impl FakeSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        })
    }

    fn spawn(&self, args: &[String]) -> FakeProcess {
        let (exit_tx, _) = watch::channel(scripted_exit(args));
        FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::Relaxed),
            exit_tx,
            paused: false,
        }
    }

    /// Make the main process of `id` exit with `code`.
    pub fn exit(&self, id: &ContainerId, code: i32) {
        if let Some(p) = self.processes.lock().get(id) {
            p.exit_tx.send_replace(Some(code));
        }
    }

    pub fn exit_exec(&self, exec_id: &str, code: i32) {
        if let Some(p) = self.execs.lock().get(exec_id) {
            p.exit_tx.send_replace(Some(code));
        }
    }

    pub fn starts(&self) -> Vec<ProcessSpec> {
        self.starts.lock().clone()
    }

    pub fn last_start(&self) -> Option<ProcessSpec> {
        self.starts.lock().last().cloned()
    }

    pub fn exec_starts(&self) -> Vec<ExecSpec> {
        self.exec_starts.lock().clone()
    }

    pub fn signals(&self) -> Vec<(ContainerId, Signal)> {
        self.signals.lock().clone()
    }

    pub fn is_paused(&self, id: &ContainerId) -> bool {
        self.processes.lock().get(id).is_some_and(|p| p.paused)
    }

    fn deliver(process: &FakeProcess, signal: Signal, ignore_term: bool) {
        match signal {
            Signal::SIGKILL => {
                process.exit_tx.send_replace(Some(signal_exit_code(signal)));
            }
            Signal::SIGTERM if !ignore_term => {
                process.exit_tx.send_replace(Some(signal_exit_code(signal)));
            }
            _ => {}
        }
    }
}

fn no_such_process(id: &str) -> DockhandError {
    DockhandError::Engine(format!("no such process: {}", id))
}

#[async_trait]
impl Supervisor for FakeSupervisor {
    async fn start(&self, spec: ProcessSpec) -> DockhandResult<u32> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(DockhandError::Engine("scripted start failure".into()));
        }
        let process = self.spawn(&spec.args);
        let pid = process.pid;
        self.processes.lock().insert(spec.container_id.clone(), process);
        self.starts.lock().push(spec);
        Ok(pid)
    }

    async fn wait(&self, container_id: &ContainerId) -> DockhandResult<i32> {
        let mut rx = self
            .processes
            .lock()
            .get(container_id)
            .map(|p| p.exit_tx.subscribe())
            .ok_or_else(|| no_such_process(container_id.as_str()))?;
        let code = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| no_such_process(container_id.as_str()))?;
        Ok((*code).unwrap_or_default())
    }

    async fn signal(&self, container_id: &ContainerId, signal: Signal) -> DockhandResult<()> {
        let processes = self.processes.lock();
        let process = processes
            .get(container_id)
            .filter(|p| !p.exited())
            .ok_or_else(|| no_such_process(container_id.as_str()))?;
        self.signals.lock().push((container_id.clone(), signal));
        Self::deliver(process, signal, self.ignore_term.load(Ordering::SeqCst));
        Ok(())
    }

    async fn pause(&self, container_id: &ContainerId) -> DockhandResult<()> {
        let mut processes = self.processes.lock();
        let process = processes
            .get_mut(container_id)
            .ok_or_else(|| no_such_process(container_id.as_str()))?;
        process.paused = true;
        Ok(())
    }

    async fn resume(&self, container_id: &ContainerId) -> DockhandResult<()> {
        let mut processes = self.processes.lock();
        let process = processes
            .get_mut(container_id)
            .ok_or_else(|| no_such_process(container_id.as_str()))?;
        process.paused = false;
        Ok(())
    }

    async fn exec_start(&self, spec: ExecSpec) -> DockhandResult<u32> {
        let process = self.spawn(&spec.args);
        let pid = process.pid;
        self.execs.lock().insert(spec.exec_id.clone(), process);
        self.exec_starts.lock().push(spec);
        Ok(pid)
    }

    async fn exec_wait(&self, _container_id: &ContainerId, exec_id: &str) -> DockhandResult<i32> {
        let mut rx = self
            .execs
            .lock()
            .get(exec_id)
            .map(|p| p.exit_tx.subscribe())
            .ok_or_else(|| no_such_process(exec_id))?;
        let code = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| no_such_process(exec_id))?;
        Ok((*code).unwrap_or_default())
    }

    async fn exec_signal(
        &self,
        _container_id: &ContainerId,
        exec_id: &str,
        signal: Signal,
    ) -> DockhandResult<()> {
        let execs = self.execs.lock();
        let process = execs
            .get(exec_id)
            .filter(|p| !p.exited())
            .ok_or_else(|| no_such_process(exec_id))?;
        Self::deliver(process, signal, false);
        Ok(())
    }

    async fn exec_resize(
        &self,
        _container_id: &ContainerId,
        exec_id: &str,
        _height: u16,
        _width: u16,
    ) -> DockhandResult<()> {
        if self.execs.lock().contains_key(exec_id) {
            Ok(())
        } else {
            Err(no_such_process(exec_id))
        }
    }
}

// ============================================================================
// TEST DAEMON
// ============================================================================

pub fn tar_with(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// A daemon in a temporary home with `base:latest` imported.
pub struct TestDaemon {
    pub home: TempDir,
    pub daemon: Daemon,
    pub supervisor: Arc<FakeSupervisor>,
    pub base_image: ImageId,
}

pub fn test_options(home: &TempDir) -> DaemonOptions {
    DaemonOptions {
        home_dir: home.path().to_path_buf(),
        host_capabilities: Some(HostCapabilities::all()),
        default_stop_timeout_secs: 2,
        ..Default::default()
    }
}

impl TestDaemon {
    pub async fn new() -> Self {
        Self::open(TempDir::new().unwrap(), None).await
    }

    /// A daemon over `layers`, which must live under `home`.
    pub async fn with_layer_store(home: TempDir, layers: Arc<dyn LayerStore>) -> Self {
        Self::open(home, Some(layers)).await
    }

    async fn open(home: TempDir, layers: Option<Arc<dyn LayerStore>>) -> Self {
        let supervisor = FakeSupervisor::new();
        let mut builder = Daemon::builder(test_options(&home)).supervisor(supervisor.clone());
        if let Some(layers) = layers {
            builder = builder.layer_store(layers);
        }
        let daemon = builder.build().await.unwrap();

        let mut base_config = ContainerConfig::new("");
        base_config.cmd = vec!["sleep".into(), "infinity".into()];
        base_config.env = vec!["PATH=/usr/bin:/bin".into(), "BASE=1".into()];
        let layer = tar_with(&[("etc/hostname", b"base\n")]);
        let base_image = daemon
            .image_import(&mut layer.as_slice(), Some(BASE_IMAGE), base_config)
            .unwrap();

        Self {
            home,
            daemon,
            supervisor,
            base_image,
        }
    }

    /// Reopen the same home with a fresh supervisor, as after a daemon crash.
    /// The old instance is abandoned without shutdown.
    pub async fn reopen(self) -> Self {
        let supervisor = FakeSupervisor::new();
        let daemon = Daemon::builder(test_options(&self.home))
            .supervisor(supervisor.clone())
            .build()
            .await
            .unwrap();
        Self {
            home: self.home,
            daemon,
            supervisor,
            base_image: self.base_image,
        }
    }

    pub fn create(&self, name: &str) -> ContainerId {
        self.create_with(name, HostConfig::default())
    }

    pub fn create_with(&self, name: &str, host_config: HostConfig) -> ContainerId {
        self.daemon
            .container_create(Some(name), ContainerConfig::new(BASE_IMAGE), host_config)
            .unwrap()
            .id
    }

    pub async fn run(&self, name: &str) -> ContainerId {
        let id = self.create(name);
        self.daemon.container_start(id.as_str()).await.unwrap();
        id
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
