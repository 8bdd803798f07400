//! Shared per-container handle.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::container::Container;
use super::restart::RestartManager;
use super::state::ContainerStatus;
use crate::layer::{RootfsMount, RwLayer};
use crate::runtime::types::ContainerId;

/// Latest observable status, broadcast to waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEvent {
    pub status: ContainerStatus,
    pub exit_code: i32,
}

/// Runtime handle for one container.
///
/// Two locks with distinct roles:
/// - `data` guards the [`Container`] record and is never held across an await.
/// - `op_lock` serializes lifecycle operations (start, stop, pause, remove,
///   commit) and may be held across awaits. The exit monitor never takes it.
#[derive(Debug)]
pub(crate) struct ContainerHandle {
    id: ContainerId,
    data: Mutex<Container>,
    pub(crate) op_lock: tokio::sync::Mutex<()>,
    rw_layer: Mutex<Option<RwLayer>>,
    /// Root filesystem of the current run, for execs.
    rootfs: Mutex<Option<RootfsMount>>,
    restart: Mutex<RestartManager>,
    /// Cancels a pending restart delay or an in-flight exit wait.
    run_token: Mutex<CancellationToken>,
    status_tx: watch::Sender<StatusEvent>,
}

pub(crate) type SharedHandle = Arc<ContainerHandle>;

impl ContainerHandle {
    pub(crate) fn new(container: Container, rw_layer: Option<RwLayer>) -> SharedHandle {
        let (status_tx, _) = watch::channel(StatusEvent {
            status: container.state.status,
            exit_code: container.state.exit_code,
        });
        let restart = RestartManager::new(container.host_config.restart_policy);
        Arc::new(Self {
            id: container.id.clone(),
            data: Mutex::new(container),
            op_lock: tokio::sync::Mutex::new(()),
            rw_layer: Mutex::new(rw_layer),
            rootfs: Mutex::new(None),
            restart: Mutex::new(restart),
            run_token: Mutex::new(CancellationToken::new()),
            status_tx,
        })
    }

    pub(crate) fn id(&self) -> &ContainerId {
        &self.id
    }

    pub(crate) fn name(&self) -> String {
        self.data.lock().name.clone()
    }

    /// Run `f` with the record locked.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&Container) -> R) -> R {
        f(&self.data.lock())
    }

    /// Mutate the record and publish the resulting status.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Container) -> R) -> R {
        let mut data = self.data.lock();
        let result = f(&mut data);
        let event = StatusEvent {
            status: data.state.status,
            exit_code: data.state.exit_code,
        };
        drop(data);
        self.status_tx.send_if_modified(|current| {
            if *current != event {
                *current = event;
                true
            } else {
                false
            }
        });
        result
    }

    pub(crate) fn snapshot(&self) -> Container {
        self.data.lock().clone()
    }

    pub(crate) fn status(&self) -> ContainerStatus {
        self.data.lock().state.status
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    pub(crate) fn rw_layer(&self) -> Option<RwLayer> {
        self.rw_layer.lock().clone()
    }

    pub(crate) fn take_rw_layer(&self) -> Option<RwLayer> {
        self.rw_layer.lock().take()
    }

    pub(crate) fn set_rw_layer(&self, layer: RwLayer) {
        *self.rw_layer.lock() = Some(layer);
    }

    pub(crate) fn rootfs(&self) -> Option<RootfsMount> {
        self.rootfs.lock().clone()
    }

    pub(crate) fn set_rootfs(&self, rootfs: Option<RootfsMount>) {
        *self.rootfs.lock() = rootfs;
    }

    pub(crate) fn restart_manager(&self) -> parking_lot::MutexGuard<'_, RestartManager> {
        self.restart.lock()
    }

    /// Token for the current run; cancelled by stop and remove.
    pub(crate) fn run_token(&self) -> CancellationToken {
        self.run_token.lock().clone()
    }

    /// Cancel the current run token and install a fresh one.
    pub(crate) fn reset_run_token(&self) -> CancellationToken {
        let mut token = self.run_token.lock();
        token.cancel();
        *token = CancellationToken::new();
        token.clone()
    }

    pub(crate) fn cancel_run(&self) {
        self.run_token.lock().cancel();
    }
}
