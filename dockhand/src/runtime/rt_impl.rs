//! Shared daemon state.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dockhand_shared::errors::{DockhandError, DockhandResult};
use dockhand_shared::layout::DaemonLayout;

use crate::container::{ContainerRegistry, SharedHandle};
use crate::digest::{Digest, ImageId};
use crate::events::{EventLogger, EventsService};
use crate::exec::ExecStore;
use crate::images::{Image, ImageStore, Reference, ReferenceStore, RegistryService};
use crate::layer::LayerStore;
use crate::metrics::DaemonMetricsStorage;
use crate::runtime::options::{DaemonOptions, HostCapabilities};
use crate::supervisor::Supervisor;
use crate::util::find_by_prefix;
use crate::volumes::VolumeStore;

pub(crate) type SharedDaemonImpl = Arc<DaemonImpl>;

/// Everything the daemon operations share. Each store locks internally;
/// no lock spans two stores.
pub(crate) struct DaemonImpl {
    pub(crate) options: DaemonOptions,
    pub(crate) layout: DaemonLayout,
    pub(crate) capabilities: HostCapabilities,
    pub(crate) layers: Arc<dyn LayerStore>,
    pub(crate) images: ImageStore,
    pub(crate) references: ReferenceStore,
    pub(crate) volumes: VolumeStore,
    pub(crate) containers: ContainerRegistry,
    pub(crate) execs: ExecStore,
    pub(crate) supervisor: Arc<dyn Supervisor>,
    pub(crate) events: Arc<dyn EventLogger>,
    /// Set when the bundled events service is in use.
    pub(crate) event_service: Option<Arc<EventsService>>,
    pub(crate) registry_service: Arc<dyn RegistryService>,
    pub(crate) metrics: DaemonMetricsStorage,
    pub(crate) shutdown_token: CancellationToken,
    /// Guards the disk-usage scan.
    pub(crate) disk_usage_running: AtomicBool,
    pub(crate) background: Mutex<Vec<JoinHandle<()>>>,
}

impl DaemonImpl {
    pub(crate) fn container(&self, key: &str) -> DockhandResult<SharedHandle> {
        self.containers.get(key)
    }

    /// Persist the container snapshot.
    pub(crate) fn checkpoint(&self, handle: &SharedHandle) -> DockhandResult<()> {
        handle.with(|c| c.to_disk(&self.layout))
    }

    /// Persist, logging instead of failing. For paths that already changed
    /// in-memory state irrevocably.
    pub(crate) fn checkpoint_logged(&self, handle: &SharedHandle) {
        if let Err(e) = self.checkpoint(handle) {
            tracing::warn!(container_id = %handle.id(), error = %e, "Failed to persist container");
        }
    }

    /// Resolve an image by full id, reference or id prefix.
    pub(crate) fn resolve_image(&self, key: &str) -> DockhandResult<(ImageId, Arc<Image>)> {
        let not_found = || DockhandError::NotFound(format!("No such image: {}", key));

        if let Ok(id) = Digest::parse(key)
            && self.images.contains(&id)
        {
            let image = self.images.get(&id)?;
            return Ok((id, image));
        }

        if let Ok(reference) = Reference::parse(key)
            && let Some(id) = self.references.get(&reference)
        {
            let image = self.images.get(&id)?;
            return Ok((id, image));
        }

        let prefix = key.strip_prefix("sha256:").unwrap_or(key);
        if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            let ids = self.images.ids();
            if let Some(hex) = find_by_prefix(prefix, ids.iter().map(|id| id.hex()))?
                && let Some(id) = ids.into_iter().find(|id| id.hex() == hex)
            {
                let image = self.images.get(&id)?;
                return Ok((id, image));
            }
        }

        Err(not_found())
    }

    pub(crate) fn track_background(&self, task: JoinHandle<()>) {
        let mut tasks = self.background.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }
}
