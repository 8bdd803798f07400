//! Public daemon handle.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use futures::Stream;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use dockhand_shared::errors::{DockhandError, DockhandResult};
use dockhand_shared::layout::DaemonLayout;

use super::commit::CommitOptions;
use super::options::DaemonOptions;
use super::remove::RemoveOptions;
use super::rt_impl::{DaemonImpl, SharedDaemonImpl};
use super::types::{
    ContainerCreateResponse, ContainerSummary, DiskUsage, ExecId, ImageDeleteResponse,
    ImageHistoryEntry, ImageInspect, ImageSummary, PruneReport,
};
use crate::container::{Container, ContainerConfig, ContainerRegistry, HostConfig};
use crate::digest::ImageId;
use crate::events::{Event, EventLogger, EventsService};
use crate::exec::{ExecConfig, ExecInspect, ExecStore};
use crate::images::{
    AuthConfig, AuthStatus, DefaultRegistryService, ImageStore, Reference, ReferenceStore,
    RegistryService, RepositoryInfo,
};
use crate::layer::{FsLayerStore, LayerStore};
use crate::metrics::{DaemonMetrics, DaemonMetricsStorage};
use crate::supervisor::{HostSupervisor, Supervisor};
use crate::volumes::{LocalDriver, Volume, VolumeCreateOptions, VolumeDriver, VolumeStore};

/// Handle to a running daemon core.
///
/// Thin wrapper around the shared implementation; clones share all state.
#[derive(Clone)]
pub struct Daemon {
    inner: SharedDaemonImpl,
}

impl Daemon {
    /// Open the daemon with the bundled layer store, local volume driver,
    /// host supervisor and events service.
    pub async fn new(options: DaemonOptions) -> DockhandResult<Self> {
        DaemonBuilder::new(options).build().await
    }

    pub fn builder(options: DaemonOptions) -> DaemonBuilder {
        DaemonBuilder::new(options)
    }

    // ========================================================================
    // CONTAINERS
    // ========================================================================

    pub fn container_create(
        &self,
        name: Option<&str>,
        config: ContainerConfig,
        host_config: HostConfig,
    ) -> DockhandResult<ContainerCreateResponse> {
        self.inner.container_create(name, config, host_config)
    }

    pub async fn container_start(&self, key: &str) -> DockhandResult<()> {
        self.inner.container_start(key).await
    }

    /// `timeout` in seconds; `None` uses the container's stop timeout and a
    /// negative value waits forever.
    pub async fn container_stop(&self, key: &str, timeout: Option<i64>) -> DockhandResult<()> {
        self.inner.container_stop(key, timeout).await
    }

    pub async fn container_kill(&self, key: &str, signal: Option<&str>) -> DockhandResult<()> {
        self.inner.container_kill(key, signal).await
    }

    pub async fn container_pause(&self, key: &str) -> DockhandResult<()> {
        self.inner.container_pause(key).await
    }

    pub async fn container_unpause(&self, key: &str) -> DockhandResult<()> {
        self.inner.container_unpause(key).await
    }

    pub async fn container_remove(&self, key: &str, options: RemoveOptions) -> DockhandResult<()> {
        self.inner.container_remove(key, options).await
    }

    /// Resolves with the exit code once the container is no longer running.
    pub async fn container_wait(&self, key: &str) -> DockhandResult<i32> {
        self.inner.container_wait(key).await
    }

    pub fn container_inspect(&self, key: &str) -> DockhandResult<Container> {
        Ok(self.inner.container(key)?.snapshot())
    }

    /// Running containers, or every container with `all`. Newest first.
    pub fn container_list(&self, all: bool) -> Vec<ContainerSummary> {
        let mut list: Vec<ContainerSummary> = self
            .inner
            .containers
            .list()
            .iter()
            .map(|h| h.with(Container::summary))
            .filter(|s| all || s.status.is_active())
            .collect();
        list.sort_by(|a, b| b.created.cmp(&a.created));
        list
    }

    pub async fn containers_prune(&self) -> PruneReport {
        self.inner.containers_prune().await
    }

    // ========================================================================
    // EXEC
    // ========================================================================

    pub fn exec_create(&self, key: &str, config: ExecConfig) -> DockhandResult<ExecId> {
        self.inner.exec_create(key, config)
    }

    pub async fn exec_start(&self, exec_id: &str) -> DockhandResult<()> {
        self.inner.exec_start(exec_id).await
    }

    pub fn exec_inspect(&self, exec_id: &str) -> DockhandResult<ExecInspect> {
        self.inner.exec_inspect(exec_id)
    }

    pub async fn exec_resize(&self, exec_id: &str, height: u16, width: u16) -> DockhandResult<()> {
        self.inner.exec_resize(exec_id, height, width).await
    }

    pub async fn exec_wait(&self, exec_id: &str) -> DockhandResult<i32> {
        self.inner.exec_wait(exec_id).await
    }

    /// Run one exec garbage-collection sweep now; returns sessions purged.
    pub fn exec_gc(&self) -> usize {
        self.inner.collect_execs()
    }

    // ========================================================================
    // IMAGES
    // ========================================================================

    pub async fn commit(&self, key: &str, options: CommitOptions) -> DockhandResult<ImageId> {
        self.inner.commit(key, options).await
    }

    pub fn image_import(
        &self,
        diff: &mut dyn Read,
        reference: Option<&str>,
        config: ContainerConfig,
    ) -> DockhandResult<ImageId> {
        self.inner.image_import(diff, reference, config)
    }

    pub fn tag_image(&self, key: &str, repo: &str, tag: &str) -> DockhandResult<Reference> {
        self.inner.tag_image(key, repo, tag)
    }

    pub fn image_history(&self, key: &str) -> DockhandResult<Vec<ImageHistoryEntry>> {
        self.inner.image_history(key)
    }

    pub fn image_inspect(&self, key: &str) -> DockhandResult<ImageInspect> {
        self.inner.image_inspect(key)
    }

    pub fn image_list(&self) -> Vec<ImageSummary> {
        self.inner.image_list()
    }

    pub fn image_delete(&self, key: &str, force: bool) -> DockhandResult<Vec<ImageDeleteResponse>> {
        self.inner.image_delete(key, force)
    }

    // ========================================================================
    // VOLUMES
    // ========================================================================

    pub fn volume_create(&self, options: &VolumeCreateOptions) -> DockhandResult<Volume> {
        self.inner.volume_create(options)
    }

    pub fn volume_inspect(&self, name: &str) -> DockhandResult<Volume> {
        self.inner.volume_inspect(name)
    }

    pub fn volume_list(&self) -> Vec<Volume> {
        self.inner.volume_list()
    }

    pub fn volume_remove(&self, name: &str) -> DockhandResult<()> {
        self.inner.volume_remove(name)
    }

    pub fn volumes_prune(&self) -> PruneReport {
        self.inner.volumes_prune()
    }

    /// Number of containers referencing `name`.
    pub fn volume_ref_count(&self, name: &str) -> usize {
        self.inner.volumes.ref_count(name)
    }

    // ========================================================================
    // SYSTEM
    // ========================================================================

    pub fn system_disk_usage(&self) -> DockhandResult<DiskUsage> {
        self.inner.system_disk_usage()
    }

    pub fn metrics(&self) -> DaemonMetrics {
        DaemonMetrics::new(self.inner.metrics.clone())
    }

    /// Live event stream. Only available with the bundled events service.
    pub fn subscribe_events(&self) -> DockhandResult<impl Stream<Item = Event> + Send + 'static> {
        match &self.inner.event_service {
            Some(service) => Ok(service.subscribe()),
            None => Err(DockhandError::Unsupported(
                "event subscription requires the bundled events service".into(),
            )),
        }
    }

    pub fn resolve_repository(&self, reference: &str) -> DockhandResult<RepositoryInfo> {
        let reference = Reference::parse(reference)?;
        self.inner.registry_service.resolve_repository(&reference)
    }

    pub async fn authenticate_to_registry(
        &self,
        auth: &AuthConfig,
        user_agent: &str,
    ) -> DockhandResult<AuthStatus> {
        self.inner.registry_service.auth(auth, user_agent).await
    }

    /// Stop background tasks and every running container.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down daemon");
        self.inner.shutdown_token.cancel();

        let stops = self
            .inner
            .containers
            .list()
            .into_iter()
            .filter(|h| h.status().is_active())
            .map(|handle| {
                let inner = Arc::clone(&self.inner);
                async move {
                    if let Err(e) = inner.container_stop(handle.id().as_str(), None).await {
                        tracing::warn!(container_id = %handle.id(), error = %e, "Failed to stop container on shutdown");
                        return;
                    }
                    // A daemon shutdown is not a user stop
                    handle.update(|c| c.state.manually_stopped = false);
                    inner.checkpoint_logged(&handle);
                }
            });
        join_all(stops).await;

        let tasks: Vec<_> = self.inner.background.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        tracing::info!("Daemon shut down");
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Wires a [`Daemon`] with optional custom components.
pub struct DaemonBuilder {
    options: DaemonOptions,
    layer_store: Option<Arc<dyn LayerStore>>,
    supervisor: Option<Arc<dyn Supervisor>>,
    volume_drivers: Vec<Arc<dyn VolumeDriver>>,
    event_logger: Option<Arc<dyn EventLogger>>,
    registry_service: Option<Arc<dyn RegistryService>>,
}

impl DaemonBuilder {
    pub fn new(options: DaemonOptions) -> Self {
        Self {
            options,
            layer_store: None,
            supervisor: None,
            volume_drivers: Vec::new(),
            event_logger: None,
            registry_service: None,
        }
    }

    pub fn layer_store(mut self, store: Arc<dyn LayerStore>) -> Self {
        self.layer_store = Some(store);
        self
    }

    pub fn supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Add a volume driver. The local driver is always registered.
    pub fn volume_driver(mut self, driver: Arc<dyn VolumeDriver>) -> Self {
        self.volume_drivers.push(driver);
        self
    }

    /// Replace the bundled events service.
    pub fn event_logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.event_logger = Some(logger);
        self
    }

    pub fn registry_service(mut self, service: Arc<dyn RegistryService>) -> Self {
        self.registry_service = Some(service);
        self
    }

    /// Open every store, restore containers and start background tasks.
    pub async fn build(self) -> DockhandResult<Daemon> {
        let options = self.options;
        let layout = DaemonLayout::new(options.home_dir.clone());
        layout.prepare()?;
        tracing::info!(home = %layout.home().display(), "Opening daemon");

        let capabilities = options.capabilities();

        let layers: Arc<dyn LayerStore> = match self.layer_store {
            Some(store) => store,
            None => Arc::new(FsLayerStore::open(&layout)?),
        };
        let images = ImageStore::open(&layout, layers.clone())?;
        let references = ReferenceStore::open(layout.repositories_file())?;

        let mut drivers: Vec<Arc<dyn VolumeDriver>> =
            vec![Arc::new(LocalDriver::new(layout.volumes_dir())?)];
        drivers.extend(self.volume_drivers);
        let volumes = VolumeStore::open(
            layout.volume_metadata_file(),
            drivers,
            options.default_volume_driver.clone(),
        )?;

        let (events, event_service): (Arc<dyn EventLogger>, Option<Arc<EventsService>>) =
            match self.event_logger {
                Some(logger) => (logger, None),
                None => {
                    let service = Arc::new(EventsService::new());
                    (service.clone(), Some(service))
                }
            };

        let supervisor = self
            .supervisor
            .unwrap_or_else(|| Arc::new(HostSupervisor::new()));
        let registry_service = self.registry_service.unwrap_or_else(|| {
            Arc::new(DefaultRegistryService::new(
                options.registry_mirrors.clone(),
                options.insecure_registries.clone(),
            ))
        });

        let restore = options.restore_on_start;
        let inner = Arc::new(DaemonImpl {
            options,
            layout,
            capabilities,
            layers,
            images,
            references,
            volumes,
            containers: ContainerRegistry::new(),
            execs: ExecStore::new(),
            supervisor,
            events,
            event_service,
            registry_service,
            metrics: DaemonMetricsStorage::new(),
            shutdown_token: CancellationToken::new(),
            disk_usage_running: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        });

        if restore {
            inner.restore().await;
        }
        inner.spawn_exec_gc();
        tracing::info!(
            containers = inner.containers.len(),
            images = inner.images.len(),
            "Daemon ready"
        );
        Ok(Daemon { inner })
    }
}

// ============================================================================
// THREAD SAFETY ASSERTIONS
// ============================================================================

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<Daemon>;
};
