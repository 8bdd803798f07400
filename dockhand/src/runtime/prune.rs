//! Bulk container removal and disk usage.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::remove::RemoveOptions;
use super::rt_impl::DaemonImpl;
use crate::runtime::types::{ContainerUsage, DiskUsage, ImageUsage, PruneReport, VolumeUsage};
use crate::util::dir_size;

/// Clears the disk-usage flag when the scan ends.
struct ScanGuard<'a>(&'a std::sync::atomic::AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DaemonImpl {
    /// Remove every container that is not running. Failures are collected.
    pub(crate) async fn containers_prune(self: &Arc<Self>) -> PruneReport {
        let mut report = PruneReport::default();
        for handle in self.containers.list() {
            let (active, removing) = handle.with(|c| (c.status().is_active(), c.state.removal_in_progress));
            if active || removing {
                continue;
            }
            let size = handle
                .rw_layer()
                .and_then(|layer| self.layers.rw_size(&layer).ok())
                .unwrap_or(0);
            let id = handle.id().to_string();
            match self.container_remove(&id, RemoveOptions::default()).await {
                Ok(()) => {
                    report.space_reclaimed += size;
                    report.deleted.push(id);
                }
                Err(e) => {
                    tracing::warn!(container_id = %id, error = %e, "Failed to prune container");
                    report.errors.push((id, e.to_string()));
                }
            }
        }
        tracing::info!(count = report.deleted.len(), reclaimed = report.space_reclaimed, "Pruned containers");
        report
    }

    /// Sizes of layers, images, container layers and volumes.
    ///
    /// Only one scan runs at a time; a concurrent call is a conflict.
    pub(crate) fn system_disk_usage(&self) -> DockhandResult<DiskUsage> {
        if self
            .disk_usage_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DockhandError::Conflict(
                "a disk usage operation is already running".into(),
            ));
        }
        let _guard = ScanGuard(&self.disk_usage_running);

        let layers_size = self.layers.layers().iter().map(|l| l.diff_size).sum();
        let handles = self.containers.list();

        let images = self
            .images
            .ids()
            .into_iter()
            .map(|id| ImageUsage {
                size: self.images.size(&id),
                containers: handles.iter().filter(|h| h.with(|c| c.image_id == id)).count(),
                id: id.to_string(),
            })
            .collect();

        let containers = handles
            .iter()
            .map(|h| ContainerUsage {
                id: h.id().clone(),
                name: h.name(),
                size_rw: h
                    .rw_layer()
                    .and_then(|layer| self.layers.rw_size(&layer).ok())
                    .unwrap_or(0),
            })
            .collect();

        let volumes = self
            .volumes
            .list()
            .into_iter()
            .map(|v| VolumeUsage {
                size: dir_size(&v.mountpoint),
                ref_count: self.volumes.ref_count(&v.name),
                driver: v.driver,
                name: v.name,
            })
            .collect();

        Ok(DiskUsage {
            layers_size,
            images,
            containers,
            volumes,
        })
    }
}
