//! Volume create, inspect, list, remove and prune.

use std::collections::BTreeMap;

use dockhand_shared::errors::DockhandResult;

use super::rt_impl::DaemonImpl;
use crate::runtime::types::PruneReport;
use crate::volumes::{Volume, VolumeCreateOptions};

impl DaemonImpl {
    pub(crate) fn volume_create(&self, options: &VolumeCreateOptions) -> DockhandResult<Volume> {
        let volume = self.volumes.create(options)?;
        self.events.log_volume_event(
            &volume.name,
            "create",
            BTreeMap::from([("driver".to_string(), volume.driver.clone())]),
        );
        Ok(volume)
    }

    pub(crate) fn volume_inspect(&self, name: &str) -> DockhandResult<Volume> {
        self.volumes.get(name)
    }

    pub(crate) fn volume_list(&self) -> Vec<Volume> {
        self.volumes.list()
    }

    /// Remove a volume. A volume still referenced by a container is `InUse`.
    pub(crate) fn volume_remove(&self, name: &str) -> DockhandResult<()> {
        self.volumes.remove(name)?;
        self.events.log_volume_event(name, "destroy", BTreeMap::new());
        Ok(())
    }

    /// Remove every unreferenced volume. Volumes that became referenced in
    /// the meantime are skipped silently.
    pub(crate) fn volumes_prune(&self) -> PruneReport {
        let mut report = PruneReport::default();
        for volume in self.volumes.list() {
            if self.volumes.ref_count(&volume.name) > 0 {
                continue;
            }
            let size = crate::util::dir_size(&volume.mountpoint);
            match self.volume_remove(&volume.name) {
                Ok(()) => {
                    report.space_reclaimed += size;
                    report.deleted.push(volume.name);
                }
                Err(e) if e.is_in_use() => {
                    tracing::debug!(volume = %volume.name, "Skipping volume in use");
                }
                Err(e) => {
                    tracing::warn!(volume = %volume.name, error = %e, "Failed to prune volume");
                    report.errors.push((volume.name, e.to_string()));
                }
            }
        }
        tracing::info!(count = report.deleted.len(), reclaimed = report.space_reclaimed, "Pruned volumes");
        report
    }
}
