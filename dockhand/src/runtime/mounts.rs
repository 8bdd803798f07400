//! Mount registration and preparation for containers.
//!
//! Registration follows a two-phase protocol: the table is computed from a
//! snapshot without holding the container lock, then swapped in under the
//! lock only if the container's mount generation is unchanged.

use std::collections::BTreeMap;

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::rt_impl::DaemonImpl;
use crate::container::{Container, SharedHandle};
use crate::volumes::parser::parse_volumes_from;
use crate::volumes::{
    InheritedMounts, MountPoint, MountRequest, MountResolver, MountType, ResolvedMounts,
    lazy_initialize_volume,
};

impl DaemonImpl {
    /// Phase one: compute the mount table for `container`.
    pub(crate) fn resolve_mounts(&self, container: &Container) -> DockhandResult<ResolvedMounts> {
        let mut inherited = Vec::new();
        for spec in &container.host_config.volumes_from {
            let (key, rw) = parse_volumes_from(spec)?;
            let source = self.container(&key)?;
            if source.id() == &container.id {
                return Err(DockhandError::InvalidParameter(format!(
                    "container {} cannot inherit volumes from itself",
                    container.id
                )));
            }
            let mounts = source.with(|c| c.mount_points.values().cloned().collect());
            inherited.push(InheritedMounts {
                container_id: source.id().to_string(),
                rw,
                mounts,
            });
        }

        let anonymous: Vec<String> = container.config.volumes.iter().cloned().collect();
        let volume_driver = Some(container.host_config.volume_driver.as_str()).filter(|d| !d.is_empty());
        let request = MountRequest {
            container_id: container.id.as_str(),
            existing: &container.mount_points,
            inherited: &inherited,
            binds: &container.host_config.binds,
            mounts: &container.host_config.mounts,
            tmpfs: &container.host_config.tmpfs,
            anonymous: &anonymous,
            volume_driver,
        };
        let resolved = MountResolver::new(&self.volumes).resolve(&request)?;
        tracing::debug!(
            container_id = %container.id,
            mounts = resolved.mounts.len(),
            "Resolved mount points"
        );
        Ok(resolved)
    }

    /// Phase two: swap `resolved` into the container if nothing changed its
    /// mount table since `generation` was read. Returns whether it did.
    pub(crate) fn swap_mounts(
        &self,
        handle: &SharedHandle,
        generation: u64,
        resolved: ResolvedMounts,
    ) -> bool {
        let mut pending = Some(resolved);
        let swapped = handle.update(|c| {
            if c.generation != generation {
                return false;
            }
            if let Some(resolved) = pending.take() {
                c.replace_mount_points(resolved.commit(&self.volumes));
            }
            true
        });
        if let Some(resolved) = pending {
            resolved.rollback(&self.volumes);
        }
        swapped
    }

    /// Re-acquire live volume handles for mount points loaded from disk.
    /// Entries whose volume cannot be found are logged and left as-is.
    pub(crate) fn prepare_mount_points(&self, handle: &SharedHandle) {
        let (generation, mut points) = handle.with(|c| (c.generation, c.mount_points.clone()));
        if !points.values().any(|mp| mp.is_volume() && mp.volume.is_none()) {
            return;
        }

        let id = handle.id().to_string();
        for mp in points.values_mut() {
            if let Err(e) = lazy_initialize_volume(&self.volumes, &id, mp) {
                tracing::warn!(
                    container_id = %id,
                    volume = %mp.name,
                    error = %e,
                    "Failed to prepare mount point"
                );
            }
        }

        let applied = handle.update(|c| {
            if c.generation != generation {
                return false;
            }
            c.replace_mount_points(points);
            true
        });
        if !applied {
            tracing::debug!(container_id = %id, "Mount table changed while preparing, keeping newer table");
        }
    }

    /// Prepare mounts for a start and return the table handed to the
    /// supervisor. Missing bind sources are created for legacy binds and for
    /// specs that ask for it.
    pub(crate) fn setup_mounts(&self, handle: &SharedHandle) -> DockhandResult<Vec<MountPoint>> {
        self.prepare_mount_points(handle);
        let points: BTreeMap<String, MountPoint> = handle.with(|c| c.mount_points.clone());

        let mut mounts = Vec::with_capacity(points.len());
        for mp in points.into_values() {
            if mp.is_volume() && mp.volume.is_none() {
                return Err(DockhandError::NotFound(format!(
                    "volume {} for {} is not available",
                    mp.name, mp.destination
                )));
            }
            if mp.mount_type == MountType::Bind {
                let source = std::path::Path::new(&mp.source);
                let create = match &mp.spec {
                    None => true,
                    Some(spec) => spec.bind_options.as_ref().is_some_and(|o| o.create_mountpoint),
                };
                if !source.exists() {
                    if !create {
                        return Err(DockhandError::InvalidParameter(format!(
                            "bind source path does not exist: {}",
                            mp.source
                        )));
                    }
                    std::fs::create_dir_all(source)?;
                }
            }
            mounts.push(mp);
        }
        Ok(mounts)
    }
}
