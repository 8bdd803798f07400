//! Container creation.

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::rt_impl::DaemonImpl;
use super::types::{ContainerCreateResponse, ContainerId};
use crate::container::validate::validate_create;
use crate::container::{Container, ContainerConfig, ContainerHandle, HostConfig, SharedHandle};
use crate::layer::{RwLayer, RwLayerOptions};
use crate::metrics::DaemonMetricsStorage;
use crate::util::names::random_name;

fn validate_name(name: &str) -> DockhandResult<&str> {
    let name = name.strip_prefix('/').unwrap_or(name);
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name.len() >= 2
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid {
        return Err(DockhandError::InvalidParameter(format!(
            "Invalid container name ({}), only [a-zA-Z0-9][a-zA-Z0-9_.-] are allowed",
            name
        )));
    }
    Ok(name)
}

impl DaemonImpl {
    /// Create a container without starting it.
    pub(crate) fn container_create(
        &self,
        name: Option<&str>,
        config: ContainerConfig,
        host_config: HostConfig,
    ) -> DockhandResult<ContainerCreateResponse> {
        // Nothing is mutated before validation passes
        let warnings = validate_create(
            &config,
            &host_config,
            self.options.platform,
            self.volumes.default_driver(),
        )?;
        let name = name.map(validate_name).transpose()?;
        let (image_id, image) = self.resolve_image(&config.image)?;

        let mut config = config;
        if let Some(image_config) = &image.config {
            config.merge_from(image_config);
        }
        if config.command_line().is_empty() {
            return Err(DockhandError::InvalidParameter("No command specified".into()));
        }

        let id = ContainerId::new();
        let name = self.reserve_name(name, &id)?;

        let rw_layer = match self.layers.create_rw_layer(
            id.as_str(),
            image.rootfs.chain_id().as_ref(),
            &RwLayerOptions::default(),
        ) {
            Ok(layer) => layer,
            Err(e) => {
                self.containers.release_name(&name);
                return Err(e);
            }
        };

        let mut container = Container::new(id.clone(), name.clone(), image_id, config, host_config);
        container.warnings = warnings.clone();
        let handle = ContainerHandle::new(container, Some(rw_layer.clone()));

        let registered = self.resolve_mounts(&handle.snapshot()).and_then(|resolved| {
            self.swap_mounts(&handle, 0, resolved);
            self.checkpoint(&handle)
        });
        if let Err(e) = registered {
            self.rollback_create(&handle, &name, rw_layer);
            return Err(e);
        }

        self.containers.add(handle.clone());
        DaemonMetricsStorage::incr(&self.metrics.containers_created);
        handle.with(|c| self.events.log_container_event(c, "create"));
        tracing::info!(container_id = %id, name = %name, "Created container");

        Ok(ContainerCreateResponse { id, warnings })
    }

    fn reserve_name(&self, name: Option<&str>, id: &ContainerId) -> DockhandResult<String> {
        if let Some(name) = name {
            self.containers.reserve_name(name, id)?;
            return Ok(name.to_string());
        }
        for retry in 0..10 {
            let candidate = random_name(retry);
            if self.containers.reserve_name(&candidate, id).is_ok() {
                return Ok(candidate);
            }
        }
        // Fall back to the id, which cannot collide
        let fallback = id.short().to_string();
        self.containers.reserve_name(&fallback, id)?;
        Ok(fallback)
    }

    fn rollback_create(&self, handle: &SharedHandle, name: &str, rw_layer: RwLayer) {
        let id = handle.id().to_string();
        for volume in handle.with(|c| c.volume_names()) {
            self.volumes.dereference(&volume, &id);
        }
        if let Err(e) = self.layers.release_rw_layer(rw_layer) {
            tracing::warn!(container_id = %id, error = %e, "Failed to release layer after failed create");
        }
        if let Err(e) = Container::remove_from_disk(&self.layout, handle.id()) {
            tracing::warn!(container_id = %id, error = %e, "Failed to remove snapshot after failed create");
        }
        self.containers.release_name(name);
    }
}
