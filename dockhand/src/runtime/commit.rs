//! Commit a container's changes into a new image.

use std::collections::BTreeMap;

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::rt_impl::DaemonImpl;
use crate::container::{ContainerConfig, ContainerStatus, SharedHandle};
use crate::digest::ImageId;
use crate::images::{ChildConfig, Image, Reference};
use crate::metrics::DaemonMetricsStorage;

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// `repo[:tag]` to point at the new image.
    pub reference: Option<String>,
    pub author: String,
    pub comment: String,
    /// Overrides merged over the container's config.
    pub config: Option<ContainerConfig>,
    /// Freeze a running container while its diff is read.
    pub pause: bool,
}

impl DaemonImpl {
    pub(crate) async fn commit(&self, key: &str, options: CommitOptions) -> DockhandResult<ImageId> {
        let reference = options
            .reference
            .as_deref()
            .map(Reference::parse)
            .transpose()?;
        if reference.as_ref().is_some_and(Reference::is_digested) {
            return Err(DockhandError::InvalidParameter(
                "refusing to create a tag with a digest reference".into(),
            ));
        }

        let handle = self.container(key)?;
        let _op = handle.op_lock.lock().await;
        let id = handle.id().clone();

        let (status, removing) = handle.with(|c| (c.status(), c.state.removal_in_progress));
        if removing || status == ContainerStatus::Dead {
            return Err(DockhandError::Conflict(format!(
                "Container {} is dead or marked for removal and cannot be committed",
                id
            )));
        }

        let freeze = options.pause && status == ContainerStatus::Running;
        if freeze {
            self.supervisor.pause(&id).await?;
        }
        let result = self.commit_locked(&handle, &options);
        if freeze && let Err(e) = self.supervisor.resume(&id).await {
            tracing::warn!(container_id = %id, error = %e, "Failed to resume container after commit");
        }
        let image_id = result?;

        if let Some(reference) = &reference {
            self.references.add(reference, &image_id)?;
            self.events
                .log_image_event(image_id.as_str(), &reference.to_string(), "tag");
        }

        DaemonMetricsStorage::incr(&self.metrics.images_committed);
        handle.with(|c| {
            let mut attrs = BTreeMap::from([("imageID".to_string(), image_id.to_string())]);
            if !options.comment.is_empty() {
                attrs.insert("comment".into(), options.comment.clone());
            }
            self.events.log_container_event_with(c, "commit", attrs)
        });
        tracing::info!(container_id = %id, image_id = %image_id, "Committed container");
        Ok(image_id)
    }

    fn commit_locked(&self, handle: &SharedHandle, options: &CommitOptions) -> DockhandResult<ImageId> {
        let container = handle.snapshot();
        let rw_layer = handle.rw_layer().ok_or_else(|| {
            DockhandError::Internal(format!("container {} has no read-write layer", container.id))
        })?;
        let parent_id = container.image_id.clone();
        let parent = self.images.get(&parent_id)?;

        let config = match &options.config {
            Some(overrides) => {
                let mut merged = overrides.clone();
                merged.merge_from(&container.config);
                merged
            }
            None => container.config.clone(),
        };

        let mut diff = self.layers.tar_diff(&rw_layer)?;
        let parent_chain = parent.rootfs.chain_id();
        let layer = self.layers.register(&mut *diff, parent_chain.as_ref())?;
        tracing::debug!(
            container_id = %container.id,
            chain_id = %layer.chain_id(),
            "Registered committed layer"
        );

        let image = Image::new_child(
            Some(&parent),
            ChildConfig {
                container_id: container.id.to_string(),
                author: options.author.clone(),
                comment: options.comment.clone(),
                container_config: Some(container.config.clone()),
                config: Some(config),
                diff_id: Some(layer.diff_id().clone()),
            },
        );
        let created = self.images.create_child(&image, &parent_id);

        // The image store holds its own handle now
        if let Err(e) = self.layers.release(layer) {
            tracing::warn!(error = %e, "Failed to release committed layer handle");
        }
        created
    }
}
