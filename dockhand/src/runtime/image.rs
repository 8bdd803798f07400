//! Image import, tag, history, inspect, list and delete.

use std::io::Read;

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::rt_impl::DaemonImpl;
use crate::container::ContainerConfig;
use crate::digest::{ImageId, chain_id};
use crate::images::{Image, Reference};
use crate::runtime::types::{ImageDeleteResponse, ImageHistoryEntry, ImageInspect, ImageSummary};

const MISSING_ID: &str = "<missing>";

impl DaemonImpl {
    /// Register a single-layer base image from an uncompressed tar.
    pub(crate) fn image_import(
        &self,
        diff: &mut dyn Read,
        reference: Option<&str>,
        config: ContainerConfig,
    ) -> DockhandResult<ImageId> {
        let reference = reference.map(Reference::parse).transpose()?;

        let layer = self.layers.register(diff, None)?;
        let image = Image::base(vec![layer.diff_id().clone()], config);
        let created = self.images.create(&image);
        if let Err(e) = self.layers.release(layer) {
            tracing::warn!(error = %e, "Failed to release imported layer handle");
        }
        let id = created?;

        let reference_name = reference.as_ref().map(Reference::to_string).unwrap_or_default();
        if let Some(reference) = &reference {
            self.references.add(reference, &id)?;
        }
        self.events.log_image_event(id.as_str(), &reference_name, "import");
        tracing::info!(image_id = %id, reference = %reference_name, "Imported image");
        Ok(id)
    }

    /// Point `repo:tag` at the image `key` resolves to.
    pub(crate) fn tag_image(&self, key: &str, repo: &str, tag: &str) -> DockhandResult<Reference> {
        let (id, _) = self.resolve_image(key)?;
        let reference = Reference::with_tag(repo, tag)?;
        self.references.add(&reference, &id)?;
        self.images.set_last_updated(&id)?;
        self.events
            .log_image_event(id.as_str(), &reference.to_string(), "tag");
        tracing::info!(image_id = %id, reference = %reference, "Tagged image");
        Ok(reference)
    }

    fn tags_of(&self, id: &ImageId) -> Vec<String> {
        self.references
            .references(id)
            .into_iter()
            .filter(|r| !r.is_digested())
            .map(|r| r.to_string())
            .collect()
    }

    /// One record per history step, newest first.
    pub(crate) fn image_history(&self, key: &str) -> DockhandResult<Vec<ImageHistoryEntry>> {
        let (id, image) = self.resolve_image(key)?;

        let mut history = Vec::with_capacity(image.history.len());
        let mut diff_ids = Vec::new();
        let mut layer_index = 0;
        for step in &image.history {
            let mut size = 0;
            if !step.empty_layer {
                let diff_id = image.rootfs.diff_ids.get(layer_index).ok_or_else(|| {
                    DockhandError::Storage(format!("image {} history has more layers than its rootfs", id))
                })?;
                diff_ids.push(diff_id.clone());
                layer_index += 1;
                if let Some(chain) = chain_id(&diff_ids) {
                    let layer = self.layers.get(&chain)?;
                    size = layer.diff_size();
                    if let Err(e) = self.layers.release(layer) {
                        tracing::warn!(error = %e, "Failed to release layer handle");
                    }
                }
            }
            history.push(ImageHistoryEntry {
                id: MISSING_ID.to_string(),
                created: step.created,
                created_by: step.created_by.clone(),
                tags: Vec::new(),
                size,
                comment: step.comment.clone(),
            });
        }
        history.reverse();

        // Each ancestor image accounts for one step
        let mut current = Some(id);
        for entry in history.iter_mut() {
            let Some(image_id) = current.take() else {
                break;
            };
            entry.tags = self.tags_of(&image_id);
            entry.id = image_id.to_string();
            current = self.images.get_parent(&image_id).ok().flatten();
        }
        Ok(history)
    }

    pub(crate) fn image_inspect(&self, key: &str) -> DockhandResult<ImageInspect> {
        let (id, image) = self.resolve_image(key)?;
        let refs = self.references.references(&id);
        let (digests, tags): (Vec<_>, Vec<_>) = refs.into_iter().partition(Reference::is_digested);
        Ok(ImageInspect {
            id: id.to_string(),
            repo_tags: tags.iter().map(ToString::to_string).collect(),
            repo_digests: digests.iter().map(ToString::to_string).collect(),
            parent: self
                .images
                .get_parent(&id)?
                .map(|p| p.to_string())
                .unwrap_or_default(),
            comment: image.comment.clone(),
            created: image.created,
            container: image.container.clone(),
            author: image.author.clone(),
            config: image.config.clone(),
            architecture: image.architecture.clone(),
            os: image.os.clone(),
            size: self.images.size(&id),
            layers: image.rootfs.diff_ids.iter().map(ToString::to_string).collect(),
            last_tag_time: self.images.last_updated(&id),
        })
    }

    pub(crate) fn image_list(&self) -> Vec<ImageSummary> {
        let containers = self.containers.list();
        let mut summaries: Vec<ImageSummary> = self
            .images
            .ids()
            .into_iter()
            .filter_map(|id| {
                let image = self.images.get(&id).ok()?;
                let used_by = containers
                    .iter()
                    .filter(|h| h.with(|c| c.image_id == id))
                    .count();
                Some(ImageSummary {
                    id: id.to_string(),
                    parent_id: self
                        .images
                        .get_parent(&id)
                        .ok()
                        .flatten()
                        .map(|p| p.to_string())
                        .unwrap_or_default(),
                    repo_tags: self.tags_of(&id),
                    created: image.created,
                    size: self.images.size(&id),
                    containers: used_by,
                })
            })
            .collect();
        summaries.sort_by(|a, b| b.created.cmp(&a.created));
        summaries
    }

    /// Untag or delete an image.
    ///
    /// A reference key removes that reference, and deletes the image when it
    /// was the last one and nothing else needs it. An id key deletes the
    /// image; multiple references or a stopped container using it need
    /// `force`. Running containers and child images always block deletion.
    pub(crate) fn image_delete(&self, key: &str, force: bool) -> DockhandResult<Vec<ImageDeleteResponse>> {
        let (id, _) = self.resolve_image(key)?;
        let mut report = Vec::new();

        let by_reference = Reference::parse(key)
            .ok()
            .filter(|r| self.references.get(r).as_ref() == Some(&id));

        if let Some(reference) = by_reference {
            self.references.delete(&reference)?;
            self.events
                .log_image_event(id.as_str(), &reference.to_string(), "untag");
            report.push(ImageDeleteResponse::Untagged(reference.to_string()));
            if !self.references.references(&id).is_empty() {
                return Ok(report);
            }
            // Now dangling; delete only if nothing else needs it
            if self.image_delete_conflict(&id, false).is_err() {
                return Ok(report);
            }
        } else {
            let refs = self.references.references(&id);
            if refs.len() > 1 && !force {
                return Err(DockhandError::Conflict(format!(
                    "unable to delete {} (must be forced) - image is referenced in multiple repositories",
                    id.short()
                )));
            }
            self.image_delete_conflict(&id, force)?;
            for reference in refs {
                self.references.delete(&reference)?;
                self.events
                    .log_image_event(id.as_str(), &reference.to_string(), "untag");
                report.push(ImageDeleteResponse::Untagged(reference.to_string()));
            }
        }

        let released = self.images.delete(&id)?;
        self.events.log_image_event(id.as_str(), "", "delete");
        report.push(ImageDeleteResponse::Deleted(id.to_string()));
        report.extend(
            released
                .into_iter()
                .map(|meta| ImageDeleteResponse::Deleted(meta.chain_id.to_string())),
        );
        tracing::info!(image_id = %id, "Deleted image");
        Ok(report)
    }

    fn image_delete_conflict(&self, id: &ImageId, force: bool) -> DockhandResult<()> {
        if !self.images.children(id).is_empty() {
            return Err(DockhandError::Conflict(format!(
                "unable to delete {} - image has dependent child images",
                id.short()
            )));
        }
        for handle in self.containers.list() {
            let (uses, active) = handle.with(|c| (&c.image_id == id, c.status().is_active()));
            if !uses {
                continue;
            }
            if active || !force {
                return Err(DockhandError::Conflict(format!(
                    "unable to delete {} - image is being used by {} container {}",
                    id.short(),
                    if active { "running" } else { "stopped" },
                    handle.id().short()
                )));
            }
        }
        Ok(())
    }
}
