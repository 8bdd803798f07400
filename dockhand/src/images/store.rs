//! Content-addressable image store.
//!
//! Configs are stored verbatim under their digest; parent links and
//! last-updated timestamps live in a separate metadata directory since they
//! are not part of an image's identity. Each stored image holds one layer
//! handle on the top of its chain.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use dockhand_shared::errors::{DockhandError, DockhandResult};
use dockhand_shared::layout::DaemonLayout;

use super::image::Image;
use crate::digest::{Digest, ImageId};
use crate::layer::{Layer, LayerMetadata, LayerStore};
use crate::util::write_file_atomic;

const PARENT_FILE: &str = "parent";
const LAST_UPDATED_FILE: &str = "lastUpdated";

struct ImageEntry {
    image: Arc<Image>,
    layer: Option<Layer>,
    parent: Option<ImageId>,
    children: HashSet<ImageId>,
    last_updated: Option<DateTime<Utc>>,
}

pub struct ImageStore {
    content_dir: PathBuf,
    metadata_dir: PathBuf,
    layers: Arc<dyn LayerStore>,
    images: RwLock<HashMap<ImageId, ImageEntry>>,
}

impl ImageStore {
    /// Open the store and re-acquire layers for every stored image.
    ///
    /// Images whose digest does not verify or whose layers are missing are
    /// skipped with a warning.
    pub fn open(layout: &DaemonLayout, layers: Arc<dyn LayerStore>) -> DockhandResult<Self> {
        let store = Self {
            content_dir: layout.image_content_dir(),
            metadata_dir: layout.image_metadata_dir(),
            layers,
            images: RwLock::new(HashMap::new()),
        };
        std::fs::create_dir_all(&store.content_dir)?;
        std::fs::create_dir_all(&store.metadata_dir)?;
        store.load()?;
        Ok(store)
    }

    fn load(&self) -> DockhandResult<()> {
        let mut images = self.images.write();

        for entry in std::fs::read_dir(&self.content_dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(id) = Digest::parse(file_name) else {
                tracing::warn!(path = %path.display(), "Skipping unexpected file in image store");
                continue;
            };

            let bytes = std::fs::read(&path)?;
            if Digest::from_bytes(&bytes) != id {
                tracing::warn!(image_id = %id, "Image content does not match its digest, skipping");
                continue;
            }
            let image = match Image::from_bytes(&bytes) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(image_id = %id, error = %e, "Skipping unreadable image");
                    continue;
                }
            };

            let layer = match image.rootfs.chain_id() {
                Some(chain_id) => match self.layers.get(&chain_id) {
                    Ok(layer) => Some(layer),
                    Err(e) => {
                        tracing::warn!(image_id = %id, chain_id = %chain_id, error = %e, "Image layers missing, skipping");
                        continue;
                    }
                },
                None => None,
            };

            let meta_dir = self.metadata_dir.join(id.hex());
            let parent = std::fs::read_to_string(meta_dir.join(PARENT_FILE))
                .ok()
                .and_then(|s| Digest::parse(s.trim()).ok());
            let last_updated = std::fs::read_to_string(meta_dir.join(LAST_UPDATED_FILE))
                .ok()
                .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
                .map(|t| t.with_timezone(&Utc));

            images.insert(
                id,
                ImageEntry {
                    image: Arc::new(image),
                    layer,
                    parent,
                    children: HashSet::new(),
                    last_updated,
                },
            );
        }

        let links: Vec<(ImageId, ImageId)> = images
            .iter()
            .filter_map(|(id, e)| e.parent.clone().map(|p| (p, id.clone())))
            .collect();
        for (parent, child) in links {
            match images.get_mut(&parent) {
                Some(entry) => {
                    entry.children.insert(child);
                }
                None => tracing::debug!(image_id = %child, parent = %parent, "Parent image not present"),
            }
        }

        tracing::debug!(count = images.len(), "Loaded image store");
        Ok(())
    }

    /// Store `image`, returning its id. Storing identical content twice is a
    /// no-op returning the same id.
    pub fn create(&self, image: &Image) -> DockhandResult<ImageId> {
        self.store(image, None)
    }

    /// Store `image` as a child of `parent`. The parent link is recorded in
    /// the same step; a missing parent stores nothing.
    pub fn create_child(&self, image: &Image, parent: &ImageId) -> DockhandResult<ImageId> {
        self.store(image, Some(parent))
    }

    fn store(&self, image: &Image, parent: Option<&ImageId>) -> DockhandResult<ImageId> {
        image.validate()?;
        let bytes = image.to_bytes()?;
        let id = Digest::from_bytes(&bytes);

        let mut images = self.images.write();
        if images.contains_key(&id) {
            return Ok(id);
        }
        if let Some(parent) = parent
            && !images.contains_key(parent)
        {
            return Err(DockhandError::NotFound(format!("No such image: {}", parent)));
        }

        let layer = match image.rootfs.chain_id() {
            Some(chain_id) => Some(self.layers.get(&chain_id).map_err(|e| {
                DockhandError::Storage(format!("failed to get layer {}: {}", chain_id, e))
            })?),
            None => None,
        };

        let content_path = self.content_dir.join(id.hex());
        let written = write_file_atomic(&content_path, &bytes).and_then(|()| match parent {
            Some(parent) => write_file_atomic(
                &self.metadata_dir.join(id.hex()).join(PARENT_FILE),
                parent.as_str().as_bytes(),
            )
            .inspect_err(|_| {
                let _ = std::fs::remove_file(&content_path);
            }),
            None => Ok(()),
        });
        if let Err(e) = written {
            if let Some(layer) = layer
                && let Err(release_err) = self.layers.release(layer)
            {
                tracing::warn!(error = %release_err, "Failed to release layer");
            }
            return Err(e);
        }

        images.insert(
            id.clone(),
            ImageEntry {
                image: Arc::new(image.clone()),
                layer,
                parent: parent.cloned(),
                children: HashSet::new(),
                last_updated: None,
            },
        );
        if let Some(parent_entry) = parent.and_then(|p| images.get_mut(p)) {
            parent_entry.children.insert(id.clone());
        }
        tracing::debug!(image_id = %id, parent = ?parent, "Stored image");
        Ok(id)
    }

    pub fn get(&self, id: &ImageId) -> DockhandResult<Arc<Image>> {
        self.images
            .read()
            .get(id)
            .map(|e| e.image.clone())
            .ok_or_else(|| DockhandError::NotFound(format!("No such image: {}", id)))
    }

    pub fn contains(&self, id: &ImageId) -> bool {
        self.images.read().contains_key(id)
    }

    pub fn get_parent(&self, id: &ImageId) -> DockhandResult<Option<ImageId>> {
        self.images
            .read()
            .get(id)
            .map(|e| e.parent.clone())
            .ok_or_else(|| DockhandError::NotFound(format!("No such image: {}", id)))
    }

    pub fn children(&self, id: &ImageId) -> Vec<ImageId> {
        let mut children: Vec<ImageId> = self
            .images
            .read()
            .get(id)
            .map(|e| e.children.iter().cloned().collect())
            .unwrap_or_default();
        children.sort();
        children
    }

    pub fn set_last_updated(&self, id: &ImageId) -> DockhandResult<()> {
        let now = Utc::now();
        let mut images = self.images.write();
        let entry = images
            .get_mut(id)
            .ok_or_else(|| DockhandError::NotFound(format!("No such image: {}", id)))?;
        write_file_atomic(
            &self.metadata_dir.join(id.hex()).join(LAST_UPDATED_FILE),
            now.to_rfc3339().as_bytes(),
        )?;
        entry.last_updated = Some(now);
        Ok(())
    }

    pub fn last_updated(&self, id: &ImageId) -> Option<DateTime<Utc>> {
        self.images.read().get(id).and_then(|e| e.last_updated)
    }

    /// Size of the image's full layer chain.
    pub fn size(&self, id: &ImageId) -> u64 {
        self.images
            .read()
            .get(id)
            .and_then(|e| e.layer.as_ref().map(Layer::size))
            .unwrap_or(0)
    }

    /// Remove an image and release its layer handle.
    ///
    /// Callers check for children and references first; the store itself
    /// only refuses images that still have children.
    pub fn delete(&self, id: &ImageId) -> DockhandResult<Vec<LayerMetadata>> {
        let mut images = self.images.write();
        let entry = images
            .get(id)
            .ok_or_else(|| DockhandError::NotFound(format!("No such image: {}", id)))?;
        if !entry.children.is_empty() {
            return Err(DockhandError::Conflict(format!(
                "image {} has dependent child images",
                id.short()
            )));
        }

        let Some(entry) = images.remove(id) else {
            return Ok(Vec::new());
        };
        if let Some(parent) = &entry.parent
            && let Some(parent_entry) = images.get_mut(parent)
        {
            parent_entry.children.remove(id);
        }
        drop(images);

        for path in [self.content_dir.join(id.hex()), self.metadata_dir.join(id.hex())] {
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = result
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove image file");
            }
        }

        match entry.layer {
            Some(layer) => self.layers.release(layer),
            None => Ok(Vec::new()),
        }
    }

    pub fn ids(&self) -> Vec<ImageId> {
        let mut ids: Vec<ImageId> = self.images.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.images.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerConfig;
    use crate::images::image::ChildConfig;
    use crate::layer::FsLayerStore;
    use tempfile::TempDir;

    fn tar_with(name: &str, data: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, data).unwrap();
        builder.into_inner().unwrap()
    }

    fn setup(dir: &TempDir) -> (Arc<dyn LayerStore>, ImageStore) {
        let layout = DaemonLayout::new(dir.path());
        let layers: Arc<dyn LayerStore> = Arc::new(FsLayerStore::open(&layout).unwrap());
        let store = ImageStore::open(&layout, layers.clone()).unwrap();
        (layers, store)
    }

    #[test]
    fn test_create_is_deduplicated_and_holds_layer() {
        let dir = TempDir::new().unwrap();
        let (layers, store) = setup(&dir);

        let layer = layers.register(&mut tar_with("a", b"1").as_slice(), None).unwrap();
        let image = Image::base(vec![layer.diff_id().clone()], ContainerConfig::new("base"));

        let id1 = store.create(&image).unwrap();
        let id2 = store.create(&image).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.len(), 1);

        // The image keeps the layer alive after the registration handle goes
        layers.release(layer).unwrap();
        assert_eq!(layers.layers().len(), 1);

        let deleted = store.delete(&id1).unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(layers.layers().is_empty());
    }

    #[test]
    fn test_create_missing_layer_fails() {
        let dir = TempDir::new().unwrap();
        let (_layers, store) = setup(&dir);
        let image = Image::base(vec![Digest::from_bytes(b"nope")], ContainerConfig::default());
        let err = store.create(&image).unwrap_err();
        assert_eq!(err.kind(), dockhand_shared::ErrorKind::System);
    }

    #[test]
    fn test_parent_links_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let (parent_id, child_id);
        {
            let (layers, store) = setup(&dir);
            let base_layer = layers.register(&mut tar_with("a", b"1").as_slice(), None).unwrap();
            let parent = Image::base(vec![base_layer.diff_id().clone()], ContainerConfig::new("base"));
            parent_id = store.create(&parent).unwrap();

            let child = Image::new_child(
                Some(&parent),
                ChildConfig {
                    comment: "empty step".into(),
                    ..Default::default()
                },
            );
            child_id = store.create_child(&child, &parent_id).unwrap();
            store.set_last_updated(&child_id).unwrap();

            assert!(store.delete(&parent_id).is_err());
            layers.release(base_layer).unwrap();
        }

        let (layers, store) = setup(&dir);
        assert_eq!(store.get_parent(&child_id).unwrap(), Some(parent_id.clone()));
        assert_eq!(store.children(&parent_id), vec![child_id.clone()]);
        assert!(store.last_updated(&child_id).is_some());

        // Both images share one layer chain
        assert_eq!(layers.layers()[0].references, 2);
    }

    #[test]
    fn test_create_child_with_missing_parent_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let (layers, store) = setup(&dir);
        let base_layer = layers.register(&mut tar_with("a", b"1").as_slice(), None).unwrap();
        let parent = Image::base(vec![base_layer.diff_id().clone()], ContainerConfig::new("base"));
        let child = Image::new_child(
            Some(&parent),
            ChildConfig {
                comment: "orphan".into(),
                ..Default::default()
            },
        );

        let missing = Digest::from_bytes(b"gone");
        let err = store.create_child(&child, &missing).unwrap_err();
        assert!(matches!(err, DockhandError::NotFound(_)), "{err}");
        assert_eq!(store.len(), 0);

        // No image handle was taken on the layer
        layers.release(base_layer).unwrap();
        assert!(layers.layers().is_empty());

        let content = DaemonLayout::new(dir.path()).image_content_dir();
        assert_eq!(std::fs::read_dir(content).unwrap().count(), 0);
    }

    #[test]
    fn test_tampered_content_is_skipped() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let (_layers, store) = setup(&dir);
            id = store.create(&Image::base(vec![], ContainerConfig::new("scratch"))).unwrap();
        }
        let path = DaemonLayout::new(dir.path()).image_content_dir().join(id.hex());
        std::fs::write(&path, b"{}").unwrap();

        let (_layers, store) = setup(&dir);
        assert!(store.get(&id).is_err());
    }
}
