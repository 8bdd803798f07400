//! Directory-backed layer store.
//!
//! ```text
//! layers/
//! ├── sha256/{chain hex}/
//! │   ├── diff/          # Unpacked content
//! │   ├── layer.tar      # Uncompressed diff as registered
//! │   └── meta.json
//! └── rw/{name}/
//!     ├── diff/          # Writable upper dir
//!     └── meta.json
//! ```
//!
//! Reference counts live in memory and are rebuilt by consumers on restart:
//! images re-acquire their top layer, containers their RW layer, and
//! [`LayerStore::collect_orphans`] then deletes everything left unclaimed.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::read::GzDecoder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use dockhand_shared::errors::{DockhandError, DockhandResult};
use dockhand_shared::layout::DaemonLayout;

use super::{Layer, LayerInfo, LayerMetadata, LayerStore, RootfsMount, RwLayer, RwLayerOptions};
use crate::digest::{ChainId, DiffId, Digest};
use crate::util::{dir_size, read_json, write_json_atomic};

const DIFF_DIR: &str = "diff";
const LAYER_TAR: &str = "layer.tar";
const META_FILE: &str = "meta.json";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoLayerMeta {
    chain_id: ChainId,
    diff_id: DiffId,
    parent: Option<ChainId>,
    size: u64,
    diff_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RwLayerMeta {
    name: String,
    parent: Option<ChainId>,
    #[serde(default)]
    mount_label: Option<String>,
}

struct RoEntry {
    meta: RoLayerMeta,
    handles: HashSet<u64>,
    /// Child layers plus RW layers stacked directly on this one.
    children: usize,
}

impl RoEntry {
    fn references(&self) -> usize {
        self.handles.len() + self.children
    }
}

struct RwEntry {
    meta: RwLayerMeta,
    handles: HashSet<u64>,
    mounts: usize,
}

#[derive(Default)]
struct StoreState {
    layers: HashMap<ChainId, RoEntry>,
    rw: HashMap<String, RwEntry>,
}

pub struct FsLayerStore {
    ro_root: PathBuf,
    rw_root: PathBuf,
    tmp_root: PathBuf,
    state: Mutex<StoreState>,
    next_handle: AtomicU64,
}

impl FsLayerStore {
    /// Open the store under `layout`, loading layer metadata from disk.
    pub fn open(layout: &DaemonLayout) -> DockhandResult<Self> {
        let store = Self {
            ro_root: layout.ro_layers_dir(),
            rw_root: layout.rw_layers_dir(),
            tmp_root: layout.temp_dir(),
            state: Mutex::new(StoreState::default()),
            next_handle: AtomicU64::new(1),
        };
        std::fs::create_dir_all(&store.ro_root)?;
        std::fs::create_dir_all(&store.rw_root)?;
        std::fs::create_dir_all(&store.tmp_root)?;
        store.load()?;
        Ok(store)
    }

    fn load(&self) -> DockhandResult<()> {
        let mut state = self.state.lock();

        for entry in std::fs::read_dir(&self.ro_root)? {
            let path = entry?.path();
            let meta_path = path.join(META_FILE);
            if !meta_path.is_file() {
                tracing::warn!(path = %path.display(), "Skipping layer directory without metadata");
                continue;
            }
            match read_json::<RoLayerMeta>(&meta_path) {
                Ok(meta) => {
                    state.layers.insert(
                        meta.chain_id.clone(),
                        RoEntry {
                            meta,
                            handles: HashSet::new(),
                            children: 0,
                        },
                    );
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable layer"),
            }
        }

        for entry in std::fs::read_dir(&self.rw_root)? {
            let path = entry?.path();
            match read_json::<RwLayerMeta>(&path.join(META_FILE)) {
                Ok(meta) => {
                    state.rw.insert(
                        meta.name.clone(),
                        RwEntry {
                            meta,
                            handles: HashSet::new(),
                            mounts: 0,
                        },
                    );
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable RW layer"),
            }
        }

        // Rebuild child counts from parent pointers
        let parents: Vec<ChainId> = state
            .layers
            .values()
            .filter_map(|e| e.meta.parent.clone())
            .chain(state.rw.values().filter_map(|e| e.meta.parent.clone()))
            .collect();
        for parent in parents {
            match state.layers.get_mut(&parent) {
                Some(entry) => entry.children += 1,
                None => tracing::warn!(parent = %parent, "Layer references missing parent"),
            }
        }

        tracing::debug!(
            layers = state.layers.len(),
            rw_layers = state.rw.len(),
            "Loaded layer store"
        );
        Ok(())
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn ro_dir(&self, chain_id: &ChainId) -> PathBuf {
        self.ro_root.join(chain_id.hex())
    }

    fn rw_dir(&self, name: &str) -> PathBuf {
        self.rw_root.join(name)
    }

    fn layer_handle(entry: &RoEntry, handle: u64) -> Layer {
        Layer {
            chain_id: entry.meta.chain_id.clone(),
            diff_id: entry.meta.diff_id.clone(),
            parent: entry.meta.parent.clone(),
            size: entry.meta.size,
            diff_size: entry.meta.diff_size,
            handle,
        }
    }

    /// Delete `chain_id` if nothing references it, cascading to parents.
    fn delete_unreferenced(
        &self,
        state: &mut StoreState,
        chain_id: &ChainId,
    ) -> DockhandResult<Vec<LayerMetadata>> {
        let mut deleted = Vec::new();
        let mut next = Some(chain_id.clone());

        while let Some(current) = next.take() {
            let unreferenced = state
                .layers
                .get(&current)
                .is_some_and(|e| e.references() == 0);
            if !unreferenced {
                break;
            }
            let Some(entry) = state.layers.remove(&current) else {
                break;
            };

            remove_dir_if_exists(&self.ro_dir(&current))?;
            tracing::debug!(chain_id = %current, "Deleted layer");

            if let Some(parent) = &entry.meta.parent
                && let Some(parent_entry) = state.layers.get_mut(parent)
            {
                parent_entry.children = parent_entry.children.saturating_sub(1);
                next = Some(parent.clone());
            }

            deleted.push(LayerMetadata {
                chain_id: entry.meta.chain_id,
                diff_id: entry.meta.diff_id,
                size: entry.meta.size,
                diff_size: entry.meta.diff_size,
            });
        }

        Ok(deleted)
    }

    /// Drop an RW layer entry and its directory, then its parent if orphaned.
    fn delete_rw(&self, state: &mut StoreState, name: &str) -> DockhandResult<Vec<LayerMetadata>> {
        let Some(entry) = state.rw.remove(name) else {
            return Ok(Vec::new());
        };
        remove_dir_if_exists(&self.rw_dir(name))?;
        tracing::debug!(layer = %name, "Deleted RW layer");

        match &entry.meta.parent {
            Some(parent) => {
                if let Some(parent_entry) = state.layers.get_mut(parent) {
                    parent_entry.children = parent_entry.children.saturating_sub(1);
                }
                self.delete_unreferenced(state, parent)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Read the whole diff, decompressing gzip input.
    fn read_diff(diff: &mut dyn Read) -> DockhandResult<Vec<u8>> {
        let mut raw = Vec::new();
        diff.read_to_end(&mut raw)?;

        if raw.starts_with(&GZIP_MAGIC) {
            let mut decoded = Vec::new();
            GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
            return Ok(decoded);
        }
        Ok(raw)
    }
}

impl LayerStore for FsLayerStore {
    fn register(&self, diff: &mut dyn Read, parent: Option<&ChainId>) -> DockhandResult<Layer> {
        let content = Self::read_diff(diff)?;
        let diff_id = Digest::from_bytes(&content);

        let mut state = self.state.lock();

        let parent_size = match parent {
            Some(parent) => {
                state
                    .layers
                    .get(parent)
                    .ok_or_else(|| {
                        DockhandError::Storage(format!(
                            "parent layer {} does not exist in the layer store",
                            parent
                        ))
                    })?
                    .meta
                    .size
            }
            None => 0,
        };

        let chain_id = match parent {
            Some(parent) => Digest::from_bytes(format!("{} {}", parent, diff_id).as_bytes()),
            None => diff_id.clone(),
        };

        let handle = self.next_handle();
        if let Some(entry) = state.layers.get_mut(&chain_id) {
            entry.handles.insert(handle);
            tracing::debug!(chain_id = %chain_id, "Layer already registered");
            return Ok(Self::layer_handle(entry, handle));
        }

        let dir = self.ro_dir(&chain_id);
        let staging = tempfile::Builder::new()
            .prefix("layer-")
            .tempdir_in(&self.tmp_root)?;

        std::fs::write(staging.path().join(LAYER_TAR), &content)?;
        let diff_dir = staging.path().join(DIFF_DIR);
        std::fs::create_dir_all(&diff_dir)?;
        tar::Archive::new(content.as_slice())
            .unpack(&diff_dir)
            .map_err(|e| DockhandError::Storage(format!("failed to unpack layer {}: {}", diff_id, e)))?;

        let diff_size = content.len() as u64;
        let meta = RoLayerMeta {
            chain_id: chain_id.clone(),
            diff_id,
            parent: parent.cloned(),
            size: parent_size + diff_size,
            diff_size,
        };
        write_json_atomic(&staging.path().join(META_FILE), &meta)?;

        remove_dir_if_exists(&dir)?;
        // The emptied staging guard is dropped without error after the rename
        std::fs::rename(staging.path(), &dir)?;

        if let Some(parent) = parent
            && let Some(parent_entry) = state.layers.get_mut(parent)
        {
            parent_entry.children += 1;
        }

        let entry = RoEntry {
            meta,
            handles: HashSet::from([handle]),
            children: 0,
        };
        let layer = Self::layer_handle(&entry, handle);
        state.layers.insert(chain_id.clone(), entry);

        tracing::debug!(chain_id = %chain_id, diff_size, "Registered layer");
        Ok(layer)
    }

    fn get(&self, chain_id: &ChainId) -> DockhandResult<Layer> {
        let handle = self.next_handle();
        let mut state = self.state.lock();
        let entry = state
            .layers
            .get_mut(chain_id)
            .ok_or_else(|| DockhandError::NotFound(format!("layer {}", chain_id)))?;
        entry.handles.insert(handle);
        Ok(Self::layer_handle(entry, handle))
    }

    fn release(&self, layer: Layer) -> DockhandResult<Vec<LayerMetadata>> {
        let mut state = self.state.lock();
        let released = state
            .layers
            .get_mut(&layer.chain_id)
            .is_some_and(|e| e.handles.remove(&layer.handle));
        if !released {
            return Err(DockhandError::InvalidState(format!(
                "layer handle for {} already released",
                layer.chain_id
            )));
        }
        self.delete_unreferenced(&mut state, &layer.chain_id)
    }

    fn create_rw_layer(
        &self,
        name: &str,
        parent: Option<&ChainId>,
        opts: &RwLayerOptions,
    ) -> DockhandResult<RwLayer> {
        let mut state = self.state.lock();

        if state.rw.contains_key(name) {
            return Err(DockhandError::Conflict(format!("RW layer {} already exists", name)));
        }
        if let Some(parent) = parent
            && !state.layers.contains_key(parent)
        {
            return Err(DockhandError::Storage(format!(
                "parent layer {} does not exist in the layer store",
                parent
            )));
        }

        let dir = self.rw_dir(name);
        std::fs::create_dir_all(dir.join(DIFF_DIR))?;
        let meta = RwLayerMeta {
            name: name.to_string(),
            parent: parent.cloned(),
            mount_label: opts.mount_label.clone(),
        };
        if let Err(e) = write_json_atomic(&dir.join(META_FILE), &meta) {
            let _ = std::fs::remove_dir_all(&dir);
            return Err(e);
        }

        if let Some(parent) = parent
            && let Some(parent_entry) = state.layers.get_mut(parent)
        {
            parent_entry.children += 1;
        }

        let handle = self.next_handle();
        state.rw.insert(
            name.to_string(),
            RwEntry {
                meta,
                handles: HashSet::from([handle]),
                mounts: 0,
            },
        );

        tracing::debug!(layer = %name, "Created RW layer");
        Ok(RwLayer {
            name: name.to_string(),
            parent: parent.cloned(),
            handle,
        })
    }

    fn get_rw_layer(&self, name: &str) -> DockhandResult<RwLayer> {
        let handle = self.next_handle();
        let mut state = self.state.lock();
        let entry = state
            .rw
            .get_mut(name)
            .ok_or_else(|| DockhandError::NotFound(format!("RW layer {}", name)))?;
        entry.handles.insert(handle);
        Ok(RwLayer {
            name: name.to_string(),
            parent: entry.meta.parent.clone(),
            handle,
        })
    }

    fn release_rw_layer(&self, layer: RwLayer) -> DockhandResult<Vec<LayerMetadata>> {
        let mut state = self.state.lock();
        let entry = state.rw.get_mut(&layer.name).ok_or_else(|| {
            DockhandError::InvalidState(format!("RW layer {} already released", layer.name))
        })?;
        if !entry.handles.contains(&layer.handle) {
            return Err(DockhandError::InvalidState(format!(
                "RW layer handle for {} already released",
                layer.name
            )));
        }
        if entry.handles.len() == 1 && entry.mounts > 0 {
            return Err(DockhandError::Conflict(format!(
                "RW layer {} is still mounted",
                layer.name
            )));
        }

        entry.handles.remove(&layer.handle);
        if !entry.handles.is_empty() {
            return Ok(Vec::new());
        }
        self.delete_rw(&mut state, &layer.name)
    }

    fn mount(&self, layer: &RwLayer) -> DockhandResult<RootfsMount> {
        let mut state = self.state.lock();

        let mut lowers = Vec::new();
        let mut next = layer.parent.clone();
        while let Some(chain_id) = next {
            let entry = state.layers.get(&chain_id).ok_or_else(|| {
                DockhandError::Storage(format!("layer {} missing from chain", chain_id))
            })?;
            lowers.push(self.ro_dir(&chain_id).join(DIFF_DIR));
            next = entry.meta.parent.clone();
        }

        let entry = state
            .rw
            .get_mut(&layer.name)
            .filter(|e| e.handles.contains(&layer.handle))
            .ok_or_else(|| DockhandError::InvalidState(format!("RW layer {} released", layer.name)))?;
        entry.mounts += 1;

        Ok(RootfsMount {
            upper: self.rw_dir(&layer.name).join(DIFF_DIR),
            lowers,
        })
    }

    fn unmount(&self, layer: &RwLayer) -> DockhandResult<()> {
        let mut state = self.state.lock();
        if let Some(entry) = state.rw.get_mut(&layer.name) {
            entry.mounts = entry.mounts.saturating_sub(1);
        }
        Ok(())
    }

    fn is_mounted(&self, layer: &RwLayer) -> bool {
        self.state
            .lock()
            .rw
            .get(&layer.name)
            .is_some_and(|e| e.mounts > 0)
    }

    fn tar_diff(&self, layer: &RwLayer) -> DockhandResult<Box<dyn Read + Send>> {
        if !self.state.lock().rw.contains_key(&layer.name) {
            return Err(DockhandError::NotFound(format!("RW layer {}", layer.name)));
        }
        let upper = self.rw_dir(&layer.name).join(DIFF_DIR);

        let mut file = tempfile::tempfile_in(&self.tmp_root)?;
        {
            let mut builder = tar::Builder::new(&mut file);
            builder.follow_symlinks(false);
            builder.append_dir_all(".", &upper)?;
            builder.finish()?;
        }
        file.seek(SeekFrom::Start(0))?;
        Ok(Box::new(file))
    }

    fn rw_size(&self, layer: &RwLayer) -> DockhandResult<u64> {
        Ok(dir_size(&self.rw_dir(&layer.name).join(DIFF_DIR)))
    }

    fn layers(&self) -> Vec<LayerInfo> {
        let state = self.state.lock();
        let mut infos: Vec<LayerInfo> = state
            .layers
            .values()
            .map(|e| LayerInfo {
                chain_id: e.meta.chain_id.clone(),
                diff_id: e.meta.diff_id.clone(),
                parent: e.meta.parent.clone(),
                size: e.meta.size,
                diff_size: e.meta.diff_size,
                references: e.references(),
            })
            .collect();
        infos.sort_by(|a, b| a.chain_id.cmp(&b.chain_id));
        infos
    }

    fn collect_orphans(&self) -> DockhandResult<Vec<LayerMetadata>> {
        let mut state = self.state.lock();
        let mut deleted = Vec::new();

        let orphan_rw: Vec<String> = state
            .rw
            .iter()
            .filter(|(_, e)| e.handles.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        for name in orphan_rw {
            tracing::info!(layer = %name, "Removing orphaned RW layer");
            deleted.extend(self.delete_rw(&mut state, &name)?);
        }

        let orphans: Vec<ChainId> = state
            .layers
            .iter()
            .filter(|(_, e)| e.references() == 0)
            .map(|(id, _)| id.clone())
            .collect();
        for chain_id in orphans {
            deleted.extend(self.delete_unreferenced(&mut state, &chain_id)?);
        }

        if !deleted.is_empty() {
            tracing::info!(count = deleted.len(), "Removed orphaned layers");
        }
        Ok(deleted)
    }
}

fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
