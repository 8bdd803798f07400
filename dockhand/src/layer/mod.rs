//! Layer store interface.
//!
//! Layers are immutable, content-addressed filesystem diffs stacked into
//! chains. Every consumer holds a counted handle: images hold a [`Layer`] for
//! the top of their chain, containers hold a [`RwLayer`] whose parent is the
//! image's chain. A layer stays on disk while any handle, child layer or RW
//! layer still needs it.
//!
//! The graph-driver side (how diffs are actually stacked) is out of scope;
//! [`FsLayerStore`] is a plain directory-backed implementation that exposes
//! the chain as an upper dir plus lower dirs.

mod fs_store;

pub use fs_store::FsLayerStore;

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;

use dockhand_shared::errors::DockhandResult;

use crate::digest::{ChainId, DiffId};

/// Counted handle on a read-only layer.
///
/// Handles are single-use: releasing the same handle twice is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub(crate) chain_id: ChainId,
    pub(crate) diff_id: DiffId,
    pub(crate) parent: Option<ChainId>,
    pub(crate) size: u64,
    pub(crate) diff_size: u64,
    pub(crate) handle: u64,
}

impl Layer {
    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn diff_id(&self) -> &DiffId {
        &self.diff_id
    }

    pub fn parent(&self) -> Option<&ChainId> {
        self.parent.as_ref()
    }

    /// Size of this layer and all of its ancestors.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size of this layer's own diff.
    pub fn diff_size(&self) -> u64 {
        self.diff_size
    }
}

/// Counted handle on a container's read-write layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RwLayer {
    pub(crate) name: String,
    pub(crate) parent: Option<ChainId>,
    pub(crate) handle: u64,
}

impl RwLayer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&ChainId> {
        self.parent.as_ref()
    }
}

/// Options for creating a read-write layer.
#[derive(Debug, Clone, Default)]
pub struct RwLayerOptions {
    pub mount_label: Option<String>,
    pub storage_opts: HashMap<String, String>,
}

/// Describes a layer that was deleted from disk by a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerMetadata {
    pub chain_id: ChainId,
    pub diff_id: DiffId,
    pub size: u64,
    pub diff_size: u64,
}

/// Snapshot of a stored layer, for listings and disk usage.
#[derive(Debug, Clone)]
pub struct LayerInfo {
    pub chain_id: ChainId,
    pub diff_id: DiffId,
    pub parent: Option<ChainId>,
    pub size: u64,
    pub diff_size: u64,
    pub references: usize,
}

/// A mounted container root filesystem.
///
/// `upper` is the writable directory, `lowers` the read-only chain from the
/// topmost layer down to the base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootfsMount {
    pub upper: PathBuf,
    pub lowers: Vec<PathBuf>,
}

/// Content-addressable, reference-counted layer provider.
pub trait LayerStore: Send + Sync {
    /// Register a tar diff on top of `parent`. Idempotent for identical content.
    ///
    /// An unknown `parent` is a system error: it means the store is corrupt.
    fn register(&self, diff: &mut dyn Read, parent: Option<&ChainId>) -> DockhandResult<Layer>;

    /// Acquire a new handle on an existing layer.
    fn get(&self, chain_id: &ChainId) -> DockhandResult<Layer>;

    /// Release a handle, deleting layers nothing references any more.
    fn release(&self, layer: Layer) -> DockhandResult<Vec<LayerMetadata>>;

    fn create_rw_layer(
        &self,
        name: &str,
        parent: Option<&ChainId>,
        opts: &RwLayerOptions,
    ) -> DockhandResult<RwLayer>;

    /// Acquire a new handle on an existing read-write layer.
    fn get_rw_layer(&self, name: &str) -> DockhandResult<RwLayer>;

    /// Release a read-write handle; the layer is deleted with its last handle.
    fn release_rw_layer(&self, layer: RwLayer) -> DockhandResult<Vec<LayerMetadata>>;

    fn mount(&self, layer: &RwLayer) -> DockhandResult<RootfsMount>;

    fn unmount(&self, layer: &RwLayer) -> DockhandResult<()>;

    fn is_mounted(&self, layer: &RwLayer) -> bool;

    /// Stream the read-write layer's changes as an uncompressed tar.
    fn tar_diff(&self, layer: &RwLayer) -> DockhandResult<Box<dyn Read + Send>>;

    /// Bytes used by the read-write layer's changes.
    fn rw_size(&self, layer: &RwLayer) -> DockhandResult<u64>;

    fn layers(&self) -> Vec<LayerInfo>;

    /// Delete layers and read-write layers nothing holds a handle on.
    ///
    /// Run after restore, once images and containers re-acquired theirs.
    fn collect_orphans(&self) -> DockhandResult<Vec<LayerMetadata>>;
}
