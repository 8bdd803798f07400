//! Volume driver interface.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dockhand_shared::errors::DockhandResult;

/// A named volume as known to its driver and the volume store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub driver: String,
    /// Host path containers see when the volume is mounted.
    pub mountpoint: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_scope() -> String {
    "local".to_string()
}

impl Volume {
    pub fn new(name: impl Into<String>, driver: impl Into<String>, mountpoint: PathBuf) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            mountpoint,
            created_at: Utc::now(),
            labels: BTreeMap::new(),
            options: BTreeMap::new(),
            scope: default_scope(),
        }
    }
}

/// Backend that owns the storage behind named volumes.
///
/// Drivers only manage backing storage; reference counting and metadata
/// live in [`VolumeStore`](super::VolumeStore).
pub trait VolumeDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Create backing storage for `name`. Creating an existing volume returns it.
    fn create(&self, name: &str, opts: &BTreeMap<String, String>) -> DockhandResult<Volume>;

    fn remove(&self, volume: &Volume) -> DockhandResult<()>;

    fn get(&self, name: &str) -> DockhandResult<Volume>;

    fn list(&self) -> DockhandResult<Vec<Volume>>;
}
