//! Named-volume registry with per-container reference counts.
//!
//! References are keyed by container id, so a container that mounts the same
//! volume at several destinations holds exactly one reference. References are
//! not persisted: containers re-acquire theirs on restore.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::driver::{Volume, VolumeDriver};
use crate::util::{generate_id, read_json, write_json_atomic};

#[derive(Default)]
struct StoreState {
    volumes: BTreeMap<String, Volume>,
    /// volume name -> ids of containers referencing it
    refs: HashMap<String, HashSet<String>>,
}

/// Options for creating a volume.
#[derive(Debug, Clone, Default)]
pub struct VolumeCreateOptions {
    pub name: String,
    /// `None` uses the default driver for new volumes and accepts any driver
    /// for existing ones.
    pub driver: Option<String>,
    pub driver_opts: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl VolumeCreateOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

pub struct VolumeStore {
    drivers: RwLock<HashMap<String, Arc<dyn VolumeDriver>>>,
    default_driver: String,
    metadata_path: PathBuf,
    state: Mutex<StoreState>,
}

impl VolumeStore {
    /// Open the store, loading `metadata_path` and adopting volumes that
    /// drivers report but the metadata does not know about.
    pub fn open(
        metadata_path: impl Into<PathBuf>,
        drivers: Vec<Arc<dyn VolumeDriver>>,
        default_driver: impl Into<String>,
    ) -> DockhandResult<Self> {
        let metadata_path = metadata_path.into();
        let default_driver = default_driver.into();

        let mut volumes: BTreeMap<String, Volume> = if metadata_path.is_file() {
            read_json::<Vec<Volume>>(&metadata_path)?
                .into_iter()
                .map(|v| (v.name.clone(), v))
                .collect()
        } else {
            BTreeMap::new()
        };

        let drivers: HashMap<String, Arc<dyn VolumeDriver>> = drivers
            .into_iter()
            .map(|d| (d.name().to_string(), d))
            .collect();
        if !drivers.contains_key(&default_driver) {
            return Err(DockhandError::Config(format!(
                "default volume driver {} is not registered",
                default_driver
            )));
        }

        for driver in drivers.values() {
            match driver.list() {
                Ok(found) => {
                    for volume in found {
                        volumes.entry(volume.name.clone()).or_insert(volume);
                    }
                }
                Err(e) => {
                    tracing::warn!(driver = %driver.name(), error = %e, "Failed to list volumes")
                }
            }
        }

        tracing::debug!(count = volumes.len(), "Loaded volume store");
        let store = Self {
            drivers: RwLock::new(drivers),
            default_driver,
            metadata_path,
            state: Mutex::new(StoreState {
                volumes,
                refs: HashMap::new(),
            }),
        };
        store.persist(&store.state.lock())?;
        Ok(store)
    }

    pub fn default_driver(&self) -> &str {
        &self.default_driver
    }

    /// Register an additional driver (e.g. a plugin).
    pub fn register_driver(&self, driver: Arc<dyn VolumeDriver>) {
        self.drivers.write().insert(driver.name().to_string(), driver);
    }

    fn driver(&self, name: &str) -> DockhandResult<Arc<dyn VolumeDriver>> {
        self.drivers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DockhandError::NotFound(format!("volume driver {}", name)))
    }

    fn persist(&self, state: &StoreState) -> DockhandResult<()> {
        let volumes: Vec<&Volume> = state.volumes.values().collect();
        write_json_atomic(&self.metadata_path, &volumes)
    }

    fn add_ref(state: &mut StoreState, name: &str, container_id: Option<&str>) {
        if let Some(id) = container_id {
            state
                .refs
                .entry(name.to_string())
                .or_default()
                .insert(id.to_string());
        }
    }

    /// Create a volume (or return the existing one) and record a reference
    /// from `container_id` when given.
    ///
    /// An empty name gets a random one. An existing volume whose driver
    /// differs from the requested driver is a conflict.
    pub fn create_with_ref(
        &self,
        opts: &VolumeCreateOptions,
        container_id: Option<&str>,
    ) -> DockhandResult<Volume> {
        let name = if opts.name.is_empty() {
            generate_id()
        } else {
            opts.name.clone()
        };

        let mut state = self.state.lock();

        if let Some(existing) = state.volumes.get(&name).cloned() {
            if let Some(driver) = &opts.driver
                && driver != &existing.driver
            {
                return Err(DockhandError::Conflict(format!(
                    "volume {} already exists with driver {}, requested driver {}",
                    name, existing.driver, driver
                )));
            }
            Self::add_ref(&mut state, &name, container_id);
            return Ok(existing);
        }

        let driver_name = opts.driver.as_deref().unwrap_or(&self.default_driver);
        let driver = self.driver(driver_name)?;
        let mut volume = driver.create(&name, &opts.driver_opts)?;
        volume.driver = driver_name.to_string();
        volume.labels = opts.labels.clone();
        volume.options = opts.driver_opts.clone();

        state.volumes.insert(name.clone(), volume.clone());
        if let Err(e) = self.persist(&state) {
            state.volumes.remove(&name);
            let _ = driver.remove(&volume);
            return Err(e);
        }
        Self::add_ref(&mut state, &name, container_id);

        tracing::info!(volume = %name, driver = %driver_name, "Created volume");
        Ok(volume)
    }

    /// Create a volume without recording a reference.
    pub fn create(&self, opts: &VolumeCreateOptions) -> DockhandResult<Volume> {
        self.create_with_ref(opts, None)
    }

    pub fn get(&self, name: &str) -> DockhandResult<Volume> {
        self.state
            .lock()
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| DockhandError::NotFound(format!("no such volume: {}", name)))
    }

    /// Look up a volume and record a reference from `container_id`.
    ///
    /// `driver` of `None` (or empty) accepts whatever driver the volume has.
    pub fn get_with_ref(
        &self,
        name: &str,
        driver: Option<&str>,
        container_id: &str,
    ) -> DockhandResult<Volume> {
        let mut state = self.state.lock();
        let volume = state
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| DockhandError::NotFound(format!("no such volume: {}", name)))?;

        if let Some(driver) = driver.filter(|d| !d.is_empty())
            && driver != volume.driver
        {
            return Err(DockhandError::Conflict(format!(
                "volume {} uses driver {}, not {}",
                name, volume.driver, driver
            )));
        }
        // Backing storage must still be there
        self.driver(&volume.driver)?.get(name)?;

        Self::add_ref(&mut state, name, Some(container_id));
        Ok(volume)
    }

    /// Drop `container_id`'s reference. A no-op when it holds none.
    pub fn dereference(&self, name: &str, container_id: &str) {
        let mut state = self.state.lock();
        if let Some(refs) = state.refs.get_mut(name) {
            refs.remove(container_id);
            if refs.is_empty() {
                state.refs.remove(name);
            }
        }
    }

    /// Remove a volume. Fails with [`DockhandError::InUse`] while referenced.
    pub fn remove(&self, name: &str) -> DockhandResult<()> {
        let mut state = self.state.lock();
        let volume = state
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| DockhandError::NotFound(format!("no such volume: {}", name)))?;

        if let Some(refs) = state.refs.get(name)
            && !refs.is_empty()
        {
            let mut users: Vec<&str> = refs.iter().map(String::as_str).collect();
            users.sort_unstable();
            return Err(DockhandError::InUse(format!(
                "remove {}: volume is in use - [{}]",
                name,
                users.join(", ")
            )));
        }

        self.driver(&volume.driver)?.remove(&volume)?;
        state.volumes.remove(name);
        self.persist(&state)?;

        tracing::info!(volume = %name, "Removed volume");
        Ok(())
    }

    pub fn list(&self) -> Vec<Volume> {
        self.state.lock().volumes.values().cloned().collect()
    }

    pub fn ref_count(&self, name: &str) -> usize {
        self.state.lock().refs.get(name).map_or(0, HashSet::len)
    }

    /// Ids of containers referencing `name`, sorted.
    pub fn references(&self, name: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .lock()
            .refs
            .get(name)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}
