//! Built-in `local` volume driver: one directory per volume.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use dockhand_shared::constants::volume as volume_const;
use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::driver::{Volume, VolumeDriver};

const VALID_OPTIONS: [&str; 3] = ["type", "device", "o"];

/// Stores each volume at `{root}/{name}/_data`.
pub struct LocalDriver {
    root: PathBuf,
}

impl LocalDriver {
    pub fn new(root: impl Into<PathBuf>) -> DockhandResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.root.join(name).join(volume_const::DATA_DIR)
    }

    fn volume_at(&self, name: &str, data: &Path) -> Volume {
        let created_at = std::fs::metadata(data)
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let mut volume = Volume::new(name, volume_const::DEFAULT_DRIVER, data.to_path_buf());
        volume.created_at = created_at;
        volume
    }
}

/// Volume names: `[a-zA-Z0-9][a-zA-Z0-9_.-]+`.
pub(crate) fn validate_volume_name(name: &str) -> DockhandResult<()> {
    let mut chars = name.chars();
    let valid = name.len() >= 2
        && chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid {
        return Err(DockhandError::InvalidParameter(format!(
            "{:?} includes invalid characters for a local volume name, only \"[a-zA-Z0-9][a-zA-Z0-9_.-]\" are allowed",
            name
        )));
    }
    Ok(())
}

impl VolumeDriver for LocalDriver {
    fn name(&self) -> &str {
        volume_const::DEFAULT_DRIVER
    }

    fn create(&self, name: &str, opts: &BTreeMap<String, String>) -> DockhandResult<Volume> {
        validate_volume_name(name)?;
        if let Some(key) = opts.keys().find(|k| !VALID_OPTIONS.contains(&k.as_str())) {
            return Err(DockhandError::InvalidParameter(format!(
                "invalid option key: {:?}",
                key
            )));
        }

        let data = self.data_path(name);
        std::fs::create_dir_all(&data)?;
        let mut volume = self.volume_at(name, &data);
        volume.options = opts.clone();

        tracing::debug!(volume = %name, path = %data.display(), "Created local volume");
        Ok(volume)
    }

    fn remove(&self, volume: &Volume) -> DockhandResult<()> {
        match std::fs::remove_dir_all(self.root.join(&volume.name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DockhandError::Storage(format!(
                "error removing volume {}: {}",
                volume.name, e
            ))),
        }
    }

    fn get(&self, name: &str) -> DockhandResult<Volume> {
        let data = self.data_path(name);
        if !data.is_dir() {
            return Err(DockhandError::NotFound(format!("volume {}", name)));
        }
        Ok(self.volume_at(name, &data))
    }

    fn list(&self) -> DockhandResult<Vec<Volume>> {
        let mut volumes = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let data = entry.path().join(volume_const::DATA_DIR);
            if data.is_dir() {
                volumes.push(self.volume_at(&name, &data));
            }
        }
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }
}
