//! The container record and its durable snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dockhand_shared::constants::container::{DEFAULT_STOP_SIGNAL, DEFAULT_STOP_TIMEOUT_SECS};
use dockhand_shared::errors::DockhandResult;
use dockhand_shared::layout::DaemonLayout;

use super::config::{ContainerConfig, HostConfig};
use super::state::{ContainerState, ContainerStatus};
use crate::digest::ImageId;
use crate::runtime::types::{ContainerId, ContainerSummary};
use crate::util::{read_json, write_json_atomic};
use crate::volumes::MountPoint;

/// Everything the daemon knows about one container.
///
/// Serialized as-is to `containers/{id}/config.v2.json` after every
/// externally visible change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    /// Unique name without the leading slash.
    pub name: String,
    pub created: DateTime<Utc>,
    pub image_id: ImageId,
    /// Config after merging the image defaults.
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    pub state: ContainerState,
    /// Destination -> mount point.
    #[serde(default)]
    pub mount_points: BTreeMap<String, MountPoint>,
    /// Name of the read-write layer in the layer store.
    pub rw_layer: String,
    /// Warnings produced at creation time.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Exec sessions currently attached; not persisted.
    #[serde(skip)]
    pub exec_ids: BTreeSet<String>,
    /// Bumped whenever the mount table changes; not persisted.
    #[serde(skip)]
    pub generation: u64,
}

impl Container {
    pub fn new(
        id: ContainerId,
        name: String,
        image_id: ImageId,
        config: ContainerConfig,
        host_config: HostConfig,
    ) -> Self {
        let rw_layer = id.as_str().to_string();
        Self {
            id,
            name,
            created: Utc::now(),
            image_id,
            config,
            host_config,
            state: ContainerState::new(),
            mount_points: BTreeMap::new(),
            rw_layer,
            warnings: Vec::new(),
            exec_ids: BTreeSet::new(),
            generation: 0,
        }
    }

    pub fn status(&self) -> ContainerStatus {
        self.state.status
    }

    /// Signal for a graceful stop.
    pub fn stop_signal(&self) -> &str {
        self.config
            .stop_signal
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STOP_SIGNAL)
    }

    /// Seconds to wait after the stop signal, falling back to `default`.
    pub fn stop_timeout(&self, default: Option<i64>) -> i64 {
        self.config
            .stop_timeout
            .or(default)
            .unwrap_or(DEFAULT_STOP_TIMEOUT_SECS)
    }

    pub fn replace_mount_points(&mut self, mounts: BTreeMap<String, MountPoint>) {
        self.mount_points = mounts;
        self.generation += 1;
    }

    /// Volume names referenced by this container's mounts.
    pub fn volume_names(&self) -> Vec<String> {
        self.mount_points
            .values()
            .filter(|m| m.is_volume() && !m.name.is_empty())
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.config.image.clone(),
            image_id: self.image_id.to_string(),
            status: self.state.status,
            created: self.created,
            exit_code: self.state.exit_code,
            labels: self.config.labels.clone(),
            mounts: self.mount_points.keys().cloned().collect(),
        }
    }

    /// Write the snapshot atomically.
    pub fn to_disk(&self, layout: &DaemonLayout) -> DockhandResult<()> {
        std::fs::create_dir_all(layout.container_dir(self.id.as_str()))?;
        write_json_atomic(&layout.container_config(self.id.as_str()), self)
    }

    pub fn from_disk(path: &Path) -> DockhandResult<Self> {
        read_json(path)
    }

    /// Load every snapshot under the containers directory. Unreadable
    /// entries are logged and skipped.
    pub fn load_all(layout: &DaemonLayout) -> Vec<Self> {
        let Ok(entries) = std::fs::read_dir(layout.containers_dir()) else {
            return Vec::new();
        };

        let mut containers = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let path = layout.container_config(&name);
            match Self::from_disk(&path) {
                Ok(container) if container.id.as_str() == name => containers.push(container),
                Ok(container) => tracing::warn!(
                    dir = %name,
                    container_id = %container.id,
                    "Snapshot id does not match its directory, skipping"
                ),
                Err(e) => tracing::warn!(dir = %name, error = %e, "Failed to load container snapshot"),
            }
        }
        containers
    }

    pub fn remove_from_disk(layout: &DaemonLayout, id: &ContainerId) -> DockhandResult<()> {
        let dir = layout.container_dir(id.as_str());
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;
    use tempfile::TempDir;

    fn sample() -> Container {
        let mut config = ContainerConfig::new("busybox");
        config.cmd = vec!["sh".into()];
        Container::new(
            ContainerId::new(),
            "web".into(),
            Digest::from_bytes(b"image"),
            config,
            HostConfig::default(),
        )
    }

    #[test]
    fn test_snapshot_roundtrip_skips_runtime_fields() {
        let dir = TempDir::new().unwrap();
        let layout = DaemonLayout::new(dir.path());
        layout.prepare().unwrap();

        let mut container = sample();
        container.exec_ids.insert("exec1".into());
        container.replace_mount_points(BTreeMap::from([(
            "/data".to_string(),
            MountPoint::bind("/host", "/data", true),
        )]));
        container.to_disk(&layout).unwrap();

        let loaded = Container::load_all(&layout);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, container.id);
        assert_eq!(loaded[0].mount_points.len(), 1);
        assert!(loaded[0].exec_ids.is_empty());
        assert_eq!(loaded[0].generation, 0);

        Container::remove_from_disk(&layout, &container.id).unwrap();
        assert!(Container::load_all(&layout).is_empty());
        Container::remove_from_disk(&layout, &container.id).unwrap();
    }

    #[test]
    fn test_stop_defaults() {
        let mut container = sample();
        assert_eq!(container.stop_signal(), "SIGTERM");
        assert_eq!(container.stop_timeout(None), 10);
        assert_eq!(container.stop_timeout(Some(3)), 3);

        container.config.stop_signal = Some("SIGQUIT".into());
        container.config.stop_timeout = Some(-1);
        assert_eq!(container.stop_signal(), "SIGQUIT");
        assert_eq!(container.stop_timeout(Some(3)), -1);
    }
}
