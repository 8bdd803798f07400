//! Daemon configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dockhand_shared::constants::{container, exec, volume};
use dockhand_shared::errors::{DockhandError, DockhandResult};

const CGROUP_CONTROLLERS: &str = "/sys/fs/cgroup/cgroup.controllers";

/// Operating system family the daemon runs containers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
}

impl Default for Platform {
    fn default() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }
}

/// Resource controls the host can enforce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostCapabilities {
    pub memory_limit: bool,
    pub memory_swap: bool,
    pub cpu_limit: bool,
    pub cpuset: bool,
    pub pids_limit: bool,
}

impl HostCapabilities {
    /// Every control available.
    pub fn all() -> Self {
        Self {
            memory_limit: true,
            memory_swap: true,
            cpu_limit: true,
            cpuset: true,
            pids_limit: true,
        }
    }

    /// Read the cgroup v2 controller list. Missing cgroupfs means no
    /// controls.
    pub fn probe() -> Self {
        match std::fs::read_to_string(CGROUP_CONTROLLERS) {
            Ok(content) => Self::from_controllers(&content),
            Err(e) => {
                tracing::debug!(error = %e, "cgroup v2 controllers unavailable");
                Self::default()
            }
        }
    }

    pub(crate) fn from_controllers(content: &str) -> Self {
        let has = |name: &str| content.split_whitespace().any(|c| c == name);
        Self {
            memory_limit: has("memory"),
            memory_swap: has("memory"),
            cpu_limit: has("cpu"),
            cpuset: has("cpuset"),
            pids_limit: has("pids"),
        }
    }
}

/// Configuration options for the daemon.
///
/// # Example
///
/// ```
/// use dockhand::runtime::options::DaemonOptions;
///
/// let options = DaemonOptions {
///     home_dir: "/tmp/dockhand".into(),
///     ..Default::default()
/// };
/// assert_eq!(options.default_volume_driver, "local");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonOptions {
    pub home_dir: PathBuf,
    /// Stop timeout used when neither the caller nor the container sets one.
    pub default_stop_timeout_secs: i64,
    pub exec_gc_interval_secs: u64,
    pub default_volume_driver: String,
    pub platform: Platform,
    /// Probed from cgroupfs when `None`.
    pub host_capabilities: Option<HostCapabilities>,
    pub registry_mirrors: Vec<String>,
    pub insecure_registries: Vec<String>,
    /// Reload container snapshots when the daemon starts.
    pub restore_on_start: bool,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            default_stop_timeout_secs: container::DEFAULT_STOP_TIMEOUT_SECS,
            exec_gc_interval_secs: exec::GC_INTERVAL_SECS,
            default_volume_driver: volume::DEFAULT_DRIVER.to_string(),
            platform: Platform::default(),
            host_capabilities: None,
            registry_mirrors: Vec::new(),
            insecure_registries: Vec::new(),
            restore_on_start: true,
        }
    }
}

fn default_home_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".dockhand"))
        .unwrap_or_else(|| PathBuf::from(".dockhand"))
}

impl DaemonOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> DockhandResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DockhandError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| DockhandError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    pub(crate) fn capabilities(&self) -> HostCapabilities {
        self.host_capabilities
            .clone()
            .unwrap_or_else(HostCapabilities::probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let options = DaemonOptions::default();
        assert_eq!(options.default_stop_timeout_secs, 10);
        assert_eq!(options.exec_gc_interval_secs, 300);
        assert!(options.restore_on_start);
        assert!(options.home_dir.ends_with(".dockhand"));
    }

    #[test]
    fn test_load_partial_and_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.json");

        std::fs::write(&path, r#"{"home_dir": "/srv/dockhand", "platform": "windows"}"#).unwrap();
        let options = DaemonOptions::load(&path).unwrap();
        assert_eq!(options.home_dir, PathBuf::from("/srv/dockhand"));
        assert_eq!(options.platform, Platform::Windows);
        assert_eq!(options.default_volume_driver, "local");

        std::fs::write(&path, r#"{"bogus": 1}"#).unwrap();
        let err = DaemonOptions::load(&path).unwrap_err();
        assert!(matches!(err, DockhandError::Config(_)));

        let err = DaemonOptions::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, DockhandError::Config(_)));
    }

    #[test]
    fn test_capabilities_from_controllers() {
        let caps = HostCapabilities::from_controllers("cpuset cpu io memory pids\n");
        assert_eq!(caps, HostCapabilities::all());

        let caps = HostCapabilities::from_controllers("io");
        assert!(!caps.memory_limit);
        assert!(!caps.pids_limit);
    }
}
