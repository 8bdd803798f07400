//! On-disk layout of the daemon home directory.
//!
//! ```text
//! {home}/
//! ├── containers/
//! │   └── {id}/
//! │       └── config.v2.json     # Durable container snapshot
//! ├── image/
//! │   ├── imagedb/
//! │   │   ├── content/sha256/    # Image configs keyed by digest
//! │   │   └── metadata/sha256/   # parent, lastUpdated per image
//! │   └── repositories.json      # Reference store
//! ├── layers/
//! │   ├── sha256/{chain}/        # Read-only layers
//! │   └── rw/{name}/             # Container read-write layers
//! ├── volumes/
//! │   ├── metadata.json          # Volume store index
//! │   └── {name}/_data           # Local driver data
//! └── tmp/
//! ```

use std::path::{Path, PathBuf};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Directory and file names under the daemon home.
pub mod dirs {
    pub const CONTAINERS: &str = "containers";
    pub const IMAGE: &str = "image";
    pub const IMAGEDB: &str = "imagedb";
    pub const CONTENT: &str = "content";
    pub const METADATA: &str = "metadata";
    pub const SHA256: &str = "sha256";
    pub const LAYERS: &str = "layers";
    pub const RW: &str = "rw";
    pub const VOLUMES: &str = "volumes";
    pub const TMP: &str = "tmp";

    /// Container snapshot file name.
    pub const CONTAINER_CONFIG: &str = "config.v2.json";

    /// Reference store file name.
    pub const REPOSITORIES: &str = "repositories.json";

    /// Volume store index file name.
    pub const VOLUME_METADATA: &str = "metadata.json";
}

// ============================================================================
// DAEMON LAYOUT
// ============================================================================

/// Paths under a daemon home directory.
///
/// # Example
///
/// ```
/// use dockhand_shared::layout::DaemonLayout;
///
/// let layout = DaemonLayout::new("/var/lib/dockhand");
/// assert!(layout.container_dir("abc").ends_with("containers/abc"));
/// assert!(layout.image_content_dir().ends_with("imagedb/content/sha256"));
/// ```
#[derive(Clone, Debug)]
pub struct DaemonLayout {
    home: PathBuf,
}

impl DaemonLayout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Containers directory: {home}/containers
    pub fn containers_dir(&self) -> PathBuf {
        self.home.join(dirs::CONTAINERS)
    }

    /// Per-container directory: {home}/containers/{id}
    pub fn container_dir(&self, id: &str) -> PathBuf {
        self.containers_dir().join(id)
    }

    /// Snapshot path: {home}/containers/{id}/config.v2.json
    pub fn container_config(&self, id: &str) -> PathBuf {
        self.container_dir(id).join(dirs::CONTAINER_CONFIG)
    }

    /// Image root: {home}/image
    pub fn image_dir(&self) -> PathBuf {
        self.home.join(dirs::IMAGE)
    }

    /// Image configs: {home}/image/imagedb/content/sha256
    pub fn image_content_dir(&self) -> PathBuf {
        self.image_dir()
            .join(dirs::IMAGEDB)
            .join(dirs::CONTENT)
            .join(dirs::SHA256)
    }

    /// Image metadata: {home}/image/imagedb/metadata/sha256
    pub fn image_metadata_dir(&self) -> PathBuf {
        self.image_dir()
            .join(dirs::IMAGEDB)
            .join(dirs::METADATA)
            .join(dirs::SHA256)
    }

    /// Reference store file: {home}/image/repositories.json
    pub fn repositories_file(&self) -> PathBuf {
        self.image_dir().join(dirs::REPOSITORIES)
    }

    /// Layer store root: {home}/layers
    pub fn layers_dir(&self) -> PathBuf {
        self.home.join(dirs::LAYERS)
    }

    /// Read-only layers: {home}/layers/sha256
    pub fn ro_layers_dir(&self) -> PathBuf {
        self.layers_dir().join(dirs::SHA256)
    }

    /// Read-write layers: {home}/layers/rw
    pub fn rw_layers_dir(&self) -> PathBuf {
        self.layers_dir().join(dirs::RW)
    }

    /// Volumes root: {home}/volumes
    pub fn volumes_dir(&self) -> PathBuf {
        self.home.join(dirs::VOLUMES)
    }

    /// Volume store index: {home}/volumes/metadata.json
    pub fn volume_metadata_file(&self) -> PathBuf {
        self.volumes_dir().join(dirs::VOLUME_METADATA)
    }

    /// Scratch space: {home}/tmp
    pub fn temp_dir(&self) -> PathBuf {
        self.home.join(dirs::TMP)
    }

    /// Create every top-level directory.
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.containers_dir())?;
        std::fs::create_dir_all(self.image_content_dir())?;
        std::fs::create_dir_all(self.image_metadata_dir())?;
        std::fs::create_dir_all(self.ro_layers_dir())?;
        std::fs::create_dir_all(self.rw_layers_dir())?;
        std::fs::create_dir_all(self.volumes_dir())?;
        std::fs::create_dir_all(self.temp_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = DaemonLayout::new("/test/home");

        assert_eq!(
            layout.container_config("c1").to_str().unwrap(),
            "/test/home/containers/c1/config.v2.json"
        );
        assert_eq!(
            layout.image_metadata_dir().to_str().unwrap(),
            "/test/home/image/imagedb/metadata/sha256"
        );
        assert_eq!(
            layout.repositories_file().to_str().unwrap(),
            "/test/home/image/repositories.json"
        );
        assert_eq!(
            layout.rw_layers_dir().to_str().unwrap(),
            "/test/home/layers/rw"
        );
        assert_eq!(
            layout.volume_metadata_file().to_str().unwrap(),
            "/test/home/volumes/metadata.json"
        );
    }

    #[test]
    fn test_prepare_creates_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = DaemonLayout::new(dir.path());
        layout.prepare().unwrap();

        assert!(layout.containers_dir().is_dir());
        assert!(layout.image_content_dir().is_dir());
        assert!(layout.ro_layers_dir().is_dir());
        assert!(layout.volumes_dir().is_dir());
        assert!(layout.temp_dir().is_dir());
    }
}
