//! Mount table entries and structured mount specifications.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::driver::Volume;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    Bind,
    Volume,
    Tmpfs,
    Npipe,
}

impl fmt::Display for MountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MountType::Bind => "bind",
            MountType::Volume => "volume",
            MountType::Tmpfs => "tmpfs",
            MountType::Npipe => "npipe",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Propagation {
    Private,
    Rprivate,
    Shared,
    Rshared,
    Slave,
    Rslave,
}

impl Propagation {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "rprivate" => Some(Self::Rprivate),
            "shared" => Some(Self::Shared),
            "rshared" => Some(Self::Rshared),
            "slave" => Some(Self::Slave),
            "rslave" => Some(Self::Rslave),
            _ => None,
        }
    }
}

/// One resolved entry of a container's mount table, keyed by destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountPoint {
    pub destination: String,
    /// Host path for binds, the volume's mountpoint for volumes.
    pub source: String,
    #[serde(rename = "type")]
    pub mount_type: MountType,
    pub rw: bool,
    /// Volume name; empty for binds and tmpfs.
    #[serde(default)]
    pub name: String,
    /// The user named the volume; anonymous volumes are removed with the
    /// container on request, named ones never are.
    #[serde(default)]
    pub named: bool,
    #[serde(default)]
    pub driver: String,
    /// Raw mode string from a legacy bind spec (`ro,Z`).
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub propagation: Option<Propagation>,
    /// Copy image content into an empty volume on first mount.
    #[serde(default)]
    pub copy_data: bool,
    /// The structured spec this entry came from, if any.
    #[serde(default)]
    pub spec: Option<MountSpec>,
    /// Volume store lookup, filled lazily after a restart.
    #[serde(skip)]
    pub volume: Option<Volume>,
}

impl MountPoint {
    pub fn bind(source: impl Into<String>, destination: impl Into<String>, rw: bool) -> Self {
        Self {
            destination: destination.into(),
            source: source.into(),
            mount_type: MountType::Bind,
            rw,
            name: String::new(),
            named: false,
            driver: String::new(),
            mode: String::new(),
            propagation: None,
            copy_data: false,
            spec: None,
            volume: None,
        }
    }

    pub fn volume(
        name: impl Into<String>,
        driver: impl Into<String>,
        destination: impl Into<String>,
        rw: bool,
    ) -> Self {
        let name = name.into();
        Self {
            destination: destination.into(),
            source: String::new(),
            mount_type: MountType::Volume,
            rw,
            named: !name.is_empty(),
            name,
            driver: driver.into(),
            mode: String::new(),
            propagation: None,
            copy_data: true,
            spec: None,
            volume: None,
        }
    }

    /// True when this entry is backed by a volume in the store.
    pub fn is_volume(&self) -> bool {
        self.mount_type == MountType::Volume && !self.name.is_empty()
    }

    pub(crate) fn attach(&mut self, volume: Volume) {
        self.source = volume.mountpoint.to_string_lossy().into_owned();
        self.driver = volume.driver.clone();
        self.volume = Some(volume);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindOptions {
    pub propagation: Option<Propagation>,
    /// Create the host path when missing instead of rejecting the spec.
    #[serde(default)]
    pub create_mountpoint: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub name: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeOptions {
    #[serde(default)]
    pub no_copy: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub driver_config: Option<DriverConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmpfsOptions {
    pub size_bytes: Option<i64>,
    pub mode: Option<u32>,
}

/// Explicit mount request (`--mount type=...,source=...,target=...`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    #[serde(rename = "type")]
    pub mount_type: MountType,
    #[serde(default)]
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
    pub bind_options: Option<BindOptions>,
    pub volume_options: Option<VolumeOptions>,
    pub tmpfs_options: Option<TmpfsOptions>,
}

impl MountSpec {
    pub fn new(mount_type: MountType, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            mount_type,
            source: source.into(),
            target: target.into(),
            read_only: false,
            bind_options: None,
            volume_options: None,
            tmpfs_options: None,
        }
    }
}
