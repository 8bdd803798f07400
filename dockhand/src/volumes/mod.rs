//! Volumes and mount resolution.
//!
//! - [`VolumeStore`] - named volumes with per-container reference counts
//! - [`VolumeDriver`] / [`LocalDriver`] - backing storage
//! - [`MountResolver`] - merges a container's mount sources into one table

mod driver;
mod local;
mod mount;
pub(crate) mod parser;
mod resolver;
mod store;

pub use driver::{Volume, VolumeDriver};
pub use local::LocalDriver;
pub use mount::{
    BindOptions, DriverConfig, MountPoint, MountSpec, MountType, Propagation, TmpfsOptions,
    VolumeOptions,
};
pub use resolver::{InheritedMounts, MountRequest, MountResolver, ResolvedMounts, lazy_initialize_volume};
pub use store::{VolumeCreateOptions, VolumeStore};
