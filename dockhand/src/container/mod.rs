//! Container records, lifecycle state and the in-memory registry.

mod config;
#[allow(clippy::module_inception)]
mod container;
mod handle;
pub(crate) mod links;
mod registry;
pub(crate) mod restart;
mod state;
pub(crate) mod validate;

pub use config::{
    ContainerConfig, HealthConfig, HostConfig, PlatformConfig, Resources, RestartPolicy,
    RestartPolicyName, UnixConfig, WindowsConfig,
};
pub(crate) use config::env_key;
pub use container::Container;
pub use handle::StatusEvent;
pub(crate) use handle::{ContainerHandle, SharedHandle};
pub(crate) use registry::ContainerRegistry;
pub use state::{ContainerState, ContainerStatus};
