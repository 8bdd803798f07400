//! dockhand - container engine daemon core.
//!
//! Container lifecycle, the content-addressable image and layer store,
//! volume and mount resolution, and exec sessions. Transport (HTTP API,
//! CLI) and process isolation live outside this crate; processes are run
//! through a [`Supervisor`].
//!
//! Entry point is [`Daemon`]:
//!
//! ```no_run
//! use dockhand::{ContainerConfig, Daemon, HostConfig};
//! use dockhand::runtime::options::DaemonOptions;
//!
//! # async fn run() -> dockhand::DockhandResult<()> {
//! let daemon = Daemon::new(DaemonOptions::default()).await?;
//! let created = daemon.container_create(
//!     Some("web"),
//!     ContainerConfig::new("busybox"),
//!     HostConfig::default(),
//! )?;
//! daemon.container_start(created.id.as_str()).await?;
//! # Ok(())
//! # }
//! ```

pub mod container;
pub mod digest;
pub mod events;
pub mod exec;
pub mod images;
pub mod layer;
pub mod metrics;
pub mod runtime;
pub mod supervisor;
pub(crate) mod util;
pub mod volumes;

pub use container::{
    Container, ContainerConfig, ContainerState, ContainerStatus, HostConfig, RestartPolicy,
    RestartPolicyName,
};
pub use dockhand_shared::errors::{DockhandError, DockhandResult, ErrorKind};
pub use events::{Event, EventLogger, EventType, EventsService};
pub use exec::{ExecConfig, ExecInspect};
pub use metrics::DaemonMetrics;
pub use runtime::types::{ContainerCreateResponse, ContainerId, ContainerSummary, ExecId};
pub use runtime::{CommitOptions, Daemon, DaemonBuilder, RemoveOptions};
pub use supervisor::{ExecSpec, HostSupervisor, ProcessSpec, Supervisor};
