pub mod options;
pub mod types;

mod commit;
mod core;
mod create;
mod exec;
mod image;
mod monitor;
mod mounts;
mod pause;
mod prune;
mod remove;
mod restore;
pub(crate) mod rt_impl;
mod start;
mod stop;
mod volume;

pub use commit::CommitOptions;
pub use core::{Daemon, DaemonBuilder};
pub use remove::RemoveOptions;
