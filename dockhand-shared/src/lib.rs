//! Types shared by every dockhand crate.
//!
//! - [`errors`]: the error enum and its coarse [`errors::ErrorKind`] classification
//! - [`layout`]: on-disk directory layout of the daemon home
//! - [`constants`]: defaults used across crates

pub mod constants;
pub mod errors;
pub mod layout;

pub use errors::{DockhandError, DockhandResult, ErrorKind};
pub use layout::DaemonLayout;
