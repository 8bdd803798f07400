//! Images: configs, the content-addressable store, references and the
//! registry interface.

mod image;
mod reference;
mod registry;
mod store;

pub use image::{ChildConfig, HistoryEntry, Image, RootFs};
pub use reference::{DEFAULT_TAG, Reference, ReferenceStore};
pub use registry::{
    AuthConfig, AuthStatus, DefaultRegistryService, IndexInfo, RegistryService, RepositoryInfo,
};
pub use store::ImageStore;
