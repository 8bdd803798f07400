//! Registry service interface.
//!
//! The wire protocol lives outside this crate; the core only needs to know
//! which index a repository belongs to and to forward authentication.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::reference::Reference;

pub const DEFAULT_INDEX: &str = "docker.io";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub mirrors: Vec<String>,
    pub secure: bool,
    pub official: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    /// Repository path without the index host.
    pub name: String,
    pub index: IndexInfo,
    /// True for official images on the default index.
    pub official: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub server_address: String,
    pub identity_token: String,
}

/// Result of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStatus {
    pub status: String,
    pub identity_token: String,
}

#[async_trait]
pub trait RegistryService: Send + Sync {
    fn resolve_repository(&self, reference: &Reference) -> DockhandResult<RepositoryInfo>;

    async fn auth(&self, auth: &AuthConfig, user_agent: &str) -> DockhandResult<AuthStatus>;
}

/// Resolves repositories from daemon configuration only.
#[derive(Debug, Clone, Default)]
pub struct DefaultRegistryService {
    mirrors: Vec<String>,
    insecure_registries: Vec<String>,
}

impl DefaultRegistryService {
    pub fn new(mirrors: Vec<String>, insecure_registries: Vec<String>) -> Self {
        Self {
            mirrors,
            insecure_registries,
        }
    }

    fn split_index(name: &str) -> (&str, &str) {
        match name.split_once('/') {
            Some((first, rest))
                if first == "localhost" || first.contains('.') || first.contains(':') =>
            {
                (first, rest)
            }
            _ => (DEFAULT_INDEX, name),
        }
    }
}

#[async_trait]
impl RegistryService for DefaultRegistryService {
    fn resolve_repository(&self, reference: &Reference) -> DockhandResult<RepositoryInfo> {
        let (index_name, remote) = Self::split_index(reference.name());
        let is_default = index_name == DEFAULT_INDEX;
        let official = is_default && (!remote.contains('/') || remote.starts_with("library/"));

        Ok(RepositoryInfo {
            name: remote.to_string(),
            index: IndexInfo {
                name: index_name.to_string(),
                mirrors: if is_default {
                    self.mirrors.clone()
                } else {
                    Vec::new()
                },
                secure: !self.insecure_registries.iter().any(|r| r == index_name),
                official: is_default,
            },
            official,
        })
    }

    async fn auth(&self, auth: &AuthConfig, _user_agent: &str) -> DockhandResult<AuthStatus> {
        Err(DockhandError::Unsupported(format!(
            "cannot authenticate to {}: no registry transport configured",
            if auth.server_address.is_empty() {
                DEFAULT_INDEX
            } else {
                &auth.server_address
            }
        )))
    }
}
