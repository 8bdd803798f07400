//! Image configuration documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dockhand_shared::errors::{DockhandError, DockhandResult};

use crate::container::ContainerConfig;
use crate::digest::{self, ChainId, DiffId, Digest, ImageId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    #[serde(default)]
    pub diff_ids: Vec<DiffId>,
}

impl RootFs {
    pub fn new() -> Self {
        Self {
            fs_type: "layers".to_string(),
            diff_ids: Vec::new(),
        }
    }

    pub fn append(&mut self, diff_id: DiffId) {
        self.diff_ids.push(diff_id);
    }

    /// ChainID of the topmost layer, `None` for an image without layers.
    pub fn chain_id(&self) -> Option<ChainId> {
        digest::chain_id(&self.diff_ids)
    }
}

impl Default for RootFs {
    fn default() -> Self {
        Self::new()
    }
}

/// One build step. Empty-layer steps (`ENV`, `LABEL`, ...) add no DiffID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
}

impl HistoryEntry {
    pub fn new(author: &str, comment: &str, created_by: &str, empty_layer: bool) -> Self {
        Self {
            created: Some(Utc::now()),
            author: author.to_string(),
            created_by: created_by.to_string(),
            comment: comment.to_string(),
            empty_layer,
        }
    }
}

/// An image config. Its id is the digest of its serialized form, so an
/// image is never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    /// Id of the container this image was committed from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container: String,
    #[serde(default)]
    pub container_config: Option<ContainerConfig>,
    #[serde(default)]
    pub config: Option<ContainerConfig>,
    pub architecture: String,
    pub os: String,
    pub rootfs: RootFs,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Inputs for [`Image::new_child`].
#[derive(Debug, Clone, Default)]
pub struct ChildConfig {
    pub container_id: String,
    pub author: String,
    pub comment: String,
    pub container_config: Option<ContainerConfig>,
    pub config: Option<ContainerConfig>,
    /// `None` records an empty-layer step.
    pub diff_id: Option<DiffId>,
}

impl Image {
    /// A base image with the given layers and one history entry per layer.
    pub fn base(diff_ids: Vec<DiffId>, config: ContainerConfig) -> Self {
        let history = diff_ids
            .iter()
            .map(|_| HistoryEntry::new("", "", "", false))
            .collect();
        Self {
            created: Some(Utc::now()),
            author: String::new(),
            comment: String::new(),
            container: String::new(),
            container_config: None,
            config: Some(config),
            architecture: std::env::consts::ARCH.to_string(),
            os: std::env::consts::OS.to_string(),
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids,
            },
            history,
        }
    }

    /// Build the image that results from committing on top of `parent`.
    ///
    /// `parent` of `None` starts from an empty rootfs.
    pub fn new_child(parent: Option<&Image>, child: ChildConfig) -> Self {
        let created_by = child
            .container_config
            .as_ref()
            .map(|c| c.cmd.join(" "))
            .unwrap_or_default();
        let history_entry = HistoryEntry::new(
            &child.author,
            &child.comment,
            &created_by,
            child.diff_id.is_none(),
        );

        let mut rootfs = parent.map(|p| p.rootfs.clone()).unwrap_or_default();
        if let Some(diff_id) = child.diff_id {
            rootfs.append(diff_id);
        }
        let mut history = parent.map(|p| p.history.clone()).unwrap_or_default();
        let created = history_entry.created;
        history.push(history_entry);

        Self {
            created,
            author: child.author,
            comment: child.comment,
            container: child.container_id,
            container_config: child.container_config,
            config: child.config,
            architecture: parent
                .map(|p| p.architecture.clone())
                .unwrap_or_else(|| std::env::consts::ARCH.to_string()),
            os: parent
                .map(|p| p.os.clone())
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            rootfs,
            history,
        }
    }

    /// Non-empty history entries must match the DiffIDs one to one.
    pub fn validate(&self) -> DockhandResult<()> {
        let non_empty = self.history.iter().filter(|h| !h.empty_layer).count();
        if non_empty != self.rootfs.diff_ids.len() {
            return Err(DockhandError::InvalidParameter(format!(
                "image has {} non-empty history entries but {} layers",
                non_empty,
                self.rootfs.diff_ids.len()
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> DockhandResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> DockhandResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Content digest of the serialized config.
    pub fn compute_id(&self) -> DockhandResult<ImageId> {
        Ok(Digest::from_bytes(&self.to_bytes()?))
    }
}
