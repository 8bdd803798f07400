//! Core identifiers and the result types returned by daemon operations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::container::ContainerStatus;
use crate::util::generate_id;

// ============================================================================
// CONTAINER ID
// ============================================================================

/// Container identifier (64-character lowercase hex).
///
/// SHA256 of random bytes encoded as 64 lowercase hex characters.
///
/// # Example
///
/// ```
/// use dockhand::ContainerId;
///
/// let id = ContainerId::new();
/// assert_eq!(id.as_str().len(), 64);
/// assert_eq!(id.short().len(), 12);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Length of full container ID (64 hex chars = 256 bits).
    pub const FULL_LENGTH: usize = 64;

    /// Length of short container ID for display (12 hex chars).
    pub const SHORT_LENGTH: usize = 12;

    /// Generate a new random container ID.
    pub fn new() -> Self {
        Self(generate_id())
    }

    /// Parse a ContainerId from an existing string.
    ///
    /// Returns `None` if the string is not a valid 64-char lowercase hex string.
    pub fn parse(s: &str) -> Option<Self> {
        if Self::is_valid(s) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    /// Check if a string is a valid container ID format.
    pub fn is_valid(s: &str) -> bool {
        s.len() == Self::FULL_LENGTH && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for display.
    pub fn short(&self) -> &str {
        self.0.get(..Self::SHORT_LENGTH).unwrap_or(&self.0)
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerId({})", self.short())
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Exec session identifier (same format as container ids).
pub type ExecId = String;

// ============================================================================
// OPERATION RESULTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerCreateResponse {
    pub id: ContainerId,
    pub warnings: Vec<String>,
}

/// Public metadata about a container (returned by list operations).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub name: String,
    /// Image reference as given on create.
    pub image: String,
    pub image_id: String,
    pub status: ContainerStatus,
    pub created: DateTime<Utc>,
    pub exit_code: i32,
    pub labels: std::collections::BTreeMap<String, String>,
    /// Mount destinations, sorted.
    pub mounts: Vec<String>,
}

/// One entry of an image's history, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageHistoryEntry {
    /// Image id for entries backed by a stored image, `<missing>` otherwise.
    pub id: String,
    pub created: Option<DateTime<Utc>>,
    pub created_by: String,
    pub tags: Vec<String>,
    /// Diff size of the layer this step added; zero for empty layers.
    pub size: u64,
    pub comment: String,
}

/// Detailed view of a stored image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInspect {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    /// Empty for images without a local parent.
    pub parent: String,
    pub comment: String,
    pub created: Option<DateTime<Utc>>,
    pub container: String,
    pub author: String,
    pub config: Option<crate::container::ContainerConfig>,
    pub architecture: String,
    pub os: String,
    pub size: u64,
    /// DiffIDs, base first.
    pub layers: Vec<String>,
    pub last_tag_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    pub parent_id: String,
    pub repo_tags: Vec<String>,
    pub created: Option<DateTime<Utc>>,
    pub size: u64,
    /// Number of containers created from this image.
    pub containers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageDeleteResponse {
    Untagged(String),
    Deleted(String),
}

/// Aggregate result of a bulk removal. Per-item failures do not abort the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub space_reclaimed: u64,
    /// `(item, error message)` for every item that could not be removed.
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub id: ContainerId,
    pub name: String,
    pub size_rw: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeUsage {
    pub name: String,
    pub driver: String,
    pub size: u64,
    pub ref_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUsage {
    pub id: String,
    pub size: u64,
    pub containers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskUsage {
    pub layers_size: u64,
    pub images: Vec<ImageUsage>,
    pub containers: Vec<ContainerUsage>,
    pub volumes: Vec<VolumeUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_new() {
        let id1 = ContainerId::new();
        let id2 = ContainerId::new();

        assert_eq!(id1.as_str().len(), ContainerId::FULL_LENGTH);
        assert_ne!(id1, id2);
        assert!(ContainerId::is_valid(id1.as_str()));
    }

    #[test]
    fn test_container_id_short() {
        let id = ContainerId::new();
        assert_eq!(id.short().len(), ContainerId::SHORT_LENGTH);
        assert!(id.as_str().starts_with(id.short()));
    }

    #[test]
    fn test_container_id_parse() {
        assert!(ContainerId::parse(&"a".repeat(64)).is_some());
        assert!(ContainerId::parse("abc123").is_none());
        assert!(ContainerId::parse(&"A".repeat(64)).is_none());
        assert!(ContainerId::parse(&"g".repeat(64)).is_none());
    }

    #[test]
    fn test_container_id_debug() {
        let id = ContainerId::new();
        let debug = format!("{:?}", id);
        assert!(debug.contains(id.short()));
        assert!(debug.starts_with("ContainerId("));
    }
}
