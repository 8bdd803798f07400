//! Error type for all daemon operations.
//!
//! Each variant carries a human-readable message. Callers that need to react
//! programmatically (retry, skip during pruning, map to a status code) use
//! [`DockhandError::kind`] instead of matching variants.

use thiserror::Error;

/// Coarse classification of a [`DockhandError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No such container, image, volume or exec session.
    NotFound,
    /// Name collision, removal in progress, or a resource still in use.
    Conflict,
    /// Operation is illegal in the current lifecycle state.
    InvalidState,
    /// Malformed input; reported before any state is mutated.
    InvalidParameter,
    /// Unexpected internal failure.
    System,
}

#[derive(Debug, Error)]
pub enum DockhandError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A volume (or other shared resource) is still referenced.
    #[error("in use: {0}")]
    InUse(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// Process supervision failure.
    #[error("engine error: {0}")]
    Engine(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DockhandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DockhandError::NotFound(_) => ErrorKind::NotFound,
            DockhandError::Conflict(_) | DockhandError::InUse(_) => ErrorKind::Conflict,
            DockhandError::InvalidState(_) => ErrorKind::InvalidState,
            DockhandError::InvalidParameter(_) | DockhandError::Config(_) => {
                ErrorKind::InvalidParameter
            }
            DockhandError::Storage(_)
            | DockhandError::Engine(_)
            | DockhandError::Internal(_)
            | DockhandError::Unsupported(_)
            | DockhandError::Io(_)
            | DockhandError::Serde(_) => ErrorKind::System,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// True for the "still referenced" condition that pruning skips silently.
    pub fn is_in_use(&self) -> bool {
        matches!(self, DockhandError::InUse(_))
    }
}

pub type DockhandResult<T> = Result<T, DockhandError>;
