//! Errors surfaced by project lifecycle operations.

use hive_core::{InUse, InvalidName, ProjectId};
use hive_store_git::RepoError;
use thiserror::Error;

/// Failure of a project operation. Nothing is committed when one is returned.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The acting principal lacks a required capability.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The project is still referenced elsewhere.
    #[error("{subject} is still in use: {}", .usages.join("; "))]
    InUse {
        /// What was about to be deleted.
        subject: String,
        /// Referencing locations.
        usages: Vec<String>,
    },

    /// No project matches the request.
    #[error("project not found: {0}")]
    NotFound(String),

    /// The requested parent would create a cycle or does not exist.
    #[error("invalid move: {0}")]
    InvalidMove(String),

    /// Name or path is unusable or already taken.
    #[error("invalid project path: {0}")]
    InvalidPath(String),

    /// Repository storage failed.
    #[error(transparent)]
    Repository(#[from] RepoError),

    /// The persistent store failed.
    #[error("store error: {0:#}")]
    Store(anyhow::Error),

    /// A dependent subsystem failed while copying project data.
    #[error("{context}: {error:#}")]
    Dependent {
        /// Step that failed.
        context: &'static str,
        /// Underlying error.
        error: anyhow::Error,
    },
}

impl LifecycleError {
    /// Wrap a store-specific error.
    pub fn store<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Store(err.into())
    }

    pub(crate) fn not_found(id: ProjectId) -> Self {
        Self::NotFound(format!("#{id}"))
    }
}

impl From<InUse> for LifecycleError {
    fn from(err: InUse) -> Self {
        Self::InUse {
            subject: err.subject,
            usages: err.usages,
        }
    }
}

impl From<InvalidName> for LifecycleError {
    fn from(err: InvalidName) -> Self {
        Self::InvalidPath(err.to_string())
    }
}

/// Result alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;
