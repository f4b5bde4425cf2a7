//! Error types for repository storage operations.

use hive_core::ProjectId;
use hive_hooks::HookError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while opening, repairing or mutating repositories.
#[derive(Error, Debug)]
pub enum RepoError {
    /// Git repository error.
    #[error("Git repository error: {0}")]
    Git(#[from] git2::Error),

    /// Filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// Hook scripts could not be checked or written.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// The handle was closed because its project was deleted or the server is stopping.
    #[error("repository of project {0} is closed")]
    Closed(ProjectId),

    /// Branch or tag does not exist.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// Large object id is not plain hex.
    #[error("invalid large object id '{0}'")]
    InvalidObjectId(String),

    /// Advisory lock could not be taken.
    #[error("lock error on {path}: {source}")]
    Lock {
        /// Lock file.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

impl RepoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for repository operations.
pub type Result<T> = std::result::Result<T, RepoError>;
