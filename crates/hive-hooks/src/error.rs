//! Error types for hook installation

use std::io;
use std::path::PathBuf;

/// Result type for hook operations
pub type Result<T> = std::result::Result<T, HookError>;

/// Errors that can occur while checking or writing hook scripts
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Reading, writing or chmod-ing a script failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Script or directory involved
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Hook configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HookError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
