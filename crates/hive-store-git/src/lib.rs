//! Bare repository storage for project hierarchies.
//!
//! Handles open repositories, repairs them at startup, mirrors them for forks
//! and clones, and copies large objects between projects.

/// Error types.
pub mod error;
/// Open repository handles.
pub mod handles;
/// Storage directory layout.
pub mod layout;
/// Large object copying and locking.
pub mod lfs;
/// Mirror cloning.
pub mod mirror;
/// Ref enumeration and deletion.
pub mod refs;
/// Repository repair.
pub mod sanitizer;

pub use error::{RepoError, Result};
pub use handles::{RepositoryHandle, RepositoryHandleCache};
pub use layout::StorageLayout;
pub use lfs::{LfsLockGuard, LfsLocks, LockMode, copy_lfs_objects};
pub use mirror::mirror_clone;
pub use refs::{
    BRANCH_PREFIX, RefCache, RefInfo, TAG_PREFIX, branch_ref, branch_refs, delete_branch,
    delete_tag, object_id, tag_ref, tag_refs,
};
pub use sanitizer::{RepositorySanitizer, SanitizeReport};

pub use git2;
