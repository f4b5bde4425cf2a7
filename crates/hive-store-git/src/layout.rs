//! On-disk placement of project repositories.

use hive_core::ProjectId;
use std::path::{Path, PathBuf};

/// Directory layout below the storage root.
///
/// ```text
/// <root>/projects/<id>/git                      bare repository and hooks
/// <root>/projects/<id>/git/lfs/objects/aa/bb/<oid>  large objects
/// <root>/projects/<id>/locks/lfs/<oid>.lock     advisory lock files
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory owning everything stored for `project`.
    #[must_use]
    pub fn project_dir(&self, project: ProjectId) -> PathBuf {
        self.root.join("projects").join(project.to_string())
    }

    /// Bare repository directory.
    #[must_use]
    pub fn git_dir(&self, project: ProjectId) -> PathBuf {
        self.project_dir(project).join("git")
    }

    /// Root of the large object store.
    #[must_use]
    pub fn lfs_objects_dir(&self, project: ProjectId) -> PathBuf {
        self.git_dir(project).join("lfs").join("objects")
    }

    /// File holding one large object, fanned out by the first two byte pairs.
    #[must_use]
    pub fn lfs_object_file(&self, project: ProjectId, object_id: &str) -> PathBuf {
        let dir = self.lfs_objects_dir(project);
        match (object_id.get(0..2), object_id.get(2..4)) {
            (Some(first), Some(second)) => dir.join(first).join(second).join(object_id),
            _ => dir.join(object_id),
        }
    }

    /// Directory holding advisory lock files for large objects.
    #[must_use]
    pub fn lfs_lock_dir(&self, project: ProjectId) -> PathBuf {
        self.project_dir(project).join("locks").join("lfs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_nest_below_project_dir() {
        let layout = StorageLayout::new("/srv/hive");
        let id = ProjectId(7);
        assert_eq!(layout.git_dir(id), PathBuf::from("/srv/hive/projects/7/git"));
        assert_eq!(
            layout.lfs_object_file(id, "abcdef"),
            PathBuf::from("/srv/hive/projects/7/git/lfs/objects/ab/cd/abcdef")
        );
        assert_eq!(
            layout.lfs_lock_dir(id),
            PathBuf::from("/srv/hive/projects/7/locks/lfs")
        );
    }
}
