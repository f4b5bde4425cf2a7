//! Large object storage copied alongside repositories.

use crate::layout::StorageLayout;
use crate::{RepoError, Result};
use hive_core::ProjectId;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Access mode used when acquiring a large object lock.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// Shared access.
    Read,
    /// Exclusive access.
    Write,
}

/// Guard representing a held object lock. The lock is released when dropped.
#[derive(Debug)]
pub struct LfsLockGuard {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl LfsLockGuard {
    /// Mode the lock is held in.
    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LfsLockGuard {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            warn!(
                path = %self.path.display(),
                mode = ?self.mode,
                error = %err,
                "Failed to release large object lock"
            );
        }
    }
}

/// Per-object advisory locks of one project.
#[derive(Debug, Clone)]
pub struct LfsLocks {
    lock_dir: PathBuf,
}

impl LfsLocks {
    /// Locks stored as files below `lock_dir`.
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
        }
    }

    /// Acquire the lock of `object_id`. Blocks until available.
    ///
    /// # Errors
    /// Returns [`RepoError::InvalidObjectId`] for ids that are not hex, or
    /// [`RepoError::Lock`] when the lock file cannot be opened or locked.
    pub fn acquire(&self, object_id: &str, mode: LockMode) -> Result<LfsLockGuard> {
        let (file, path) = self.open_lock_file(object_id)?;
        let locked = match mode {
            LockMode::Read => fs2::FileExt::lock_shared(&file),
            LockMode::Write => fs2::FileExt::lock_exclusive(&file),
        };
        locked.map_err(|source| RepoError::Lock {
            path: path.clone(),
            source,
        })?;
        Ok(LfsLockGuard { file, path, mode })
    }

    /// Attempt to acquire the lock without blocking.
    ///
    /// # Errors
    /// Same as [`acquire`](Self::acquire); a lock held elsewhere surfaces as [`RepoError::Lock`].
    pub fn try_acquire(&self, object_id: &str, mode: LockMode) -> Result<LfsLockGuard> {
        let (file, path) = self.open_lock_file(object_id)?;
        let locked = match mode {
            LockMode::Read => fs2::FileExt::try_lock_shared(&file),
            LockMode::Write => fs2::FileExt::try_lock_exclusive(&file),
        };
        locked.map_err(|source| RepoError::Lock {
            path: path.clone(),
            source,
        })?;
        Ok(LfsLockGuard { file, path, mode })
    }

    fn open_lock_file(&self, object_id: &str) -> Result<(File, PathBuf)> {
        if !is_object_id(object_id) {
            return Err(RepoError::InvalidObjectId(object_id.to_owned()));
        }
        let lock_error = |path: &Path, source: io::Error| RepoError::Lock {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(&self.lock_dir).map_err(|err| lock_error(&self.lock_dir, err))?;
        let path = self.lock_dir.join(format!("{object_id}.lock"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| lock_error(&path, err))?;
        Ok((file, path))
    }
}

fn is_object_id(value: &str) -> bool {
    value.len() >= 4 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Copy every large object of `from` into `to`, holding each source object's read lock.
///
/// Returns the number of copied objects. Files whose name is not an object id are skipped.
///
/// # Errors
/// Returns an error when a directory cannot be walked or a file cannot be copied.
pub fn copy_lfs_objects(layout: &StorageLayout, from: ProjectId, to: ProjectId) -> Result<usize> {
    let source_root = layout.lfs_objects_dir(from);
    if !source_root.is_dir() {
        return Ok(0);
    }
    let locks = LfsLocks::new(layout.lfs_lock_dir(from));

    let mut copied = 0;
    let mut pending = vec![source_root];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).map_err(|err| RepoError::io(&dir, err))? {
            let path = entry.map_err(|err| RepoError::io(&dir, err))?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let Some(object_id) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !is_object_id(object_id) {
                debug!(path = %path.display(), "Skipping non-object file");
                continue;
            }

            let _guard = locks.acquire(object_id, LockMode::Read)?;
            let target = layout.lfs_object_file(to, object_id);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|err| RepoError::io(parent, err))?;
            }
            fs::copy(&path, &target).map_err(|err| RepoError::io(&target, err))?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    const OID_A: &str = "aabbccddeeff00112233445566778899aabbccddeeff00112233445566778899";
    const OID_B: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn store(layout: &StorageLayout, project: ProjectId, oid: &str, content: &str) -> Result<()> {
        let file = layout.lfs_object_file(project, oid);
        fs::create_dir_all(file.parent().ok_or_else(|| anyhow::anyhow!("no parent"))?)?;
        fs::write(file, content)?;
        Ok(())
    }

    #[test]
    fn copies_all_objects_into_fanned_out_layout() -> Result<()> {
        let root = TempDir::new()?;
        let layout = StorageLayout::new(root.path());
        store(&layout, ProjectId(1), OID_A, "alpha")?;
        store(&layout, ProjectId(1), OID_B, "beta")?;
        fs::write(layout.lfs_objects_dir(ProjectId(1)).join("README"), "skip")?;

        assert_eq!(copy_lfs_objects(&layout, ProjectId(1), ProjectId(2))?, 2);
        assert_eq!(
            fs::read_to_string(layout.lfs_object_file(ProjectId(2), OID_A))?,
            "alpha"
        );
        assert_eq!(
            fs::read_to_string(layout.lfs_object_file(ProjectId(2), OID_B))?,
            "beta"
        );
        Ok(())
    }

    #[test]
    fn missing_source_copies_nothing() -> Result<()> {
        let root = TempDir::new()?;
        let layout = StorageLayout::new(root.path());
        assert_eq!(copy_lfs_objects(&layout, ProjectId(1), ProjectId(2))?, 0);
        Ok(())
    }

    #[test]
    fn shared_locks_coexist_but_exclude_writers() -> Result<()> {
        let root = TempDir::new()?;
        let locks = LfsLocks::new(root.path());

        let first = locks.acquire(OID_A, LockMode::Read)?;
        let second = locks.try_acquire(OID_A, LockMode::Read)?;
        assert_eq!(second.mode(), LockMode::Read);
        assert!(locks.try_acquire(OID_A, LockMode::Write).is_err());

        drop(first);
        drop(second);
        assert!(locks.try_acquire(OID_A, LockMode::Write).is_ok());
        Ok(())
    }

    #[test]
    fn rejects_ids_that_could_escape_lock_dir() -> Result<()> {
        let root = TempDir::new()?;
        let locks = LfsLocks::new(root.path());
        assert!(matches!(
            locks.acquire("../etc", LockMode::Write),
            Err(RepoError::InvalidObjectId(_))
        ));
        Ok(())
    }
}
