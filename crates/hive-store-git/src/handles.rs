//! Open repository handles, at most one per project.

use crate::{RepoError, Result};
use git2::Repository;
use hive_core::ProjectId;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::debug;

type Opener = dyn Fn(&Path) -> std::result::Result<Repository, git2::Error> + Send + Sync;

/// Shared handle to an open bare repository.
///
/// The handle is closed when its project is deleted or the cache shuts down;
/// afterwards every access fails with [`RepoError::Closed`].
pub struct RepositoryHandle {
    project: ProjectId,
    git_dir: PathBuf,
    repo: Mutex<Option<Repository>>,
}

impl RepositoryHandle {
    fn new(project: ProjectId, git_dir: PathBuf, repo: Repository) -> Self {
        Self {
            project,
            git_dir,
            repo: Mutex::new(Some(repo)),
        }
    }

    /// Project owning the repository.
    #[must_use]
    pub const fn project(&self) -> ProjectId {
        self.project
    }

    /// Repository directory.
    #[must_use]
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Run `f` against the open repository.
    ///
    /// # Errors
    /// Returns [`RepoError::Closed`] after [`close`](Self::close), otherwise whatever `f` returns.
    pub fn with<T>(&self, f: impl FnOnce(&Repository) -> Result<T>) -> Result<T> {
        let guard = self.lock();
        let repo = guard.as_ref().ok_or(RepoError::Closed(self.project))?;
        f(repo)
    }

    /// Release the underlying repository.
    pub fn close(&self) {
        if self.lock().take().is_some() {
            debug!(project = %self.project, "Closed repository handle");
        }
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Repository>> {
        self.repo.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryHandle")
            .field("project", &self.project)
            .field("git_dir", &self.git_dir)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Lazily opened repository handles keyed by project.
///
/// Reads of an already open handle take the map's read lock, so they never
/// wait on each other but do wait on an insert or eviction in progress; the
/// read path is not lock-free. Opening serializes on a separate mutex and
/// re-checks the map so concurrent callers for one project open it once.
pub struct RepositoryHandleCache {
    handles: RwLock<HashMap<ProjectId, Arc<RepositoryHandle>>>,
    create_lock: Mutex<()>,
    opener: Box<Opener>,
}

impl RepositoryHandleCache {
    /// Cache opening bare repositories from disk.
    #[must_use]
    pub fn new() -> Self {
        Self::with_opener(|path: &Path| Repository::open_bare(path))
    }

    /// Cache using a custom opener.
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn(&Path) -> std::result::Result<Repository, git2::Error> + Send + Sync + 'static,
    {
        Self {
            handles: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
            opener: Box::new(opener),
        }
    }

    /// Handle for `project`, opening `git_dir` on first use.
    ///
    /// # Errors
    /// Returns [`RepoError::Git`] when the repository cannot be opened.
    pub fn get(&self, project: ProjectId, git_dir: &Path) -> Result<Arc<RepositoryHandle>> {
        if let Some(handle) = self.cached(project) {
            return Ok(handle);
        }

        let _create = self
            .create_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = self.cached(project) {
            return Ok(handle);
        }

        let repo = (self.opener)(git_dir)?;
        let handle = Arc::new(RepositoryHandle::new(project, git_dir.to_path_buf(), repo));
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project, Arc::clone(&handle));
        debug!(project = %project, git_dir = %git_dir.display(), "Opened repository handle");
        Ok(handle)
    }

    /// Evict and close the handle of `project`. Returns whether one was cached.
    pub fn remove(&self, project: ProjectId) -> bool {
        let removed = self
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&project);
        let Some(handle) = removed else {
            return false;
        };
        handle.close();
        true
    }

    /// Evict and close every handle.
    pub fn close_all(&self) {
        let drained: Vec<_> = self
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in drained {
            handle.close();
        }
    }

    /// Number of open handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no handle is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, project: ProjectId) -> Option<Arc<RepositoryHandle>> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&project)
            .cloned()
    }
}

impl Default for RepositoryHandleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RepositoryHandleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryHandleCache")
            .field("open", &self.len())
            .finish_non_exhaustive()
    }
}
