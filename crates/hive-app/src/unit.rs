//! Staged changes for one operation.

use crate::error::{LifecycleError, Result};
use crate::store::{Change, ChangeSet, ProjectStore};
use hive_core::{Project, ProjectId};
use std::collections::HashMap;
use std::fmt;
use std::sync::MutexGuard;

/// Callback run on the committing thread once the store accepted the changes.
pub type AfterCommit = Box<dyn FnOnce() + Send>;

/// Callback run on the post-commit executor; failures are only logged.
pub type AsyncAfterCommit = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Changes and callbacks collected by one operation.
///
/// Reads through the unit see staged rows first. Dropping it without
/// committing discards everything. A unit begun by the manager holds the
/// mutation lock until its commit hooks and synchronous callbacks ran.
pub struct UnitOfWork<'a, S: ?Sized> {
    store: &'a S,
    guard: Option<MutexGuard<'a, ()>>,
    changes: ChangeSet,
    staged: HashMap<ProjectId, Option<Project>>,
    after_commit: Vec<AfterCommit>,
    after_commit_async: Vec<(&'static str, AsyncAfterCommit)>,
}

impl<'a, S> UnitOfWork<'a, S>
where
    S: ProjectStore + ?Sized,
{
    /// Begin staging against `store`.
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            guard: None,
            changes: ChangeSet::new(),
            staged: HashMap::new(),
            after_commit: Vec::new(),
            after_commit_async: Vec::new(),
        }
    }

    /// Begin staging against `store` while holding `guard`.
    pub(crate) fn guarded(store: &'a S, guard: MutexGuard<'a, ()>) -> Self {
        let mut unit = Self::new(store);
        unit.guard = Some(guard);
        unit
    }

    /// Project row as it will look after commit.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] when the store read fails.
    pub fn get(&self, id: ProjectId) -> Result<Option<Project>> {
        if let Some(staged) = self.staged.get(&id) {
            return Ok(staged.clone());
        }
        self.store.get(id).map_err(LifecycleError::store)
    }

    /// Like [`get`](Self::get) but fails when the project does not exist.
    ///
    /// # Errors
    /// Returns [`LifecycleError::NotFound`] for unknown or removed projects.
    pub fn load(&self, id: ProjectId) -> Result<Project> {
        self.get(id)?.ok_or_else(|| LifecycleError::not_found(id))
    }

    /// Fresh project id.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] when allocation fails.
    pub fn next_id(&self) -> Result<ProjectId> {
        self.store.next_id().map_err(LifecycleError::store)
    }

    /// Projects directly forked from `id`.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] when the store read fails.
    pub fn forks_of(&self, id: ProjectId) -> Result<Vec<ProjectId>> {
        let forks = self.store.forks_of(id).map_err(LifecycleError::store)?;
        Ok(forks
            .into_iter()
            .filter(|fork| !matches!(self.staged.get(fork), Some(None)))
            .collect())
    }

    /// Rows persisted so far by this unit.
    pub fn staged_projects(&self) -> impl Iterator<Item = &Project> {
        self.staged.values().flatten()
    }

    /// Stage an insert or update of `project`.
    pub fn persist(&mut self, project: Project) {
        self.staged.insert(project.id, Some(project.clone()));
        self.changes.push(Change::Persist(project));
    }

    /// Stage deletion of `id`.
    pub fn remove(&mut self, id: ProjectId) {
        self.staged.insert(id, None);
        self.changes.push(Change::Remove(id));
    }

    /// Stage a bookkeeping change.
    pub fn stage(&mut self, change: Change) {
        match change {
            Change::Persist(project) => self.persist(project),
            Change::Remove(id) => self.remove(id),
            other => self.changes.push(other),
        }
    }

    /// Run `callback` after a successful commit.
    pub fn after_commit(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.after_commit.push(Box::new(callback));
    }

    /// Run `task` on the post-commit executor after a successful commit.
    pub fn after_commit_async(
        &mut self,
        label: &'static str,
        task: impl FnOnce() -> anyhow::Result<()> + Send + 'static,
    ) {
        self.after_commit_async.push((label, Box::new(task)));
    }

    /// Changes staged so far.
    #[must_use]
    pub const fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub(crate) fn into_parts(self) -> UnitParts<'a> {
        UnitParts {
            guard: self.guard,
            changes: self.changes,
            after_commit: self.after_commit,
            after_commit_async: self.after_commit_async,
        }
    }
}

/// A unit taken apart for committing.
pub(crate) struct UnitParts<'a> {
    pub guard: Option<MutexGuard<'a, ()>>,
    pub changes: ChangeSet,
    pub after_commit: Vec<AfterCommit>,
    pub after_commit_async: Vec<(&'static str, AsyncAfterCommit)>,
}

impl<S: ?Sized> fmt::Debug for UnitOfWork<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("changes", &self.changes.len())
            .field("after_commit", &self.after_commit.len())
            .field("after_commit_async", &self.after_commit_async.len())
            .field("guarded", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use hive_core::ProjectDraft;

    fn root(id: u64, name: &str) -> Project {
        ProjectDraft::new(name, None).into_project(ProjectId(id), None, name.into())
    }

    #[test]
    fn reads_see_staged_rows_before_commit() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.commit(&vec![Change::Persist(root(1, "a"))].into())?;

        let mut unit = UnitOfWork::new(&store);
        let mut renamed = unit.load(ProjectId(1))?;
        renamed.name = "b".into();
        unit.persist(renamed);
        unit.persist(root(2, "c"));
        unit.remove(ProjectId(2));

        assert_eq!(unit.load(ProjectId(1))?.name, "b");
        assert!(unit.get(ProjectId(2))?.is_none());
        assert_eq!(store.get(ProjectId(1))?.map(|p| p.name), Some("a".into()));
        assert_eq!(unit.changes().len(), 3);
        Ok(())
    }

    #[test]
    fn dropping_the_unit_discards_everything() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        {
            let mut unit = UnitOfWork::new(&store);
            unit.persist(root(1, "a"));
            unit.after_commit(|| panic!("must not run"));
        }
        assert!(store.list()?.is_empty());
        Ok(())
    }
}
