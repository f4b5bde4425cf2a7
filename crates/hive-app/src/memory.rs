//! Embedded project store with an optional JSON snapshot.

use crate::store::{Change, ChangeSet, ProjectFilter, ProjectSort, ProjectStore, compare_projects};
use hive_core::{Project, ProjectId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Errors raised by [`MemoryStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A change referred to a project that does not exist.
    #[error("project #{0} does not exist")]
    NotFound(ProjectId),

    /// Committing would leave a project without its parent.
    #[error("project #{project} references missing parent #{parent}")]
    MissingParent {
        /// Orphaned project.
        project: ProjectId,
        /// Missing parent.
        parent: ProjectId,
    },

    /// Snapshot file could not be read or written.
    #[error("snapshot I/O error on {path}: {source}")]
    Io {
        /// Snapshot or temporary file.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// Snapshot content is not valid JSON.
    #[error("snapshot is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Role granted to a user on a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Grantee.
    pub user: UserId,
    /// Target project.
    pub project: ProjectId,
    /// Granted role.
    pub role: RoleId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    last_id: u64,
    #[serde(default)]
    projects: BTreeMap<ProjectId, Project>,
    #[serde(default)]
    grants: Vec<Grant>,
    #[serde(default)]
    ledger: Vec<Change>,
}

impl Tables {
    fn apply(&mut self, change: &Change) -> Result<(), StoreError> {
        match change {
            Change::Persist(project) => {
                self.last_id = self.last_id.max(project.id.get());
                self.projects.insert(project.id, project.clone());
            }
            Change::Remove(id) => {
                self.projects.remove(id).ok_or(StoreError::NotFound(*id))?;
                self.grants.retain(|grant| grant.project != *id);
            }
            Change::SetUpdateDate { project, date } => {
                if let Some(row) = self.projects.get_mut(project) {
                    row.update_date = *date;
                }
            }
            Change::GrantAuthorization {
                user,
                project,
                role,
            } => {
                let grant = Grant {
                    user: *user,
                    project: *project,
                    role: *role,
                };
                if !self.grants.contains(&grant) {
                    self.grants.push(grant);
                }
            }
            Change::ClearForkedFrom(id) => {
                for row in self.projects.values_mut() {
                    if row.forked_from == Some(*id) {
                        row.forked_from = None;
                    }
                }
            }
            Change::ReassignNumberScope { .. }
            | Change::ClearPullRequestSource(_)
            | Change::DeleteBuilds(_)
            | Change::ClearSchedules { .. } => self.ledger.push(change.clone()),
        }
        Ok(())
    }

    fn check_integrity(&self) -> Result<(), StoreError> {
        for project in self.projects.values() {
            let missing = project
                .parent
                .filter(|parent| !self.projects.contains_key(parent));
            if let Some(parent) = missing {
                return Err(StoreError::MissingParent {
                    project: project.id,
                    parent,
                });
            }
        }
        Ok(())
    }
}

/// Mutex-guarded tables committed all-or-nothing.
///
/// When opened with a snapshot path, every commit rewrites the snapshot
/// through a temporary file before the new state becomes visible.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    /// Store without persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by the JSON snapshot at `path`, created on first commit.
    ///
    /// # Errors
    /// Returns an error when an existing snapshot cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut tables = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|err| StoreError::io(&path, err))?;
            serde_json::from_str::<Tables>(&content)?
        } else {
            Tables::default()
        };
        let highest = tables.projects.keys().map(|id| id.get()).max().unwrap_or(0);
        tables.last_id = tables.last_id.max(highest);
        debug!(path = %path.display(), projects = tables.projects.len(), "Opened project snapshot");
        Ok(Self {
            tables: Mutex::new(tables),
            snapshot: Some(path),
        })
    }

    /// Snapshot file, if any.
    #[must_use]
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Every user grant.
    #[must_use]
    pub fn grants(&self) -> Vec<Grant> {
        self.lock().grants.clone()
    }

    /// Bookkeeping changes for tables this store does not model.
    #[must_use]
    pub fn ledger(&self) -> Vec<Change> {
        self.lock().ledger.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_snapshot(path: &Path, tables: &Tables) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|err| StoreError::io(dir, err))?;
    let mut file = NamedTempFile::new_in(dir).map_err(|err| StoreError::io(dir, err))?;
    serde_json::to_writer_pretty(&mut file, tables)?;
    file.persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;
    Ok(())
}

impl ProjectStore for MemoryStore {
    type Error = StoreError;

    fn next_id(&self) -> Result<ProjectId, StoreError> {
        let mut tables = self.lock();
        tables.last_id += 1;
        Ok(ProjectId(tables.last_id))
    }

    fn get(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        Ok(self.lock().projects.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<Project>, StoreError> {
        Ok(self.lock().projects.values().cloned().collect())
    }

    fn forks_of(&self, id: ProjectId) -> Result<Vec<ProjectId>, StoreError> {
        Ok(self
            .lock()
            .projects
            .values()
            .filter(|project| project.forked_from == Some(id))
            .map(|project| project.id)
            .collect())
    }

    fn query(
        &self,
        filter: &ProjectFilter,
        sorts: &[ProjectSort],
        first: usize,
        max: usize,
    ) -> Result<Vec<Project>, StoreError> {
        let mut matching: Vec<_> = self
            .lock()
            .projects
            .values()
            .filter(|project| filter.matches(project))
            .cloned()
            .collect();
        matching.sort_by(|a, b| compare_projects(a, b, sorts));
        Ok(matching.into_iter().skip(first).take(max).collect())
    }

    fn count(&self, filter: &ProjectFilter) -> Result<usize, StoreError> {
        Ok(self
            .lock()
            .projects
            .values()
            .filter(|project| filter.matches(project))
            .count())
    }

    fn commit(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let mut next = tables.clone();
        for change in changes {
            next.apply(change)?;
        }
        next.check_integrity()?;
        if let Some(path) = &self.snapshot {
            write_snapshot(path, &next)?;
        }
        *tables = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use hive_core::ProjectDraft;
    use tempfile::TempDir;

    fn project(id: u64, name: &str, parent: Option<u64>) -> Project {
        ProjectDraft::new(name, None).into_project(ProjectId(id), parent.map(ProjectId), name.into())
    }

    #[test]
    fn failed_commit_applies_nothing() -> Result<()> {
        let store = MemoryStore::new();
        let changes = ChangeSet::from(vec![
            Change::Persist(project(1, "a", None)),
            Change::Persist(project(2, "b", Some(99))),
        ]);
        assert!(matches!(
            store.commit(&changes),
            Err(StoreError::MissingParent { .. })
        ));
        assert!(store.list()?.is_empty());
        Ok(())
    }

    #[test]
    fn removing_unknown_project_is_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.commit(&vec![Change::Remove(ProjectId(7))].into()),
            Err(StoreError::NotFound(ProjectId(7)))
        ));
    }

    #[test]
    fn bookkeeping_lands_in_ledger_and_forks_are_cleared() -> Result<()> {
        let store = MemoryStore::new();
        let mut fork = project(2, "fork", None);
        fork.forked_from = Some(ProjectId(1));
        store.commit(&vec![Change::Persist(project(1, "a", None)), Change::Persist(fork)].into())?;
        assert_eq!(store.forks_of(ProjectId(1))?, vec![ProjectId(2)]);

        store.commit(
            &vec![
                Change::DeleteBuilds(ProjectId(1)),
                Change::ClearForkedFrom(ProjectId(1)),
                Change::Remove(ProjectId(1)),
            ]
            .into(),
        )?;
        assert!(store.forks_of(ProjectId(1))?.is_empty());
        assert_eq!(store.ledger(), vec![Change::DeleteBuilds(ProjectId(1))]);
        Ok(())
    }

    #[test]
    fn snapshot_survives_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("hive.json");
        {
            let store = MemoryStore::open(&path)?;
            let id = store.next_id()?;
            store.commit(
                &vec![
                    Change::Persist(project(id.get(), "a", None)),
                    Change::GrantAuthorization {
                        user: UserId(5),
                        project: id,
                        role: RoleId(1),
                    },
                ]
                .into(),
            )?;
        }

        let reopened = MemoryStore::open(&path)?;
        assert_eq!(reopened.list()?.len(), 1);
        assert_eq!(reopened.grants().len(), 1);
        assert_eq!(reopened.next_id()?, ProjectId(2));
        Ok(())
    }
}
