//! Persistence port consumed by the project manager.

use anyhow::Error;
use hive_core::{MilestoneId, Project, ProjectId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use time::OffsetDateTime;

/// One staged mutation.
///
/// Project rows are modelled fully; the remaining variants describe
/// bookkeeping on tables owned by other subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Change {
    /// Insert or replace a project row.
    Persist(Project),
    /// Delete a project row.
    Remove(ProjectId),
    /// Record the last activity of a project.
    #[serde(rename_all = "camelCase")]
    SetUpdateDate {
        /// Target project.
        project: ProjectId,
        /// Activity timestamp.
        #[serde(with = "time::serde::rfc3339")]
        date: OffsetDateTime,
    },
    /// Grant `role` on `project` to `user`.
    GrantAuthorization {
        /// Grantee.
        user: UserId,
        /// Target project.
        project: ProjectId,
        /// Granted role.
        role: RoleId,
    },
    /// Point issue, build and pull request numbering of `descendant` at `scope`.
    ReassignNumberScope {
        /// Project whose records are renumbered.
        descendant: ProjectId,
        /// New numbering scope.
        scope: ProjectId,
    },
    /// Forget that any project was forked from this one.
    ClearForkedFrom(ProjectId),
    /// Forget this project as source of pull requests.
    ClearPullRequestSource(ProjectId),
    /// Delete every build of this project.
    DeleteBuilds(ProjectId),
    /// Unschedule issues of `project` from milestones no longer in its hierarchy.
    ClearSchedules {
        /// Moved project.
        project: ProjectId,
        /// Milestones to unschedule from.
        milestones: Vec<MilestoneId>,
    },
}

/// Ordered list of changes committed atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    /// Empty change set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            changes: Vec::new(),
        }
    }

    /// Append a change.
    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    /// Changes in staging order.
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// Number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether nothing was staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl From<Vec<Change>> for ChangeSet {
    fn from(changes: Vec<Change>) -> Self {
        Self { changes }
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Observer run after a change set became durable.
pub trait CommitHook: Send + Sync {
    /// Called once per successful commit, on the committing thread.
    fn committed(&self, changes: &ChangeSet);
}

/// Id predicate handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdFilter {
    /// Matches only the listed ids.
    In(BTreeSet<ProjectId>),
    /// Matches everything except the listed ids.
    NotIn(BTreeSet<ProjectId>),
}

impl IdFilter {
    /// Predicate selecting `values` out of `all`, listing whichever side is smaller.
    #[must_use]
    pub fn for_many_values(values: &HashSet<ProjectId>, all: &HashSet<ProjectId>) -> Self {
        if values.len() <= all.len() / 2 {
            Self::In(values.iter().copied().collect())
        } else {
            Self::NotIn(all.difference(values).copied().collect())
        }
    }

    /// Whether `id` satisfies the predicate.
    #[must_use]
    pub fn matches(&self, id: ProjectId) -> bool {
        match self {
            Self::In(ids) => ids.contains(&id),
            Self::NotIn(ids) => !ids.contains(&id),
        }
    }
}

/// Conjunction of id predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectFilter {
    ids: Vec<IdFilter>,
}

impl ProjectFilter {
    /// Filter matching every project.
    #[must_use]
    pub const fn all() -> Self {
        Self { ids: Vec::new() }
    }

    /// Add a predicate.
    #[must_use]
    pub fn and(mut self, filter: IdFilter) -> Self {
        self.ids.push(filter);
        self
    }

    /// Predicates in this filter.
    #[must_use]
    pub fn id_filters(&self) -> &[IdFilter] {
        &self.ids
    }

    /// Whether `project` passes every predicate.
    #[must_use]
    pub fn matches(&self, project: &Project) -> bool {
        self.ids.iter().all(|filter| filter.matches(project.id))
    }
}

/// Sortable project column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    /// Full path.
    Path,
    /// Leaf name.
    Name,
    /// Last activity.
    UpdateDate,
    /// Primary key.
    Id,
}

/// Sort key with direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSort {
    /// Column.
    pub field: SortField,
    /// Descending instead of ascending.
    #[serde(default)]
    pub descending: bool,
}

impl ProjectSort {
    /// Ascending sort on `field`.
    #[must_use]
    pub const fn asc(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    /// Descending sort on `field`.
    #[must_use]
    pub const fn desc(field: SortField) -> Self {
        Self {
            field,
            descending: true,
        }
    }
}

/// User-facing project query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectQuery {
    /// Wildcard pattern the path must match.
    pub path_pattern: Option<String>,
    /// Sort keys; path ascending when empty.
    pub sorts: Vec<ProjectSort>,
}

/// Order `a` and `b` by `sorts`, falling back to path then id.
#[must_use]
pub fn compare_projects(a: &Project, b: &Project, sorts: &[ProjectSort]) -> Ordering {
    let default = [ProjectSort::asc(SortField::Path)];
    let sorts = if sorts.is_empty() { &default[..] } else { sorts };
    sorts
        .iter()
        .map(|sort| {
            let ordering = match sort.field {
                SortField::Path => a.path.cmp(&b.path),
                SortField::Name => a.name.cmp(&b.name),
                SortField::UpdateDate => a.update_date.cmp(&b.update_date),
                SortField::Id => a.id.cmp(&b.id),
            };
            if sort.descending {
                ordering.reverse()
            } else {
                ordering
            }
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| a.id.cmp(&b.id))
}

/// Transactional project storage.
pub trait ProjectStore: Send + Sync + 'static {
    /// Error type bubbled up from the backing store.
    type Error: Into<Error>;

    /// Allocate an id that was never handed out before.
    ///
    /// # Errors
    /// Returns a store-specific error when allocation fails.
    fn next_id(&self) -> Result<ProjectId, Self::Error>;

    /// Load one project row.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn get(&self, id: ProjectId) -> Result<Option<Project>, Self::Error>;

    /// Load every project row.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn list(&self) -> Result<Vec<Project>, Self::Error>;

    /// Projects directly forked from `id`.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn forks_of(&self, id: ProjectId) -> Result<Vec<ProjectId>, Self::Error>;

    /// Filtered, sorted page of projects.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn query(
        &self,
        filter: &ProjectFilter,
        sorts: &[ProjectSort],
        first: usize,
        max: usize,
    ) -> Result<Vec<Project>, Self::Error>;

    /// Number of projects passing `filter`.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn count(&self, filter: &ProjectFilter) -> Result<usize, Self::Error>;

    /// Apply `changes` atomically: either all of them become durable or none.
    ///
    /// # Errors
    /// Returns a store-specific error when the commit is rejected; nothing is applied then.
    fn commit(&self, changes: &ChangeSet) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::ProjectDraft;

    fn project(id: u64, path: &str) -> Project {
        let name = path.rsplit('/').next().unwrap_or(path).to_owned();
        ProjectDraft::new(name, None).into_project(ProjectId(id), None, path.into())
    }

    fn set(values: &[u64]) -> HashSet<ProjectId> {
        values.iter().copied().map(ProjectId).collect()
    }

    #[test]
    fn for_many_values_lists_smaller_side() {
        let all = set(&[1, 2, 3, 4, 5]);
        assert_eq!(
            IdFilter::for_many_values(&set(&[2]), &all),
            IdFilter::In(BTreeSet::from([ProjectId(2)]))
        );
        let filter = IdFilter::for_many_values(&set(&[1, 2, 3, 4]), &all);
        assert_eq!(filter, IdFilter::NotIn(BTreeSet::from([ProjectId(5)])));
        assert!(filter.matches(ProjectId(1)));
        assert!(!filter.matches(ProjectId(5)));
        assert!(!IdFilter::for_many_values(&HashSet::new(), &all).matches(ProjectId(1)));
    }

    #[test]
    fn filter_is_a_conjunction() {
        let filter = ProjectFilter::all()
            .and(IdFilter::In(BTreeSet::from([ProjectId(1), ProjectId(2)])))
            .and(IdFilter::NotIn(BTreeSet::from([ProjectId(2)])));
        assert!(filter.matches(&project(1, "a")));
        assert!(!filter.matches(&project(2, "b")));
        assert!(ProjectFilter::all().matches(&project(3, "c")));
    }

    #[test]
    fn default_sort_is_path_then_id() {
        let mut projects = vec![project(3, "b"), project(1, "a/z"), project(2, "a")];
        projects.sort_by(|a, b| compare_projects(a, b, &[]));
        let paths: Vec<_> = projects.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "a/z", "b"]);

        projects.sort_by(|a, b| compare_projects(a, b, &[ProjectSort::desc(SortField::Id)]));
        assert_eq!(projects[0].id, ProjectId(3));
    }

    #[test]
    fn change_serializes_with_type_tag() -> anyhow::Result<()> {
        let change = Change::ReassignNumberScope {
            descendant: ProjectId(4),
            scope: ProjectId(2),
        };
        let json = serde_json::to_string(&change)?;
        assert!(json.contains("\"type\":\"reassignNumberScope\""));
        assert_eq!(serde_json::from_str::<Change>(&json)?, change);
        Ok(())
    }
}
