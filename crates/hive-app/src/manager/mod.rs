//! Coordinating service owning the hierarchy cache and repository handles.
//!
//! Every mutation goes through a [`UnitOfWork`]: changes are staged, the store
//! commits them, and only then do commit hooks update the cache and deferred
//! callbacks fire. Mutations are serialized from [`ProjectManager::begin`]
//! until their commit hooks ran, so checks made while staging still hold at
//! commit and the cache sees commits in store order. Queries read the cache
//! under its shared lock and join against the store for full rows.

mod lifecycle;

use crate::access::AccessModel;
use crate::coalescer::UpdateDateCoalescer;
use crate::config::ServerConfig;
use crate::dependents::{EventSink, NoDependents, ProjectDependents, TracingEventSink};
use crate::error::{LifecycleError, Result};
use crate::hierarchy::{HierarchyCache, SharedHierarchy};
use crate::permission::PermissionResolver;
use crate::post_commit::PostCommitExecutor;
use crate::schedule::{PeriodicTask, TaskId, TaskScheduler};
use crate::store::{
    Change, CommitHook, IdFilter, ProjectFilter, ProjectQuery, ProjectSort, ProjectStore,
};
use crate::unit::UnitOfWork;
use anyhow::Context;
use hive_core::{
    Permission, Project, ProjectEvent, ProjectFacade, ProjectId, Subject, User,
};
use hive_hooks::HookInstaller;
use hive_store_git::{
    RefCache, RepositoryHandle, RepositoryHandleCache, RepositorySanitizer, SanitizeReport,
    StorageLayout,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default time between two update-date flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Posts events and records the activity they carry.
#[derive(Clone)]
struct Emitter {
    sink: Arc<dyn EventSink>,
    coalescer: Arc<UpdateDateCoalescer>,
}

impl Emitter {
    fn post(&self, event: ProjectEvent) {
        self.coalescer.touch(event.project, event.ts);
        self.sink.post(event);
    }
}

/// Project hierarchy cache plus repository lifecycle.
pub struct ProjectManager<S> {
    store: Arc<S>,
    hierarchy: Arc<SharedHierarchy>,
    commit_hooks: Vec<Arc<dyn CommitHook>>,
    layout: StorageLayout,
    handles: Arc<RepositoryHandleCache>,
    sanitizer: RepositorySanitizer,
    ref_cache: Arc<RefCache>,
    access: Arc<dyn AccessModel>,
    dependents: Arc<dyn ProjectDependents>,
    events: Arc<dyn EventSink>,
    executor: PostCommitExecutor,
    coalescer: Arc<UpdateDateCoalescer>,
    flush_interval: Duration,
    flush_task: Mutex<Option<TaskId>>,
    mutations: Mutex<()>,
}

impl<S: ProjectStore> ProjectManager<S> {
    /// Manager over `store` with an empty cache; call [`start`](Self::start) to populate it.
    #[must_use]
    pub fn new(
        store: S,
        layout: StorageLayout,
        sanitizer: RepositorySanitizer,
        access: Arc<dyn AccessModel>,
    ) -> Self {
        let hierarchy = Arc::new(SharedHierarchy::default());
        Self {
            store: Arc::new(store),
            commit_hooks: vec![Arc::clone(&hierarchy) as Arc<dyn CommitHook>],
            hierarchy,
            layout,
            handles: Arc::new(RepositoryHandleCache::new()),
            sanitizer,
            ref_cache: Arc::new(RefCache::default()),
            access,
            dependents: Arc::new(NoDependents),
            events: Arc::new(TracingEventSink),
            executor: PostCommitExecutor::current(),
            coalescer: Arc::new(UpdateDateCoalescer::default()),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_task: Mutex::new(None),
            mutations: Mutex::new(()),
        }
    }

    /// Manager wired from `config`.
    ///
    /// # Errors
    /// Returns an error when the hook or role configuration is unusable.
    pub fn from_config(store: S, config: &ServerConfig) -> anyhow::Result<Self> {
        let hooks = HookInstaller::new(config.hooks.clone()).context("invalid [hooks] configuration")?;
        let access = config.access_model().context("invalid role configuration")?;
        Ok(Self::new(store, config.layout(), RepositorySanitizer::new(hooks), Arc::new(access))
            .with_coalescer(config.coalescer.threshold(), config.coalescer.interval()))
    }

    /// Replace the dependent subsystems.
    #[must_use]
    pub fn with_dependents(mut self, dependents: Arc<dyn ProjectDependents>) -> Self {
        self.dependents = dependents;
        self
    }

    /// Replace the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replace the post-commit executor.
    #[must_use]
    pub fn with_executor(mut self, executor: PostCommitExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Flush activity older than `threshold` every `interval`.
    #[must_use]
    pub fn with_coalescer(mut self, threshold: Duration, interval: Duration) -> Self {
        self.coalescer = Arc::new(UpdateDateCoalescer::new(threshold));
        self.flush_interval = interval;
        self
    }

    /// Backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// On-disk layout.
    #[must_use]
    pub const fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Live hierarchy cache.
    #[must_use]
    pub fn hierarchy(&self) -> &SharedHierarchy {
        &self.hierarchy
    }

    /// Open repository handles.
    #[must_use]
    pub fn handles(&self) -> &RepositoryHandleCache {
        &self.handles
    }

    /// Cached ref targets.
    #[must_use]
    pub fn ref_cache(&self) -> &RefCache {
        &self.ref_cache
    }

    /// Pending update dates.
    #[must_use]
    pub fn coalescer(&self) -> &UpdateDateCoalescer {
        &self.coalescer
    }

    /// Executor running deferred work.
    #[must_use]
    pub const fn executor(&self) -> &PostCommitExecutor {
        &self.executor
    }

    /// Start staging an operation, waiting for any other mutation to finish.
    ///
    /// The returned unit holds the mutation lock until it is committed or dropped.
    #[must_use]
    pub fn begin(&self) -> UnitOfWork<'_, S> {
        UnitOfWork::guarded(self.store.as_ref(), self.lock_mutations())
    }

    fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit `unit`, then run commit hooks and its deferred callbacks.
    ///
    /// Commit hooks and synchronous callbacks run before the mutation lock is
    /// released; asynchronous callbacks are submitted after.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] when the store rejects the changes; no
    /// hook or callback runs then.
    pub fn commit(&self, unit: UnitOfWork<'_, S>) -> Result<()> {
        let parts = unit.into_parts();
        if !parts.changes.is_empty() {
            self.store.commit(&parts.changes).map_err(LifecycleError::store)?;
            for hook in &self.commit_hooks {
                hook.committed(&parts.changes);
            }
        }
        for callback in parts.after_commit {
            callback();
        }
        drop(parts.guard);
        for (label, task) in parts.after_commit_async {
            self.executor.submit(label, task);
        }
        Ok(())
    }

    fn emitter(&self) -> Emitter {
        Emitter {
            sink: Arc::clone(&self.events),
            coalescer: Arc::clone(&self.coalescer),
        }
    }

    /// Load a project row.
    ///
    /// # Errors
    /// Returns [`LifecycleError::NotFound`] for unknown ids.
    pub fn load(&self, id: ProjectId) -> Result<Project> {
        self.get(id)?.ok_or_else(|| LifecycleError::not_found(id))
    }

    /// Project row, if it exists.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] when the read fails.
    pub fn get(&self, id: ProjectId) -> Result<Option<Project>> {
        self.store.get(id).map_err(LifecycleError::store)
    }

    /// Project at exactly `path`.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] when the read fails.
    pub fn find_by_path(&self, path: &str) -> Result<Option<Project>> {
        let id = self.hierarchy.read().find_id(path);
        id.map(|id| self.load(id)).transpose()
    }

    /// Child of `parent` (roots when `None`) named `name`, ignoring case.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] when the read fails.
    pub fn find(&self, parent: Option<ProjectId>, name: &str) -> Result<Option<Project>> {
        let id = self.hierarchy.read().find_child(parent, name);
        id.map(|id| self.load(id)).transpose()
    }

    /// Project using `name` as service desk alias.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] when the read fails.
    pub fn find_by_service_desk_name(&self, name: &str) -> Result<Option<Project>> {
        let id = self.hierarchy.read().find_by_service_desk_name(name);
        id.map(|id| self.load(id)).transpose()
    }

    /// Cached facade of `id`.
    #[must_use]
    pub fn facade(&self, id: ProjectId) -> Option<ProjectFacade> {
        self.hierarchy.read().get(id).cloned()
    }

    /// Every cached project id.
    #[must_use]
    pub fn ids(&self) -> HashSet<ProjectId> {
        self.hierarchy.read().ids()
    }

    /// `id` and all its descendants.
    #[must_use]
    pub fn subtree_ids(&self, id: ProjectId) -> HashSet<ProjectId> {
        self.hierarchy.read().subtree_ids(id)
    }

    /// Direct children of `parent` (roots when `None`) ordered by name.
    #[must_use]
    pub fn children(&self, parent: Option<ProjectId>) -> Vec<ProjectFacade> {
        self.hierarchy.read().children(parent)
    }

    /// Independent copy of the cache.
    #[must_use]
    pub fn clone_cache(&self) -> HierarchyCache {
        self.hierarchy.snapshot()
    }

    /// Store predicate selecting projects whose path matches `pattern`.
    #[must_use]
    pub fn path_match_filter(&self, pattern: &str) -> IdFilter {
        let cache = self.hierarchy.read();
        IdFilter::for_many_values(&cache.matching_ids(pattern), &cache.ids())
    }

    /// Ids of projects `subject` holds `permission` on.
    #[must_use]
    pub fn permitted_ids(&self, subject: Subject<'_>, permission: &Permission) -> HashSet<ProjectId> {
        let cache = self.hierarchy.snapshot();
        PermissionResolver::new(self.access.as_ref()).permitted_ids(&cache, subject, permission)
    }

    /// Whether `subject` holds `permission` on `project`.
    #[must_use]
    pub fn is_permitted(&self, subject: Subject<'_>, project: ProjectId, permission: &Permission) -> bool {
        let cache = self.hierarchy.read();
        PermissionResolver::new(self.access.as_ref()).is_permitted(&cache, subject, project, permission)
    }

    /// Rows of every project `subject` holds `permission` on, by path.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] when the read fails.
    pub fn permitted_projects(&self, subject: Subject<'_>, permission: &Permission) -> Result<Vec<Project>> {
        let permitted = self.permitted_ids(subject, permission);
        if permitted.is_empty() {
            return Ok(Vec::new());
        }
        let filter = ProjectFilter::all().and(IdFilter::In(permitted.into_iter().collect()));
        self.store
            .query(&filter, &[], 0, usize::MAX)
            .map_err(LifecycleError::store)
    }

    /// Page of projects visible to `subject` and matching `query`.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] when the read fails.
    pub fn query(
        &self,
        subject: Subject<'_>,
        query: &ProjectQuery,
        first: usize,
        max: usize,
    ) -> Result<Vec<Project>> {
        let filter = self.visible_filter(subject, query.path_pattern.as_deref());
        let sorts: &[ProjectSort] = &query.sorts;
        self.store
            .query(&filter, sorts, first, max)
            .map_err(LifecycleError::store)
    }

    /// Number of projects visible to `subject` whose path matches `path_pattern`.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] when the read fails.
    pub fn count(&self, subject: Subject<'_>, path_pattern: Option<&str>) -> Result<usize> {
        let filter = self.visible_filter(subject, path_pattern);
        self.store.count(&filter).map_err(LifecycleError::store)
    }

    fn visible_filter(&self, subject: Subject<'_>, path_pattern: Option<&str>) -> ProjectFilter {
        let cache = self.hierarchy.snapshot();
        let all = cache.ids();
        let mut filter = ProjectFilter::all();
        if !subject.user().is_some_and(User::is_administrator) {
            let permitted = PermissionResolver::new(self.access.as_ref()).permitted_ids(
                &cache,
                subject,
                &Permission::ACCESS_PROJECT,
            );
            filter = filter.and(IdFilter::for_many_values(&permitted, &all));
        }
        if let Some(pattern) = path_pattern {
            filter = filter.and(IdFilter::for_many_values(&cache.matching_ids(pattern), &all));
        }
        filter
    }

    /// Bare repository directory of `id`.
    #[must_use]
    pub fn git_dir(&self, id: ProjectId) -> PathBuf {
        self.layout.git_dir(id)
    }

    /// Shared handle on the repository of `id`, opened on first use.
    ///
    /// # Errors
    /// Returns [`LifecycleError::NotFound`] for unknown projects and
    /// [`LifecycleError::Repository`] when the repository cannot be opened.
    pub fn repository(&self, id: ProjectId) -> Result<Arc<RepositoryHandle>> {
        if !self.hierarchy.read().contains(id) {
            return Err(LifecycleError::not_found(id));
        }
        Ok(self.handles.get(id, &self.layout.git_dir(id))?)
    }

    /// Repair the repository of `id`.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Repository`] when repair fails.
    pub fn sanitize(&self, id: ProjectId) -> Result<SanitizeReport> {
        Ok(self.sanitizer.ensure_valid(&self.layout.git_dir(id))?)
    }

    /// Record activity carried by `event`.
    pub fn on_event(&self, event: &ProjectEvent) {
        self.coalescer.touch(event.project, event.ts);
    }

    /// Write every pending update date that reached the threshold at `now`.
    ///
    /// Returns the number of rows written. On failure the updates stay pending.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Store`] when the commit fails.
    pub fn flush_update_dates(&self, now: Instant) -> Result<usize> {
        let due = self.coalescer.take_due(now);
        if due.is_empty() {
            return Ok(0);
        }
        let mut unit = self.begin();
        {
            let cache = self.hierarchy.read();
            for update in due.iter().filter(|update| cache.contains(update.project)) {
                unit.stage(Change::SetUpdateDate {
                    project: update.project,
                    date: update.date,
                });
            }
        }
        let written = unit.changes().len();
        if let Err(err) = self.commit(unit) {
            self.coalescer.restore(due);
            return Err(err);
        }
        debug!(projects = written, "Flushed project update dates");
        Ok(written)
    }

    /// Rebuild the cache from the store, correcting stale paths, and repair every repository.
    ///
    /// Returns the number of corrected paths.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read or written, or a repository cannot be repaired.
    pub fn rebuild(&self) -> Result<usize> {
        info!("Checking projects");
        let guard = self.lock_mutations();
        let projects = self.store.list().map_err(LifecycleError::store)?;
        let by_id: HashMap<ProjectId, &Project> = projects.iter().map(|p| (p.id, p)).collect();

        let mut unit = UnitOfWork::new(self.store.as_ref());
        let mut facades = Vec::with_capacity(projects.len());
        for project in &projects {
            match computed_path(&by_id, project.id) {
                Some(path) if path != project.path => {
                    warn!(project = %project.id, stored = %project.path, computed = %path, "Correcting stale project path");
                    let mut corrected = project.clone();
                    corrected.path = path;
                    facades.push(corrected.facade());
                    unit.persist(corrected);
                }
                Some(_) => facades.push(project.facade()),
                None => {
                    warn!(project = %project.id, path = %project.path, "Project ancestry is broken, keeping stored path");
                    facades.push(project.facade());
                }
            }
        }
        let corrected = unit.changes().len();
        self.commit(unit)?;
        self.hierarchy.replace(HierarchyCache::from_facades(facades));
        drop(guard);

        for project in &projects {
            let report = self.sanitize(project.id)?;
            if !report.is_clean() {
                debug!(project = %project.id, ?report, "Repaired repository");
            }
        }
        info!(projects = projects.len(), corrected, "Project cache rebuilt");
        Ok(corrected)
    }

    /// Rebuild the cache and schedule the update-date flush on `scheduler`.
    ///
    /// # Errors
    /// Propagates failures of [`rebuild`](Self::rebuild).
    pub fn start(self: &Arc<Self>, scheduler: &TaskScheduler) -> Result<()> {
        self.rebuild()?;
        let id = scheduler.schedule(Arc::clone(self) as Arc<dyn PeriodicTask>);
        *self.flush_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
        Ok(())
    }

    /// Unschedule the flush, finish deferred work, write pending dates and close handles.
    pub async fn stop(&self, scheduler: &TaskScheduler) {
        let task = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = task {
            scheduler.unschedule(id);
        }
        self.executor.drain().await;

        let now = Instant::now();
        let horizon = now.checked_add(self.coalescer.threshold()).unwrap_or(now);
        if let Err(err) = self.flush_update_dates(horizon) {
            warn!(error = %err, "Failed to flush update dates on shutdown");
        }
        self.handles.close_all();
        info!("Project manager stopped");
    }
}

/// Path derived from the names of `id` and its ancestors; `None` when the chain is broken.
fn computed_path(projects: &HashMap<ProjectId, &Project>, id: ProjectId) -> Option<String> {
    let mut names = Vec::new();
    let mut cursor = Some(id);
    while let Some(current) = cursor {
        let project = projects.get(&current)?;
        if names.len() > projects.len() {
            return None;
        }
        names.push(project.name.as_str());
        cursor = project.parent;
    }
    names.reverse();
    Some(names.join("/"))
}

impl<S: ProjectStore> PeriodicTask for ProjectManager<S> {
    fn name(&self) -> &'static str {
        "project-update-dates"
    }

    fn execute(&self) -> anyhow::Result<()> {
        self.flush_update_dates(Instant::now())?;
        Ok(())
    }

    fn schedule(&self) -> Duration {
        self.flush_interval
    }
}

impl<S> fmt::Debug for ProjectManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectManager")
            .field("layout", &self.layout)
            .field("handles", &self.handles)
            .field("executor", &self.executor)
            .field("flush_interval", &self.flush_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::testing::{fixture, owner};
    use hive_core::{ProjectDraft, ProjectRef};
    use time::OffsetDateTime;

    #[test]
    fn rebuild_corrects_stale_paths_and_initializes_repositories() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let root = ProjectDraft::new("a", None).into_project(ProjectId(1), None, "a".into());
        let child = ProjectDraft::new("b", Some(ProjectRef::Existing(ProjectId(1))))
            .into_project(ProjectId(2), Some(ProjectId(1)), "old/b".into());
        store.commit(&vec![Change::Persist(root), Change::Persist(child)].into())?;

        let (_dir, manager) = fixture(store)?;
        assert_eq!(manager.rebuild()?, 1);
        assert_eq!(manager.hierarchy().read().find_id("a/b"), Some(ProjectId(2)));
        assert_eq!(manager.load(ProjectId(2))?.path, "a/b");
        assert!(manager.git_dir(ProjectId(2)).join("HEAD").is_file());
        assert_eq!(manager.rebuild()?, 0);
        Ok(())
    }

    #[test]
    fn flush_writes_due_dates_once() -> anyhow::Result<()> {
        let (_dir, manager) = fixture(MemoryStore::new())?;
        let project = manager.create(&owner(), ProjectDraft::new("a", None))?;
        let date = OffsetDateTime::UNIX_EPOCH;
        let start = Instant::now();
        manager.coalescer().touch_at(project.id, date, start);

        assert_eq!(manager.flush_update_dates(start)?, 0);
        assert_eq!(manager.flush_update_dates(start + Duration::from_secs(61))?, 1);
        assert_eq!(manager.load(project.id)?.update_date, date);
        assert_eq!(manager.coalescer().pending(), 0);
        Ok(())
    }

    #[test]
    fn repository_handles_are_shared_and_unknown_projects_rejected() -> anyhow::Result<()> {
        let (_dir, manager) = fixture(MemoryStore::new())?;
        let project = manager.create(&owner(), ProjectDraft::new("a", None))?;
        let first = manager.repository(project.id)?;
        let second = manager.repository(project.id)?;
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(
            manager.repository(ProjectId(99)),
            Err(LifecycleError::NotFound(_))
        ));
        Ok(())
    }
}
