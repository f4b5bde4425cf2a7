//! Create, fork, clone, move and delete.

use super::ProjectManager;
use crate::error::{LifecycleError, Result};
use crate::store::{Change, ProjectStore};
use crate::unit::UnitOfWork;
use anyhow::{Context, bail};
use hive_core::{
    MilestoneId, ObjectId, Permission, Project, ProjectDraft, ProjectEvent, ProjectId, ProjectRef,
    Subject, User, join_path, split_path, validate_name,
};
use hive_store_git::{
    branch_ref, branch_refs, copy_lfs_objects, delete_branch, delete_tag, mirror_clone, object_id,
    tag_ref, tag_refs,
};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
enum RefKind {
    Branch,
    Tag,
}

impl<S: ProjectStore> ProjectManager<S> {
    /// Create a project, creating unsaved parents first.
    ///
    /// The actor becomes owner of every created project and the repository is
    /// initialized before the commit.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Unauthorized`] when the actor may not create
    /// the project, [`LifecycleError::InvalidPath`] for bad or taken names, and
    /// storage errors.
    pub fn create(&self, actor: &User, draft: ProjectDraft) -> Result<Project> {
        let mut unit = self.begin();
        let project = self.prepare(&mut unit, actor, draft)?;
        self.register(&mut unit, actor, &project);
        self.sanitize(project.id)?;
        self.commit(unit)?;
        info!(project = %project.id, path = %project.path, "Created project");
        Ok(project)
    }

    /// Create `draft` as a fork of `source`, mirroring its repository and large objects.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Unauthorized`] when the actor cannot read the
    /// source code or create the target, and storage errors.
    pub fn fork(&self, actor: &User, source: ProjectId, draft: ProjectDraft) -> Result<Project> {
        if !self.is_permitted(Subject::User(actor), source, &Permission::READ_CODE) {
            return Err(LifecycleError::Unauthorized(format!(
                "not authorized to read code of project #{source}"
            )));
        }
        let mut unit = self.begin();
        let source = unit.load(source)?;
        let mut project = self.prepare(&mut unit, actor, draft)?;
        project.forked_from = Some(source.id);
        self.register(&mut unit, actor, &project);

        let source_dir = self.layout.git_dir(source.id);
        let target_dir = self.layout.git_dir(project.id);
        mirror_clone(&source_dir.to_string_lossy(), &target_dir)?;
        self.sanitizer.ensure_valid(&target_dir)?;
        self.dependents
            .clone_commit_info(source.id, project.id)
            .map_err(|error| LifecycleError::Dependent {
                context: "failed to copy commit info",
                error,
            })?;
        self.dependents
            .copy_avatar(source.id, project.id)
            .map_err(|error| LifecycleError::Dependent {
                context: "failed to copy avatar",
                error,
            })?;
        let lfs_objects = copy_lfs_objects(&self.layout, source.id, project.id)?;

        self.commit(unit)?;
        info!(project = %project.id, source = %source.id, lfs_objects, "Forked project");
        Ok(project)
    }

    /// Create `draft` as a mirror of the repository at `url`.
    ///
    /// After the commit, one ref-updated event per branch and tag is posted
    /// from the post-commit executor, old id zero and new id the ref's target
    /// at clone time.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Unauthorized`] when the actor may not create
    /// the project and [`LifecycleError::Repository`] when cloning fails.
    pub fn clone_from(&self, actor: &User, draft: ProjectDraft, url: &str) -> Result<Project> {
        let mut unit = self.begin();
        let project = self.prepare(&mut unit, actor, draft)?;
        self.register(&mut unit, actor, &project);

        let refs = {
            let repo = mirror_clone(url, &self.layout.git_dir(project.id))?;
            let mut refs = branch_refs(&repo)?;
            refs.extend(tag_refs(&repo)?);
            refs
        };
        self.sanitize(project.id)?;

        let id = project.id;
        let store = Arc::clone(&self.store);
        let ref_cache = Arc::clone(&self.ref_cache);
        let emitter = self.emitter();
        unit.after_commit_async("post cloned ref events", move || {
            if store.get(id).map_err(Into::<anyhow::Error>::into)?.is_none() {
                bail!("project #{id} was removed before its ref events were posted");
            }
            for info in refs {
                let new = object_id(info.target)?;
                ref_cache.put(id, info.name.clone(), Some(info.target));
                emitter.post(ProjectEvent::ref_updated(id, info.name, ObjectId::zero(), new));
            }
            Ok(())
        });

        self.commit(unit)?;
        info!(project = %project.id, url, "Cloned project");
        Ok(project)
    }

    /// Persist changes to `project`, rewriting descendant paths when its path changed.
    ///
    /// # Errors
    /// Returns [`LifecycleError::InvalidMove`] when the new parent is missing or
    /// inside the project, [`LifecycleError::InvalidPath`] for bad or taken names.
    pub fn save(&self, project: Project) -> Result<Project> {
        let mut unit = self.begin();
        let saved = self.stage_save(&mut unit, project)?;
        self.commit(unit)?;
        Ok(saved)
    }

    /// Reparent `id` under `parent` (a root when `None`).
    ///
    /// # Errors
    /// See [`save`](Self::save).
    pub fn move_project(&self, id: ProjectId, parent: Option<ProjectId>) -> Result<Project> {
        self.move_projects(&[id], parent)?
            .into_iter()
            .next()
            .ok_or_else(|| LifecycleError::not_found(id))
    }

    /// Reparent every project in `ids` under `parent` in one commit.
    ///
    /// # Errors
    /// See [`save`](Self::save); nothing is applied when any move fails.
    pub fn move_projects(&self, ids: &[ProjectId], parent: Option<ProjectId>) -> Result<Vec<Project>> {
        let mut unit = self.begin();
        let mut moved = Vec::with_capacity(ids.len());
        for id in ids {
            let mut project = unit.load(*id)?;
            project.parent = parent;
            moved.push(self.stage_save(&mut unit, project)?);
        }
        self.commit(unit)?;
        Ok(moved)
    }

    /// Delete `id` and its whole subtree, children first.
    ///
    /// # Errors
    /// Returns [`LifecycleError::InUse`] naming the usages when any deleted
    /// project is still referenced; nothing is deleted then.
    pub fn delete(&self, id: ProjectId) -> Result<()> {
        self.delete_many(&[id])
    }

    /// Delete every project in `ids` with their subtrees in one commit.
    ///
    /// Ids below another selected id are covered by that ancestor.
    ///
    /// # Errors
    /// See [`delete`](Self::delete).
    pub fn delete_many(&self, ids: &[ProjectId]) -> Result<()> {
        let mut unit = self.begin();
        let cache = self.hierarchy.snapshot();
        let independents: BTreeSet<ProjectId> = ids
            .iter()
            .copied()
            .filter(|id| {
                !ids.iter()
                    .any(|other| other != id && cache.is_self_or_ancestor_of(*other, *id))
            })
            .collect();

        let mut deleted = 0_usize;
        for root in &independents {
            unit.load(*root)?;
            for id in cache.children_first(*root) {
                self.stage_delete(&mut unit, id)?;
                deleted += 1;
            }
        }
        self.commit(unit)?;
        info!(projects = deleted, "Deleted projects");
        Ok(())
    }

    /// Delete branch `branch`, forgetting it in branch protection rules.
    ///
    /// Returns the commit the branch pointed to.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Repository`] when the branch does not exist or
    /// cannot be deleted.
    pub fn delete_branch(&self, id: ProjectId, branch: &str) -> Result<ObjectId> {
        self.delete_ref(id, branch, RefKind::Branch)
    }

    /// Delete tag `tag`, forgetting it in tag protection rules.
    ///
    /// Returns the commit the tag pointed to.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Repository`] when the tag does not exist or
    /// cannot be deleted.
    pub fn delete_tag(&self, id: ProjectId, tag: &str) -> Result<ObjectId> {
        self.delete_ref(id, tag, RefKind::Tag)
    }

    /// Resolve `path` to an existing project or a chain of drafts for its missing segments.
    ///
    /// Segments are trimmed and empty ones skipped; existing segments match
    /// case-insensitively. Implicitly created intermediate drafts have code and
    /// issue management disabled.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Unauthorized`] when `subject` may not create a
    /// missing segment and [`LifecycleError::InvalidPath`] for empty paths.
    pub fn initialize(&self, path: &str, subject: Subject<'_>) -> Result<ProjectRef> {
        let cache = self.hierarchy.snapshot();
        let mut current: Option<ProjectRef> = None;
        for name in split_path(path) {
            let existing = match &current {
                Some(ProjectRef::New(_)) => None,
                Some(ProjectRef::Existing(id)) => cache.find_child(Some(*id), name),
                None => cache.find_child(None, name),
            };
            if let Some(id) = existing {
                current = Some(ProjectRef::Existing(id));
                continue;
            }
            match &current {
                None => {
                    let allowed = subject
                        .user()
                        .is_some_and(|user| self.access.security_setting().can_create_root_projects(user));
                    if !allowed {
                        return Err(LifecycleError::Unauthorized(
                            "not authorized to create root project".into(),
                        ));
                    }
                }
                Some(ProjectRef::Existing(parent)) => {
                    if !self.is_permitted(subject, *parent, &Permission::CREATE_CHILDREN) {
                        let parent_path = cache.get(*parent).map(|f| f.path.clone()).unwrap_or_default();
                        return Err(LifecycleError::Unauthorized(format!(
                            "not authorized to create project under '{parent_path}'"
                        )));
                    }
                }
                Some(ProjectRef::New(_)) => {}
            }
            validate_name(name)?;
            current = Some(ProjectRef::New(Box::new(ProjectDraft::new(name, current.take()))));
        }

        let mut leaf = current.ok_or_else(|| LifecycleError::InvalidPath(format!("'{path}' names no project")))?;
        if let ProjectRef::New(draft) = &mut leaf {
            let mut cursor = draft.parent.as_mut();
            while let Some(ProjectRef::New(parent)) = cursor {
                parent.code_management = false;
                parent.issue_management = false;
                cursor = parent.parent.as_mut();
            }
        }
        Ok(leaf)
    }

    /// Validate `draft`, create unsaved parents, and build the row without staging it.
    fn prepare(&self, unit: &mut UnitOfWork<'_, S>, actor: &User, mut draft: ProjectDraft) -> Result<Project> {
        validate_name(&draft.name)?;
        let parent = match draft.parent.take() {
            None => {
                if !self.access.security_setting().can_create_root_projects(actor) {
                    return Err(LifecycleError::Unauthorized(
                        "not authorized to create root project".into(),
                    ));
                }
                None
            }
            Some(ProjectRef::Existing(id)) => {
                let parent = unit.load(id)?;
                if !self.is_permitted(Subject::User(actor), id, &Permission::CREATE_CHILDREN) {
                    return Err(LifecycleError::Unauthorized(format!(
                        "not authorized to create project under '{}'",
                        parent.path
                    )));
                }
                Some(parent)
            }
            Some(ProjectRef::New(parent_draft)) => {
                let parent = self.prepare(unit, actor, *parent_draft)?;
                self.register(unit, actor, &parent);
                self.sanitize(parent.id)?;
                Some(parent)
            }
        };
        let parent_id = parent.as_ref().map(|parent| parent.id);
        self.ensure_name_free(unit, parent_id, &draft.name, None)?;
        let path = join_path(parent.as_ref().map(|parent| parent.path.as_str()), &draft.name);
        let id = unit.next_id()?;
        Ok(draft.into_project(id, parent_id, path))
    }

    /// Stage a new row, the owner grant and the created event.
    fn register(&self, unit: &mut UnitOfWork<'_, S>, actor: &User, project: &Project) {
        unit.persist(project.clone());
        unit.stage(Change::GrantAuthorization {
            user: actor.id,
            project: project.id,
            role: self.access.owner_role(),
        });
        let emitter = self.emitter();
        let id = project.id;
        unit.after_commit(move || emitter.post(ProjectEvent::created(id)));
    }

    fn ensure_name_free(
        &self,
        unit: &UnitOfWork<'_, S>,
        parent: Option<ProjectId>,
        name: &str,
        exclude: Option<ProjectId>,
    ) -> Result<()> {
        let lower = name.to_lowercase();
        let clashes = |project: &Project| {
            Some(project.id) != exclude
                && project.parent == parent
                && project.name.to_lowercase() == lower
        };
        let taken = || LifecycleError::InvalidPath(format!("a project named '{name}' already exists there"));
        if unit.staged_projects().any(&clashes) {
            return Err(taken());
        }
        let cached = self.hierarchy.read().find_child(parent, name);
        if let Some(id) = cached
            && let Some(project) = unit.get(id)?
            && clashes(&project)
        {
            return Err(taken());
        }
        Ok(())
    }

    fn stage_save(&self, unit: &mut UnitOfWork<'_, S>, mut project: Project) -> Result<Project> {
        validate_name(&project.name)?;
        let old_path = unit.load(project.id)?.path;
        let parent_path = match project.parent {
            Some(parent) => {
                ensure_acyclic(unit, project.id, parent)?;
                let parent = unit
                    .get(parent)?
                    .ok_or_else(|| LifecycleError::InvalidMove(format!("parent #{parent} does not exist")))?;
                Some(parent.path)
            }
            None => None,
        };
        self.ensure_name_free(unit, project.parent, &project.name, Some(project.id))?;
        project.path = join_path(parent_path.as_deref(), &project.name);
        unit.persist(project.clone());
        if project.path != old_path {
            self.relocate(unit, &project, &old_path)?;
        }
        Ok(project)
    }

    /// Rewrite descendant paths and stage follow-up work after `project` changed path.
    fn relocate(&self, unit: &mut UnitOfWork<'_, S>, project: &Project, old_path: &str) -> Result<()> {
        let (tree, subtree) = {
            let cache = self.hierarchy.read();
            (cache.descendants(project.id), cache.subtree_ids(project.id))
        };
        for id in &tree {
            let mut descendant = unit.load(*id)?;
            let parent_path = match descendant.parent {
                Some(parent) => Some(unit.load(parent)?.path),
                None => None,
            };
            let path = join_path(parent_path.as_deref(), &descendant.name);
            if path != descendant.path {
                descendant.path = path;
                unit.persist(descendant);
            }
        }

        let mut chain = HashSet::from([project.id]);
        let mut cursor = project.parent;
        while let Some(current) = cursor {
            if !chain.insert(current) {
                break;
            }
            cursor = unit.get(current)?.and_then(|ancestor| ancestor.parent);
        }
        let stale: Vec<MilestoneId> = self
            .dependents
            .used_milestones(project.id)
            .into_iter()
            .filter(|milestone| !subtree.contains(&milestone.project) && !chain.contains(&milestone.project))
            .map(|milestone| milestone.id)
            .collect();
        if !stale.is_empty() {
            unit.stage(Change::ClearSchedules {
                project: project.id,
                milestones: stale,
            });
        }

        let dependents = Arc::clone(&self.dependents);
        let old = old_path.to_owned();
        let new = project.path.clone();
        let mut scheduled = vec![project.id];
        scheduled.extend(tree);
        debug!(project = %project.id, old = %old, new = %new, descendants = scheduled.len() - 1, "Relocating project");
        unit.after_commit(move || {
            dependents.on_move(&old, &new);
            for id in scheduled {
                dependents.schedule_jobs(id);
            }
        });
        Ok(())
    }

    fn stage_delete(&self, unit: &mut UnitOfWork<'_, S>, id: ProjectId) -> Result<()> {
        let project = unit.load(id)?;
        self.dependents
            .usages_on_delete(&project.path)
            .check_in_use(&format!("Project '{}'", project.path))?;

        for fork in unit.forks_of(id)? {
            for descendant in fork_tree(unit, fork)? {
                unit.stage(Change::ReassignNumberScope {
                    descendant,
                    scope: fork,
                });
            }
        }
        unit.stage(Change::ClearForkedFrom(id));
        unit.stage(Change::ClearPullRequestSource(id));
        unit.stage(Change::DeleteBuilds(id));
        unit.remove(id);

        let handles = Arc::clone(&self.handles);
        let ref_cache = Arc::clone(&self.ref_cache);
        unit.after_commit(move || {
            handles.remove(id);
            ref_cache.invalidate_project(id);
        });
        let dir = self.layout.project_dir(id);
        unit.after_commit_async("remove project directory", move || {
            if dir.exists() {
                fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
            }
            Ok(())
        });
        Ok(())
    }

    fn delete_ref(&self, id: ProjectId, name: &str, kind: RefKind) -> Result<ObjectId> {
        let mut unit = self.begin();
        let mut project = unit.load(id)?;
        let protections = match kind {
            RefKind::Branch => &mut project.branch_protections,
            RefKind::Tag => &mut project.tag_protections,
        };
        let before = protections.clone();
        protections.retain_mut(|rule| rule.forget(name));
        if *protections != before {
            unit.persist(project.clone());
        }

        let ref_name = match kind {
            RefKind::Branch => branch_ref(name),
            RefKind::Tag => tag_ref(name),
        };
        let handle = self.repository(id)?;
        let target = handle.with(|repo| match kind {
            RefKind::Branch => delete_branch(repo, name),
            RefKind::Tag => delete_tag(repo, name),
        })?;
        let old = object_id(target)?;

        let ref_cache = Arc::clone(&self.ref_cache);
        let cached_ref = ref_name.clone();
        unit.after_commit(move || ref_cache.put(id, cached_ref, None));
        let store = Arc::clone(&self.store);
        let emitter = self.emitter();
        let previous = old.clone();
        unit.after_commit_async("post deleted ref event", move || {
            if store.get(id).map_err(Into::<anyhow::Error>::into)?.is_none() {
                bail!("project #{id} was removed before its ref event was posted");
            }
            emitter.post(ProjectEvent::ref_updated(id, ref_name, previous, ObjectId::zero()));
            Ok(())
        });

        self.commit(unit)?;
        info!(project = %id, ?kind, name, "Deleted ref");
        Ok(old)
    }
}

/// Reject moving `id` below itself.
fn ensure_acyclic<S: ProjectStore>(unit: &UnitOfWork<'_, S>, id: ProjectId, parent: ProjectId) -> Result<()> {
    let mut seen = HashSet::new();
    let mut cursor = Some(parent);
    while let Some(current) = cursor {
        if current == id {
            return Err(LifecycleError::InvalidMove(format!(
                "project #{id} cannot be moved under itself or its descendants"
            )));
        }
        if !seen.insert(current) {
            break;
        }
        cursor = unit.get(current)?.and_then(|ancestor| ancestor.parent);
    }
    Ok(())
}

/// `fork` and every project transitively forked from it.
fn fork_tree<S: ProjectStore>(unit: &UnitOfWork<'_, S>, fork: ProjectId) -> Result<Vec<ProjectId>> {
    let mut tree = Vec::new();
    let mut seen = HashSet::new();
    let mut pending = vec![fork];
    while let Some(current) = pending.pop() {
        if !seen.insert(current) {
            continue;
        }
        tree.push(current);
        pending.extend(unit.forks_of(current)?);
    }
    Ok(tree)
}
