//! Project hierarchy cache and repository lifecycle for hive.
//!
//! This crate keeps an in-memory projection of every project, answers path and
//! permission queries from it, and coordinates create, fork, clone, move and
//! delete with the persistent store and the bare repositories on disk.

pub mod access;
pub mod coalescer;
pub mod config;
pub mod dependents;
pub mod error;
pub mod hierarchy;
pub mod manager;
pub mod memory;
pub mod permission;
pub mod post_commit;
pub mod schedule;
pub mod store;
pub mod unit;

// Re-exports for convenience
pub use access::{AccessModel, RoleDefinition, StaticAccessModel};
pub use coalescer::{DueUpdate, UpdateDateCoalescer};
pub use config::ServerConfig;
pub use dependents::{
    EventSink, NoDependents, ProjectDependents, RecordingEventSink, TracingEventSink, UsedMilestone,
};
pub use error::{LifecycleError, Result};
pub use hierarchy::{HierarchyCache, SharedHierarchy};
pub use manager::ProjectManager;
pub use memory::{MemoryStore, StoreError};
pub use permission::PermissionResolver;
pub use post_commit::PostCommitExecutor;
pub use schedule::{PeriodicTask, TaskId, TaskScheduler};
pub use store::{
    Change, ChangeSet, CommitHook, IdFilter, ProjectFilter, ProjectQuery, ProjectSort,
    ProjectStore, SortField,
};
pub use unit::UnitOfWork;

#[cfg(test)]
pub(crate) mod testing {
    use crate::access::{RoleDefinition, StaticAccessModel};
    use crate::manager::ProjectManager;
    use crate::post_commit::PostCommitExecutor;
    use crate::store::ProjectStore;
    use hive_core::{RoleId, SecuritySetting, User};
    use hive_hooks::{HookInstaller, HooksConfig};
    use git2::{Oid, Repository, Signature};
    use hive_store_git::{RepositorySanitizer, StorageLayout};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    const OWNER_ROLE: RoleId = RoleId(1);
    const READER_ROLE: RoleId = RoleId(2);

    pub fn owner() -> User {
        let mut user = User::named(User::ROOT_ID, "root");
        user.root = true;
        user
    }

    fn access_model(setting: SecuritySetting) -> anyhow::Result<StaticAccessModel> {
        StaticAccessModel::new(
            vec![
                RoleDefinition {
                    id: OWNER_ROLE,
                    name: "Owner".into(),
                    permissions: ["*".to_owned()].into(),
                    owner: true,
                },
                RoleDefinition {
                    id: READER_ROLE,
                    name: "Reader".into(),
                    permissions: ["read-code".to_owned(), "access-project".to_owned()].into(),
                    owner: false,
                },
            ],
            setting,
        )
    }

    /// Manager over `store` with repositories in a fresh temp dir and inline post-commit work.
    pub fn fixture<S: ProjectStore>(store: S) -> anyhow::Result<(TempDir, ProjectManager<S>)> {
        let dir = TempDir::new()?;
        let hooks = HookInstaller::new(HooksConfig::new("secret", "http://localhost:6610"))?;
        let access = access_model(SecuritySetting::default())?;
        let manager = ProjectManager::new(
            store,
            StorageLayout::new(dir.path()),
            RepositorySanitizer::new(hooks),
            Arc::new(access),
        )
        .with_executor(PostCommitExecutor::inline());
        Ok((dir, manager))
    }

    /// Bare repository at `path` with a single commit on `main`.
    pub fn seed_repository(path: &Path) -> anyhow::Result<Oid> {
        let repo = Repository::init_bare(path)?;
        let signature = Signature::now("hive", "hive@localhost")?;
        let tree_id = {
            let blob = repo.blob(b"hello\n")?;
            let mut builder = repo.treebuilder(None)?;
            builder.insert("README", blob, 0o100_644)?;
            builder.write()?
        };
        let tree = repo.find_tree(tree_id)?;
        let commit = repo.commit(Some("refs/heads/main"), &signature, &signature, "initial", &tree, &[])?;
        repo.set_head("refs/heads/main")?;
        Ok(commit)
    }
}
