//! Shared fixtures for hive-app integration tests.

#![allow(dead_code)]

use hive_app::{
    MemoryStore, PostCommitExecutor, ProjectManager, RecordingEventSink, RoleDefinition,
    StaticAccessModel,
};
use hive_core::{Group, GroupId, ProjectAuthorization, ProjectId, RoleId, SecuritySetting, User, UserId};
use hive_hooks::{HookInstaller, HooksConfig};
use git2::{Oid, Repository, Signature};
use hive_store_git::{RepositorySanitizer, StorageLayout};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const READER: RoleId = RoleId(2);

pub struct Harness {
    pub dir: TempDir,
    pub manager: ProjectManager<MemoryStore>,
    pub events: Arc<RecordingEventSink>,
}

pub fn harness() -> Harness {
    let dir = TempDir::with_prefix("hive-app-test-").expect("create temp dir");
    let access = StaticAccessModel::new(
        vec![
            RoleDefinition {
                id: RoleId(1),
                name: "Owner".into(),
                permissions: ["*".to_owned()].into(),
                owner: true,
            },
            RoleDefinition {
                id: READER,
                name: "Reader".into(),
                permissions: ["read-code".to_owned(), "access-project".to_owned()].into(),
                owner: false,
            },
        ],
        SecuritySetting::default(),
    )
    .expect("access model");
    let hooks = HookInstaller::new(HooksConfig::new("secret", "http://localhost:6610")).expect("hooks");
    let events = Arc::new(RecordingEventSink::new());
    let manager = ProjectManager::new(
        MemoryStore::new(),
        StorageLayout::new(dir.path().join("projects")),
        RepositorySanitizer::new(hooks),
        Arc::new(access),
    )
    .with_executor(PostCommitExecutor::inline())
    .with_events(Arc::clone(&events) as Arc<dyn hive_app::EventSink>);
    Harness { dir, manager, events }
}

pub fn root_user() -> User {
    let mut user = User::named(User::ROOT_ID, "root");
    user.root = true;
    user
}

/// Plain user whose only group grants `role` on `project`.
pub fn member_of(project: ProjectId, role: RoleId) -> User {
    let mut user = User::named(UserId(42), "dana");
    user.groups.push(Group {
        id: GroupId(3),
        name: "readers".into(),
        administrator: false,
        create_root_projects: false,
        authorizations: vec![ProjectAuthorization { project, role }],
    });
    user
}

/// Bare repository at `path` whose only branch `main` holds one commit.
pub fn seed_repository(path: &Path) -> Oid {
    let repo = Repository::init_bare(path).expect("init bare repo");
    let signature = Signature::now("hive", "hive@localhost").expect("signature");
    let blob = repo.blob(b"hello\n").expect("blob");
    let mut builder = repo.treebuilder(None).expect("treebuilder");
    builder.insert("README", blob, 0o100_644).expect("insert");
    let tree = repo.find_tree(builder.write().expect("write tree")).expect("tree");
    let commit = repo
        .commit(Some("refs/heads/main"), &signature, &signature, "initial", &tree, &[])
        .expect("commit");
    repo.set_head("refs/heads/main").expect("set head");
    commit
}
