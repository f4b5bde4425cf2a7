//! Lifecycle operations racing on worker threads.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{harness, root_user};
use hive_app::{LifecycleError, ProjectStore};
use hive_core::{ProjectDraft, ProjectRef};
use std::sync::Barrier;
use std::thread;

const ROUNDS: usize = 8;
const WORKERS: usize = 4;

#[test]
fn racing_creates_of_one_name_leave_a_single_project() {
    for _ in 0..ROUNDS {
        let h = harness();
        let user = root_user();
        let barrier = Barrier::new(WORKERS);

        let results: Vec<_> = thread::scope(|scope| {
            let workers: Vec<_> = (0..WORKERS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        h.manager.create(&user, ProjectDraft::new("same", None))
                    })
                })
                .collect();
            workers.into_iter().map(|worker| worker.join().unwrap()).collect()
        });

        let created: Vec<_> = results.iter().filter_map(|result| result.as_ref().ok()).collect();
        assert_eq!(created.len(), 1);
        assert!(
            results
                .iter()
                .filter_map(|result| result.as_ref().err())
                .all(|err| matches!(err, LifecycleError::InvalidPath(_)))
        );

        let rows = h.manager.store().list().expect("list");
        assert_eq!(rows.iter().filter(|row| row.path == "same").count(), 1);
        assert_eq!(h.manager.hierarchy().read().find_id("same"), Some(created[0].id));

        h.manager.delete(created[0].id).expect("delete");
        assert!(h.manager.ids().is_empty());
        assert_eq!(h.manager.hierarchy().read().find_id("same"), None);
    }
}

#[test]
fn child_created_during_parent_move_gets_the_new_path() {
    for _ in 0..ROUNDS {
        let h = harness();
        let user = root_user();
        let a = h.manager.create(&user, ProjectDraft::new("a", None)).expect("a");
        let b = h
            .manager
            .create(&user, ProjectDraft::new("b", Some(ProjectRef::Existing(a.id))))
            .expect("b");
        let barrier = Barrier::new(2);

        let child = thread::scope(|scope| {
            let mover = scope.spawn(|| {
                barrier.wait();
                h.manager.move_project(b.id, None)
            });
            let creator = scope.spawn(|| {
                barrier.wait();
                h.manager
                    .create(&user, ProjectDraft::new("c", Some(ProjectRef::Existing(b.id))))
            });
            mover.join().unwrap().expect("move");
            creator.join().unwrap().expect("create")
        });

        let stored = h.manager.load(child.id).expect("load c");
        assert_eq!(stored.path, "b/c");
        assert_eq!(h.manager.load(b.id).expect("load b").path, "b");
        assert_eq!(h.manager.facade(child.id).map(|f| f.path), Some("b/c".into()));
        assert_eq!(h.manager.hierarchy().read().find_id("b/c"), Some(child.id));
        assert_eq!(h.manager.hierarchy().read().find_id("a/b/c"), None);
    }
}

#[test]
fn racing_renames_of_siblings_to_one_name_keep_names_unique() {
    for _ in 0..ROUNDS {
        let h = harness();
        let user = root_user();
        let siblings: Vec<_> = (0..WORKERS)
            .map(|n| {
                h.manager
                    .create(&user, ProjectDraft::new(format!("s{n}"), None))
                    .expect("sibling")
            })
            .collect();
        let barrier = Barrier::new(WORKERS);

        let renamed = thread::scope(|scope| {
            let workers: Vec<_> = siblings
                .iter()
                .cloned()
                .map(|mut project| {
                    let barrier = &barrier;
                    let manager = &h.manager;
                    scope.spawn(move || {
                        project.name = "taken".into();
                        barrier.wait();
                        manager.save(project)
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().unwrap())
                .filter(Result::is_ok)
                .count()
        });

        assert_eq!(renamed, 1);
        let rows = h.manager.store().list().expect("list");
        assert_eq!(rows.iter().filter(|row| row.name == "taken").count(), 1);
    }
}
