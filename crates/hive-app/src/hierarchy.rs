//! In-memory index of the project tree.
//!
//! The cache holds one [`ProjectFacade`] per project plus derived indices:
//! path to id, parent to children, and id to subtree. Subtrees are kept
//! exact incrementally on every [`put`](HierarchyCache::put) and
//! [`remove`](HierarchyCache::remove), so permission checks never walk the tree.

use crate::store::{Change, ChangeSet, CommitHook};
use hive_core::{ProjectFacade, ProjectId, wildcard};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Facades of every project with derived lookup indices.
#[derive(Debug, Clone, Default)]
pub struct HierarchyCache {
    facades: HashMap<ProjectId, ProjectFacade>,
    paths: HashMap<String, ProjectId>,
    children: HashMap<Option<ProjectId>, BTreeSet<ProjectId>>,
    subtrees: HashMap<ProjectId, HashSet<ProjectId>>,
}

impl HierarchyCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding `facades`, inserted in any order.
    pub fn from_facades(facades: impl IntoIterator<Item = ProjectFacade>) -> Self {
        let mut cache = Self::new();
        for facade in facades {
            cache.put(facade);
        }
        cache
    }

    /// Number of cached projects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facades.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facades.is_empty()
    }

    /// Facade of `id`.
    #[must_use]
    pub fn get(&self, id: ProjectId) -> Option<&ProjectFacade> {
        self.facades.get(&id)
    }

    /// Whether `id` is cached.
    #[must_use]
    pub fn contains(&self, id: ProjectId) -> bool {
        self.facades.contains_key(&id)
    }

    /// Every cached facade, unordered.
    pub fn facades(&self) -> impl Iterator<Item = &ProjectFacade> {
        self.facades.values()
    }

    /// Every cached id.
    #[must_use]
    pub fn ids(&self) -> HashSet<ProjectId> {
        self.facades.keys().copied().collect()
    }

    /// Insert or replace the facade of `facade.id`.
    ///
    /// Descendant paths are not rewritten here; callers put every renamed
    /// descendant themselves.
    pub fn put(&mut self, facade: ProjectFacade) {
        let id = facade.id;
        if let Some(old) = self.facades.remove(&id) {
            if self.paths.get(&old.path) == Some(&id) {
                self.paths.remove(&old.path);
            }
            if old.parent != facade.parent {
                let subtree = self.subtrees.get(&id).cloned().unwrap_or_default();
                self.detach(id, old.parent, &subtree);
                self.attach(id, facade.parent, &subtree);
            }
        } else {
            let mut subtree = HashSet::from([id]);
            if let Some(kids) = self.children.get(&Some(id)) {
                for kid in kids {
                    if let Some(below) = self.subtrees.get(kid) {
                        subtree.extend(below);
                    }
                }
            }
            self.attach(id, facade.parent, &subtree);
            self.subtrees.insert(id, subtree);
        }
        self.paths.insert(facade.path.clone(), id);
        self.facades.insert(id, facade);
    }

    /// Drop `id` and every index entry referring to it.
    ///
    /// Children are not removed; callers delete or move them first.
    pub fn remove(&mut self, id: ProjectId) -> Option<ProjectFacade> {
        let facade = self.facades.remove(&id)?;
        if self.paths.get(&facade.path) == Some(&id) {
            self.paths.remove(&facade.path);
        }
        let subtree = self.subtrees.remove(&id).unwrap_or_default();
        self.detach(id, facade.parent, &subtree);
        Some(facade)
    }

    /// Id of the project with exactly this path.
    #[must_use]
    pub fn find_id(&self, path: &str) -> Option<ProjectId> {
        self.paths.get(path).copied()
    }

    /// Child of `parent` (or root when `None`) whose name matches ignoring case.
    #[must_use]
    pub fn find_child(&self, parent: Option<ProjectId>, name: &str) -> Option<ProjectId> {
        let wanted = name.to_lowercase();
        self.children
            .get(&parent)?
            .iter()
            .copied()
            .find(|child| {
                self.facades
                    .get(child)
                    .is_some_and(|facade| facade.name.to_lowercase() == wanted)
            })
    }

    /// Project using `name` as its service desk alias.
    #[must_use]
    pub fn find_by_service_desk_name(&self, name: &str) -> Option<ProjectId> {
        self.facades
            .values()
            .find(|facade| facade.service_desk_name.as_deref() == Some(name))
            .map(|facade| facade.id)
    }

    /// `id` and all its descendants; empty when `id` is unknown.
    #[must_use]
    pub fn subtree_ids(&self, id: ProjectId) -> HashSet<ProjectId> {
        self.subtrees.get(&id).cloned().unwrap_or_default()
    }

    /// Whether `ancestor` is `id` or one of its ancestors.
    #[must_use]
    pub fn is_self_or_ancestor_of(&self, ancestor: ProjectId, id: ProjectId) -> bool {
        self.subtrees
            .get(&ancestor)
            .is_some_and(|subtree| subtree.contains(&id))
    }

    /// Direct children of `parent` (roots when `None`) ordered by name.
    #[must_use]
    pub fn children(&self, parent: Option<ProjectId>) -> Vec<ProjectFacade> {
        let mut children: Vec<_> = self
            .child_ids(parent)
            .into_iter()
            .filter_map(|child| self.facades.get(&child).cloned())
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        children
    }

    /// Ids of the direct children of `parent`, ascending.
    #[must_use]
    pub fn child_ids(&self, parent: Option<ProjectId>) -> Vec<ProjectId> {
        self.children
            .get(&parent)
            .map(|kids| kids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ancestors of `id`, nearest first.
    #[must_use]
    pub fn ancestors(&self, id: ProjectId) -> Vec<ProjectId> {
        let start = self.facades.get(&id).and_then(|facade| facade.parent);
        self.chain_from(start)
    }

    /// Descendants of `id` with parents listed before their children.
    #[must_use]
    pub fn descendants(&self, id: ProjectId) -> Vec<ProjectId> {
        let mut order = Vec::new();
        let mut queue: VecDeque<_> = self.child_ids(Some(id)).into();
        while let Some(current) = queue.pop_front() {
            order.push(current);
            queue.extend(self.child_ids(Some(current)));
        }
        order
    }

    /// `id` and its descendants with children listed before their parents.
    #[must_use]
    pub fn children_first(&self, id: ProjectId) -> Vec<ProjectId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            stack.extend(self.child_ids(Some(current)));
        }
        order.reverse();
        order
    }

    /// Ids whose path matches the wildcard `pattern`.
    #[must_use]
    pub fn matching_ids(&self, pattern: &str) -> HashSet<ProjectId> {
        self.facades
            .values()
            .filter(|facade| wildcard::matches(pattern, &facade.path))
            .map(|facade| facade.id)
            .collect()
    }

    fn attach(&mut self, id: ProjectId, parent: Option<ProjectId>, subtree: &HashSet<ProjectId>) {
        self.children.entry(parent).or_default().insert(id);
        for ancestor in self.chain_from(parent) {
            if let Some(set) = self.subtrees.get_mut(&ancestor) {
                set.extend(subtree);
            }
        }
    }

    fn detach(&mut self, id: ProjectId, parent: Option<ProjectId>, subtree: &HashSet<ProjectId>) {
        if let Some(kids) = self.children.get_mut(&parent) {
            kids.remove(&id);
            if kids.is_empty() {
                self.children.remove(&parent);
            }
        }
        for ancestor in self.chain_from(parent) {
            if let Some(set) = self.subtrees.get_mut(&ancestor) {
                set.retain(|member| !subtree.contains(member));
            }
        }
    }

    /// `start` and its cached ancestors, stopping at the first unknown id.
    fn chain_from(&self, start: Option<ProjectId>) -> Vec<ProjectId> {
        let mut chain = Vec::new();
        let mut cursor = start;
        while let Some(current) = cursor {
            let Some(facade) = self.facades.get(&current) else {
                break;
            };
            if chain.len() > self.facades.len() {
                break;
            }
            chain.push(current);
            cursor = facade.parent;
        }
        chain
    }
}

/// [`HierarchyCache`] behind a single reader-writer lock.
#[derive(Debug, Default)]
pub struct SharedHierarchy {
    inner: RwLock<HierarchyCache>,
}

impl SharedHierarchy {
    /// Wrap `cache`.
    #[must_use]
    pub const fn new(cache: HierarchyCache) -> Self {
        Self {
            inner: RwLock::new(cache),
        }
    }

    /// Shared access for lookups.
    pub fn read(&self) -> RwLockReadGuard<'_, HierarchyCache> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access for mutation.
    pub fn write(&self) -> RwLockWriteGuard<'_, HierarchyCache> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Independent copy taken under the read lock.
    #[must_use]
    pub fn snapshot(&self) -> HierarchyCache {
        self.read().clone()
    }

    /// Swap in a freshly built cache.
    pub fn replace(&self, cache: HierarchyCache) {
        *self.write() = cache;
    }
}

impl CommitHook for SharedHierarchy {
    fn committed(&self, changes: &ChangeSet) {
        let mut order = Vec::new();
        let mut latest = HashMap::new();
        for change in changes.iter() {
            let (id, facade) = match change {
                Change::Persist(project) => (project.id, Some(project.facade())),
                Change::Remove(id) => (*id, None),
                _ => continue,
            };
            if latest.insert(id, facade).is_none() {
                order.push(id);
            }
        }
        if order.is_empty() {
            return;
        }

        let mut cache = self.write();
        for id in &order {
            match latest.remove(id).flatten() {
                Some(facade) => cache.put(facade),
                None => {
                    cache.remove(*id);
                }
            }
        }
        debug!(projects = order.len(), "Applied committed projects to hierarchy cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facade(id: u64, name: &str, parent: Option<u64>, path: &str) -> ProjectFacade {
        ProjectFacade {
            id: ProjectId(id),
            name: name.into(),
            path: path.into(),
            parent: parent.map(ProjectId),
            default_role: None,
            service_desk_name: None,
        }
    }

    fn ids(values: &[u64]) -> HashSet<ProjectId> {
        values.iter().copied().map(ProjectId).collect()
    }

    /// a(1) -> b(2) -> c(3), d(4)
    fn sample() -> HierarchyCache {
        HierarchyCache::from_facades([
            facade(1, "a", None, "a"),
            facade(2, "b", Some(1), "a/b"),
            facade(3, "c", Some(2), "a/b/c"),
            facade(4, "d", None, "d"),
        ])
    }

    #[test]
    fn subtree_includes_self_and_descendants() {
        let cache = sample();
        assert_eq!(cache.subtree_ids(ProjectId(1)), ids(&[1, 2, 3]));
        assert_eq!(cache.subtree_ids(ProjectId(2)), ids(&[2, 3]));
        assert_eq!(cache.subtree_ids(ProjectId(4)), ids(&[4]));
        assert!(cache.subtree_ids(ProjectId(99)).is_empty());
    }

    #[test]
    fn children_inserted_before_parents_are_adopted() {
        let cache = HierarchyCache::from_facades([
            facade(3, "c", Some(2), "a/b/c"),
            facade(2, "b", Some(1), "a/b"),
            facade(1, "a", None, "a"),
        ]);
        assert_eq!(cache.subtree_ids(ProjectId(1)), ids(&[1, 2, 3]));
        assert_eq!(cache.ancestors(ProjectId(3)), vec![ProjectId(2), ProjectId(1)]);
    }

    #[test]
    fn reparent_moves_whole_subtree() {
        let mut cache = sample();
        cache.put(facade(2, "b", Some(4), "d/b"));
        cache.put(facade(3, "c", Some(2), "d/b/c"));

        assert_eq!(cache.subtree_ids(ProjectId(1)), ids(&[1]));
        assert_eq!(cache.subtree_ids(ProjectId(4)), ids(&[4, 2, 3]));
        assert_eq!(cache.find_id("d/b/c"), Some(ProjectId(3)));
        assert_eq!(cache.find_id("a/b/c"), None);
        assert!(cache.child_ids(Some(ProjectId(1))).is_empty());
    }

    #[test]
    fn remove_leaf_shrinks_ancestor_subtrees() {
        let mut cache = sample();
        assert!(cache.remove(ProjectId(3)).is_some());
        assert_eq!(cache.subtree_ids(ProjectId(1)), ids(&[1, 2]));
        assert_eq!(cache.find_id("a/b/c"), None);
        assert!(cache.remove(ProjectId(3)).is_none());
    }

    #[test]
    fn path_lookup_is_exact_but_child_lookup_ignores_case() {
        let cache = sample();
        assert_eq!(cache.find_id("a/b"), Some(ProjectId(2)));
        assert_eq!(cache.find_id("A/B"), None);
        assert_eq!(cache.find_child(Some(ProjectId(1)), "B"), Some(ProjectId(2)));
        assert_eq!(cache.find_child(None, "D"), Some(ProjectId(4)));
        assert_eq!(cache.find_child(None, "b"), None);
    }

    #[test]
    fn children_are_sorted_by_name() {
        let mut cache = sample();
        cache.put(facade(5, "aa", Some(1), "a/aa"));
        let names: Vec<_> = cache
            .children(Some(ProjectId(1)))
            .into_iter()
            .map(|facade| facade.name)
            .collect();
        assert_eq!(names, vec!["aa", "b"]);
        let roots: Vec<_> = cache.children(None).into_iter().map(|f| f.id).collect();
        assert_eq!(roots, vec![ProjectId(1), ProjectId(4)]);
    }

    #[test]
    fn traversal_orders() {
        let cache = sample();
        assert_eq!(cache.descendants(ProjectId(1)), vec![ProjectId(2), ProjectId(3)]);
        assert_eq!(
            cache.children_first(ProjectId(1)),
            vec![ProjectId(3), ProjectId(2), ProjectId(1)]
        );
    }

    #[test]
    fn wildcard_matches_across_segments() {
        let cache = sample();
        assert_eq!(cache.matching_ids("a/*"), ids(&[2, 3]));
        assert_eq!(cache.matching_ids("*c"), ids(&[3]));
        assert_eq!(cache.matching_ids("?"), ids(&[1, 4]));
    }

    #[test]
    fn snapshot_is_independent_of_live_cache() {
        let shared = SharedHierarchy::new(sample());
        let snapshot = shared.snapshot();
        shared.write().remove(ProjectId(4));
        assert!(snapshot.contains(ProjectId(4)));
        assert!(!shared.read().contains(ProjectId(4)));
    }

    #[test]
    fn service_desk_lookup() {
        let mut cache = sample();
        let mut support = facade(5, "support", None, "support");
        support.service_desk_name = Some("help".into());
        cache.put(support);
        assert_eq!(cache.find_by_service_desk_name("help"), Some(ProjectId(5)));
        assert_eq!(cache.find_by_service_desk_name("other"), None);
    }
}
