//! Permission scoping over the cached hierarchy.

use crate::access::AccessModel;
use crate::hierarchy::HierarchyCache;
use hive_core::{Group, Permission, ProjectAuthorization, ProjectId, Subject, User};
use std::collections::HashSet;

/// Computes which projects a subject may act on.
///
/// Every grant covers the granted project and its whole subtree. Expansion
/// uses the cache's subtree index only, so resolution never touches the store.
#[derive(Clone, Copy)]
pub struct PermissionResolver<'a> {
    access: &'a dyn AccessModel,
}

impl<'a> PermissionResolver<'a> {
    /// Resolver deciding roles through `access`.
    #[must_use]
    pub const fn new(access: &'a dyn AccessModel) -> Self {
        Self { access }
    }

    /// Ids of every project `subject` holds `permission` on.
    #[must_use]
    pub fn permitted_ids(
        &self,
        cache: &HierarchyCache,
        subject: Subject<'_>,
        permission: &Permission,
    ) -> HashSet<ProjectId> {
        let setting = self.access.security_setting();
        let Some(user) = subject.user() else {
            let mut permitted = HashSet::new();
            if setting.anonymous_access {
                self.add_default_roles(cache, permission, &mut permitted);
            }
            return permitted;
        };
        if user.is_administrator() {
            return cache.ids();
        }

        let mut permitted = HashSet::new();
        for group in user.groups.iter().chain(setting.default_login_group.iter()) {
            if group.administrator {
                return cache.ids();
            }
            self.add_authorizations(cache, &group.authorizations, permission, &mut permitted);
        }
        self.add_authorizations(cache, &user.authorizations, permission, &mut permitted);
        self.add_default_roles(cache, permission, &mut permitted);
        permitted
    }

    /// Whether `subject` holds `permission` on `project`.
    ///
    /// Walks `project` and its ancestors instead of materializing the whole set.
    #[must_use]
    pub fn is_permitted(
        &self,
        cache: &HierarchyCache,
        subject: Subject<'_>,
        project: ProjectId,
        permission: &Permission,
    ) -> bool {
        if !cache.contains(project) {
            return false;
        }
        let setting = self.access.security_setting();
        let default_role_grants = || {
            std::iter::once(project)
                .chain(cache.ancestors(project))
                .filter_map(|id| cache.get(id).and_then(|facade| facade.default_role))
                .any(|role| self.access.implies(role, permission))
        };
        let Some(user) = subject.user() else {
            return setting.anonymous_access && default_role_grants();
        };
        if user.is_administrator() {
            return true;
        }
        let covers = |authorization: &ProjectAuthorization| {
            self.access.implies(authorization.role, permission)
                && cache.is_self_or_ancestor_of(authorization.project, project)
        };
        let groups: Vec<&Group> = user
            .groups
            .iter()
            .chain(setting.default_login_group.iter())
            .collect();
        groups.iter().any(|group| group.administrator)
            || groups
                .iter()
                .flat_map(|group| group.authorizations.iter())
                .chain(user.authorizations.iter())
                .any(covers)
            || default_role_grants()
    }

    /// Shorthand for [`is_permitted`](Self::is_permitted) with a known user.
    #[must_use]
    pub fn user_can(
        &self,
        cache: &HierarchyCache,
        user: &User,
        project: ProjectId,
        permission: &Permission,
    ) -> bool {
        self.is_permitted(cache, Subject::User(user), project, permission)
    }

    fn add_authorizations(
        &self,
        cache: &HierarchyCache,
        authorizations: &[ProjectAuthorization],
        permission: &Permission,
        permitted: &mut HashSet<ProjectId>,
    ) {
        for authorization in authorizations {
            if self.access.implies(authorization.role, permission) {
                permitted.extend(cache.subtree_ids(authorization.project));
            }
        }
    }

    fn add_default_roles(
        &self,
        cache: &HierarchyCache,
        permission: &Permission,
        permitted: &mut HashSet<ProjectId>,
    ) {
        for facade in cache.facades() {
            let grants = facade
                .default_role
                .is_some_and(|role| self.access.implies(role, permission));
            if grants && !permitted.contains(&facade.id) {
                permitted.extend(cache.subtree_ids(facade.id));
            }
        }
    }
}

impl std::fmt::Debug for PermissionResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResolver").finish_non_exhaustive()
    }
}
