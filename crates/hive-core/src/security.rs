//! Principals and authorizations consumed by permission resolution.
//!
//! The rule language deciding whether a role implies a permission lives
//! outside this crate; only the data needed to walk authorizations is here.

use crate::id::{GroupId, ProjectId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Named permission checked against roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    /// See a project at all.
    pub const ACCESS_PROJECT: Self = Self(Cow::Borrowed("access-project"));
    /// Read repository contents.
    pub const READ_CODE: Self = Self(Cow::Borrowed("read-code"));
    /// Create child projects below a project.
    pub const CREATE_CHILDREN: Self = Self(Cow::Borrowed("create-children"));
    /// Administer a project.
    pub const MANAGE_PROJECT: Self = Self(Cow::Borrowed("manage-project"));

    /// Custom permission name.
    pub fn named(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Permission name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Grant of a role on a project (and implicitly its subtree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectAuthorization {
    /// Target project.
    pub project: ProjectId,
    /// Granted role.
    pub role: RoleId,
}

/// Group of users sharing authorizations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Primary key.
    pub id: GroupId,
    /// Display name.
    pub name: String,
    /// Members are site administrators.
    #[serde(default)]
    pub administrator: bool,
    /// Members may create root projects.
    #[serde(default)]
    pub create_root_projects: bool,
    /// Project grants held by the group.
    #[serde(default)]
    pub authorizations: Vec<ProjectAuthorization>,
}

/// Authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Primary key.
    pub id: UserId,
    /// Login name.
    pub name: String,
    /// Built-in root account.
    #[serde(default)]
    pub root: bool,
    /// Internal system principal.
    #[serde(default)]
    pub system: bool,
    /// Group memberships.
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Direct project grants.
    #[serde(default)]
    pub authorizations: Vec<ProjectAuthorization>,
}

impl User {
    /// Id reserved for the root account.
    pub const ROOT_ID: UserId = UserId(1);
    /// Id reserved for the system principal.
    pub const SYSTEM_ID: UserId = UserId(0);

    /// Internal principal used by maintenance jobs and the admin binary.
    #[must_use]
    pub fn system() -> Self {
        Self {
            id: Self::SYSTEM_ID,
            name: "system".into(),
            root: false,
            system: true,
            groups: Vec::new(),
            authorizations: Vec::new(),
        }
    }

    /// Plain account without any grants.
    pub fn named(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            root: false,
            system: false,
            groups: Vec::new(),
            authorizations: Vec::new(),
        }
    }

    /// Root, system, or member of an administrator group.
    #[must_use]
    pub fn is_administrator(&self) -> bool {
        self.root || self.system || self.groups.iter().any(|group| group.administrator)
    }
}

/// Caller identity for permission-scoped operations.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    /// Not logged in.
    Anonymous,
    /// Logged-in account.
    User(&'a User),
}

impl<'a> Subject<'a> {
    /// Logged-in account, if any.
    #[must_use]
    pub const fn user(self) -> Option<&'a User> {
        match self {
            Self::Anonymous => None,
            Self::User(user) => Some(user),
        }
    }
}

impl<'a> From<&'a User> for Subject<'a> {
    fn from(user: &'a User) -> Self {
        Self::User(user)
    }
}

/// Instance-wide security settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySetting {
    /// Whether anonymous visitors may see projects granted by default roles.
    #[serde(default)]
    pub anonymous_access: bool,
    /// Group every logged-in user implicitly belongs to.
    #[serde(default)]
    pub default_login_group: Option<Group>,
}

impl SecuritySetting {
    /// Whether `user` may create projects without a parent.
    #[must_use]
    pub fn can_create_root_projects(&self, user: &User) -> bool {
        user.is_administrator()
            || user
                .groups
                .iter()
                .chain(self.default_login_group.iter())
                .any(|group| group.administrator || group.create_root_projects)
    }
}
