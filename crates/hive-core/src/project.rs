//! Project records and their cache-resident projection.

use crate::id::{ProjectId, RoleId};
use crate::pattern::PatternSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Separator between ancestor names in a project path.
pub const PATH_SEPARATOR: char = '/';

/// Full, mutable project row as kept by the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Primary key.
    pub id: ProjectId,
    /// Leaf name, unique among siblings ignoring case.
    pub name: String,
    /// Parent project, `None` for roots.
    #[serde(default)]
    pub parent: Option<ProjectId>,
    /// Ancestor names joined with `/`, ending with [`name`](Self::name).
    pub path: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Project this one was forked from, if any.
    #[serde(default)]
    pub forked_from: Option<ProjectId>,
    /// Role granted to everyone who can see the instance.
    #[serde(default)]
    pub default_role: Option<RoleId>,
    /// Mail alias used by the service desk.
    #[serde(default)]
    pub service_desk_name: Option<String>,
    /// Whether the code tab is enabled.
    #[serde(default = "enabled")]
    pub code_management: bool,
    /// Whether the issue tracker is enabled.
    #[serde(default = "enabled")]
    pub issue_management: bool,
    /// Branch protection rules.
    #[serde(default)]
    pub branch_protections: Vec<RefProtection>,
    /// Tag protection rules.
    #[serde(default)]
    pub tag_protections: Vec<RefProtection>,
    /// Last observed activity.
    #[serde(with = "time::serde::rfc3339")]
    pub update_date: OffsetDateTime,
}

const fn enabled() -> bool {
    true
}

impl Project {
    /// Immutable projection used by the hierarchy cache.
    #[must_use]
    pub fn facade(&self) -> ProjectFacade {
        ProjectFacade {
            id: self.id,
            name: self.name.clone(),
            path: self.path.clone(),
            parent: self.parent,
            default_role: self.default_role,
            service_desk_name: self.service_desk_name.clone(),
        }
    }
}

/// Immutable, cheap projection of a [`Project`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFacade {
    /// Primary key.
    pub id: ProjectId,
    /// Leaf name.
    pub name: String,
    /// Full slash-joined path.
    pub path: String,
    /// Parent project.
    pub parent: Option<ProjectId>,
    /// Default role, if any.
    pub default_role: Option<RoleId>,
    /// Service desk alias, if any.
    pub service_desk_name: Option<String>,
}

/// A branch or tag protection rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefProtection {
    /// Whether the rule is active.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Space separated pattern list (see [`PatternSet`]).
    pub patterns: String,
}

impl RefProtection {
    /// Rule matching the given pattern list.
    pub fn new(patterns: impl Into<String>) -> Self {
        Self {
            enabled: true,
            patterns: patterns.into(),
        }
    }

    /// Remove an exact ref name from the rule's patterns.
    ///
    /// Rules that never named `ref_name` are left untouched. Returns false
    /// when the rule no longer references anything and should be dropped.
    pub fn forget(&mut self, ref_name: &str) -> bool {
        let mut set = PatternSet::parse(&self.patterns);
        if !set.remove(ref_name) {
            return true;
        }
        self.patterns = set.to_string();
        !self.patterns.is_empty()
    }
}

/// Reference to a project that may or may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectRef {
    /// Persisted project.
    Existing(ProjectId),
    /// Project that will be created together with its descendant.
    New(Box<ProjectDraft>),
}

/// Unsaved project with an optional, possibly unsaved, parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDraft {
    /// Leaf name.
    pub name: String,
    /// Parent reference, `None` for roots.
    pub parent: Option<ProjectRef>,
    /// Free-form description.
    pub description: Option<String>,
    /// Role granted to everyone who can see the instance.
    pub default_role: Option<RoleId>,
    /// Service desk alias.
    pub service_desk_name: Option<String>,
    /// Whether the code tab is enabled.
    pub code_management: bool,
    /// Whether the issue tracker is enabled.
    pub issue_management: bool,
}

impl ProjectDraft {
    /// Draft with default settings.
    pub fn new(name: impl Into<String>, parent: Option<ProjectRef>) -> Self {
        Self {
            name: name.into(),
            parent,
            description: None,
            default_role: None,
            service_desk_name: None,
            code_management: true,
            issue_management: true,
        }
    }

    /// Materialize the draft into a row with the given id and parent.
    #[must_use]
    pub fn into_project(self, id: ProjectId, parent: Option<ProjectId>, path: String) -> Project {
        Project {
            id,
            name: self.name,
            parent,
            path,
            description: self.description,
            forked_from: None,
            default_role: self.default_role,
            service_desk_name: self.service_desk_name,
            code_management: self.code_management,
            issue_management: self.issue_management,
            branch_protections: Vec::new(),
            tag_protections: Vec::new(),
            update_date: OffsetDateTime::now_utc(),
        }
    }
}

/// Error returned for unusable project names.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidName {
    /// Name is empty after trimming.
    #[error("project name must not be empty")]
    Empty,
    /// Name contains the path separator.
    #[error("project name '{0}' must not contain '/'")]
    ContainsSeparator(String),
    /// Name has leading or trailing whitespace.
    #[error("project name '{0}' must not start or end with whitespace")]
    Untrimmed(String),
}

/// Validate a leaf project name.
///
/// # Errors
/// Returns [`InvalidName`] when the name is empty, untrimmed, or contains `/`.
pub fn validate_name(name: &str) -> Result<(), InvalidName> {
    if name.trim().is_empty() {
        return Err(InvalidName::Empty);
    }
    if name.contains(PATH_SEPARATOR) {
        return Err(InvalidName::ContainsSeparator(name.to_owned()));
    }
    if name.trim() != name {
        return Err(InvalidName::Untrimmed(name.to_owned()));
    }
    Ok(())
}

/// Join a parent path and a leaf name.
#[must_use]
pub fn join_path(parent_path: Option<&str>, name: &str) -> String {
    match parent_path {
        Some(parent) => format!("{parent}{PATH_SEPARATOR}{name}"),
        None => name.to_owned(),
    }
}

/// Split a user supplied path into trimmed, non-empty segments.
#[must_use]
pub fn split_path(path: &str) -> Vec<&str> {
    path.split(PATH_SEPARATOR)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}
