//! Domain types for the project hierarchy: ids, records, events and principals.

/// Project notifications.
pub mod event;
/// Identifier types.
pub mod id;
/// Include/exclude pattern lists.
pub mod pattern;
/// Project rows, facades and drafts.
pub mod project;
/// Users, groups and authorizations.
pub mod security;
/// Deletion blockers.
pub mod usage;
/// Path wildcard matching.
pub mod wildcard;

pub use event::{ProjectEvent, ProjectEventKind};
pub use id::{EventId, GroupId, MilestoneId, ObjectId, ProjectId, RoleId, UserId};
pub use pattern::PatternSet;
pub use project::{
    InvalidName, Project, ProjectDraft, ProjectFacade, ProjectRef, RefProtection, join_path,
    split_path, validate_name,
};
pub use security::{Group, Permission, ProjectAuthorization, SecuritySetting, Subject, User};
pub use usage::{InUse, Usage};
