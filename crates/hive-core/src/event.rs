use crate::id::{EventId, ObjectId, ProjectId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Notification emitted about a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEvent {
    /// Unique event identifier.
    pub id: EventId,
    #[serde(with = "time::serde::rfc3339")]
    /// Event timestamp in UTC.
    pub ts: OffsetDateTime,
    /// Project the event is about.
    pub project: ProjectId,
    /// Event payload.
    pub kind: ProjectEventKind,
}

/// Event kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProjectEventKind {
    /// A project row was created (plain create, fork or clone).
    ProjectCreated,
    /// A ref moved from `old` to `new`; the zero id means absent.
    #[serde(rename_all = "camelCase")]
    RefUpdated {
        /// Full ref name, e.g. `refs/heads/main`.
        ref_name: String,
        /// Previous target.
        old: ObjectId,
        /// New target.
        new: ObjectId,
    },
}

impl ProjectEvent {
    /// Stamp a new event with a fresh id and the current time.
    #[must_use]
    pub fn new(project: ProjectId, kind: ProjectEventKind) -> Self {
        Self {
            id: EventId::new(),
            ts: OffsetDateTime::now_utc(),
            project,
            kind,
        }
    }

    /// Convenience constructor for [`ProjectEventKind::ProjectCreated`].
    #[must_use]
    pub fn created(project: ProjectId) -> Self {
        Self::new(project, ProjectEventKind::ProjectCreated)
    }

    /// Convenience constructor for [`ProjectEventKind::RefUpdated`].
    #[must_use]
    pub fn ref_updated(project: ProjectId, ref_name: impl Into<String>, old: ObjectId, new: ObjectId) -> Self {
        Self::new(
            project,
            ProjectEventKind::RefUpdated {
                ref_name: ref_name.into(),
                old,
                new,
            },
        )
    }
}
