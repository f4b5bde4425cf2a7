//! Ports to subsystems that react to project lifecycle changes.

use hive_core::{MilestoneId, ProjectEvent, ProjectEventKind, ProjectId, Usage};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Milestone still scheduling issues of some project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsedMilestone {
    /// Milestone id.
    pub id: MilestoneId,
    /// Project owning the milestone.
    pub project: ProjectId,
}

/// Subsystems holding references to projects.
///
/// Every method defaults to a no-op so implementors only override what they track.
pub trait ProjectDependents: Send + Sync {
    /// Places still referring to the project at `path`; non-empty blocks deletion.
    fn usages_on_delete(&self, _path: &str) -> Usage {
        Usage::new()
    }

    /// Milestones scheduling issues of `project`.
    fn used_milestones(&self, _project: ProjectId) -> Vec<UsedMilestone> {
        Vec::new()
    }

    /// Rewrite stored references after a project moved from `old` to `new`.
    fn on_move(&self, _old: &str, _new: &str) {}

    /// Reschedule recurring jobs of `project`.
    fn schedule_jobs(&self, _project: ProjectId) {}

    /// Copy commit graph metadata from `from` to the fork `to`.
    ///
    /// # Errors
    /// Implementation-specific; callers treat failures as fatal for the fork.
    fn clone_commit_info(&self, _from: ProjectId, _to: ProjectId) -> anyhow::Result<()> {
        Ok(())
    }

    /// Copy the avatar of `from` to the fork `to`.
    ///
    /// # Errors
    /// Implementation-specific; callers treat failures as fatal for the fork.
    fn copy_avatar(&self, _from: ProjectId, _to: ProjectId) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Dependents that track nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependents;

impl ProjectDependents for NoDependents {}

/// Receiver of project notifications.
pub trait EventSink: Send + Sync {
    /// Deliver `event`.
    fn post(&self, event: ProjectEvent);
}

/// Sink writing events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn post(&self, event: ProjectEvent) {
        match &event.kind {
            ProjectEventKind::ProjectCreated => {
                info!(project = %event.project, event = %event.id, "Project created");
            }
            ProjectEventKind::RefUpdated { ref_name, old, new } => {
                debug!(
                    project = %event.project,
                    event = %event.id,
                    ref_name = %ref_name,
                    old = %old,
                    new = %new,
                    "Ref updated"
                );
            }
        }
    }
}

/// Sink keeping every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ProjectEvent>>,
}

impl RecordingEventSink {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<ProjectEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for RecordingEventSink {
    fn post(&self, event: ProjectEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
