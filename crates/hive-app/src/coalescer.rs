//! Batching of "project touched" signals into periodic update-date writes.

use hive_core::ProjectId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

/// Default age after which a pending update is flushed.
pub const DEFAULT_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct PendingUpdate {
    first_seen: Instant,
    latest: OffsetDateTime,
}

/// Pending update that reached the flush threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueUpdate {
    /// Touched project.
    pub project: ProjectId,
    /// Most recent activity observed for it.
    pub date: OffsetDateTime,
    first_seen: Instant,
}

/// Last-write-wins map of activity timestamps awaiting a flush.
///
/// An entry becomes due once it has been pending for the threshold,
/// measured from the first touch; later touches only replace the timestamp.
#[derive(Debug)]
pub struct UpdateDateCoalescer {
    pending: Mutex<HashMap<ProjectId, PendingUpdate>>,
    threshold: Duration,
}

impl UpdateDateCoalescer {
    /// Coalescer flushing entries older than `threshold`.
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            threshold,
        }
    }

    /// Flush threshold.
    #[must_use]
    pub const fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Record activity on `project` now.
    pub fn touch(&self, project: ProjectId, date: OffsetDateTime) {
        self.touch_at(project, date, Instant::now());
    }

    /// Record activity on `project` observed at `now`.
    pub fn touch_at(&self, project: ProjectId, date: OffsetDateTime, now: Instant) {
        self.lock()
            .entry(project)
            .and_modify(|pending| pending.latest = date)
            .or_insert(PendingUpdate {
                first_seen: now,
                latest: date,
            });
    }

    /// Remove and return every entry pending for at least the threshold.
    #[must_use]
    pub fn take_due(&self, now: Instant) -> Vec<DueUpdate> {
        let mut pending = self.lock();
        let due: Vec<_> = pending
            .iter()
            .filter(|(_, update)| now.saturating_duration_since(update.first_seen) >= self.threshold)
            .map(|(project, update)| DueUpdate {
                project: *project,
                date: update.latest,
                first_seen: update.first_seen,
            })
            .collect();
        for update in &due {
            pending.remove(&update.project);
        }
        due
    }

    /// Put back updates whose write failed, keeping anything newer touched meanwhile.
    pub fn restore(&self, updates: impl IntoIterator<Item = DueUpdate>) {
        let mut pending = self.lock();
        for update in updates {
            match pending.entry(update.project) {
                Entry::Occupied(mut entry) => {
                    let current = entry.get_mut();
                    current.first_seen = current.first_seen.min(update.first_seen);
                    if update.date > current.latest {
                        current.latest = update.date;
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(PendingUpdate {
                        first_seen: update.first_seen,
                        latest: update.date,
                    });
                }
            }
        }
    }

    /// Number of projects awaiting a flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProjectId, PendingUpdate>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for UpdateDateCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn burst_collapses_into_one_flush_with_latest_value() {
        let coalescer = UpdateDateCoalescer::default();
        let start = Instant::now();
        let first = datetime!(2024-05-01 10:00:00 UTC);
        let second = datetime!(2024-05-01 10:00:30 UTC);

        coalescer.touch_at(ProjectId(5), first, start);
        coalescer.touch_at(ProjectId(5), second, start + 30 * SECOND);
        assert!(coalescer.take_due(start + 59 * SECOND).is_empty());

        let due = coalescer.take_due(start + 61 * SECOND);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].project, ProjectId(5));
        assert_eq!(due[0].date, second);
        assert_eq!(coalescer.pending(), 0);
    }

    #[test]
    fn young_entries_wait_for_a_later_cycle() {
        let coalescer = UpdateDateCoalescer::default();
        let start = Instant::now();
        let date = datetime!(2024-05-01 10:00:00 UTC);
        coalescer.touch_at(ProjectId(1), date, start);
        coalescer.touch_at(ProjectId(2), date, start + 30 * SECOND);

        let due = coalescer.take_due(start + 60 * SECOND);
        assert_eq!(due.iter().map(|u| u.project).collect::<Vec<_>>(), vec![ProjectId(1)]);
        assert_eq!(coalescer.pending(), 1);
    }

    #[test]
    fn restore_keeps_newer_touches() {
        let coalescer = UpdateDateCoalescer::default();
        let start = Instant::now();
        let old = datetime!(2024-05-01 10:00:00 UTC);
        let new = datetime!(2024-05-01 10:05:00 UTC);
        coalescer.touch_at(ProjectId(1), old, start);
        let due = coalescer.take_due(start + 60 * SECOND);

        coalescer.touch_at(ProjectId(1), new, start + 70 * SECOND);
        coalescer.restore(due);

        let again = coalescer.take_due(start + 61 * SECOND);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].date, new);
    }
}
