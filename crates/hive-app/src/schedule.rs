//! Fixed-interval background tasks.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error};

/// Work executed repeatedly on a fixed cadence.
pub trait PeriodicTask: Send + Sync + 'static {
    /// Label used in logs.
    fn name(&self) -> &'static str;

    /// Run one cycle.
    ///
    /// # Errors
    /// Failures are logged by the scheduler; the next cycle still runs.
    fn execute(&self) -> anyhow::Result<()>;

    /// Time between two cycles.
    fn schedule(&self) -> Duration;
}

/// Handle identifying a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// Runs [`PeriodicTask`]s on a tokio runtime.
///
/// Each cycle executes on the blocking pool so tasks may do synchronous
/// store writes. The first cycle starts one period after scheduling.
pub struct TaskScheduler {
    handle: Handle,
    tasks: Mutex<HashMap<TaskId, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl TaskScheduler {
    /// Scheduler spawning onto `handle`.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start running `task` every [`PeriodicTask::schedule`].
    pub fn schedule(&self, task: Arc<dyn PeriodicTask>) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let period = task.schedule();
        debug!(task = task.name(), period_ms = period.as_millis(), "Scheduling periodic task");
        let join = self.handle.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let cycle = Arc::clone(&task);
                match tokio::task::spawn_blocking(move || cycle.execute()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        let message = format!("{err:#}");
                        error!(task = task.name(), error = %message, "Periodic task failed");
                    }
                    Err(err) => error!(task = task.name(), error = %err, "Periodic task panicked"),
                }
            }
        });
        self.lock().insert(id, join);
        id
    }

    /// Stop `id`; returns whether it was scheduled.
    pub fn unschedule(&self, id: TaskId) -> bool {
        let Some(join) = self.lock().remove(&id) else {
            return false;
        };
        join.abort();
        true
    }

    /// Stop every task.
    pub fn shutdown(&self) {
        for (_, join) in self.lock().drain() {
            join.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("tasks", &self.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        runs: AtomicUsize,
        fail: bool,
    }

    impl PeriodicTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn execute(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("cycle failed");
            }
            Ok(())
        }

        fn schedule(&self) -> Duration {
            Duration::from_millis(10)
        }
    }

    async fn wait_for_runs(counter: &Counter, runs: usize) -> bool {
        for _ in 0..200 {
            if counter.runs.load(Ordering::SeqCst) >= runs {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_cycles_keep_running_until_unscheduled() {
        let scheduler = TaskScheduler::new(Handle::current());
        let counter = Arc::new(Counter {
            runs: AtomicUsize::new(0),
            fail: true,
        });
        let id = scheduler.schedule(Arc::clone(&counter) as Arc<dyn PeriodicTask>);
        assert!(wait_for_runs(&counter, 3).await);

        assert!(scheduler.unschedule(id));
        assert!(!scheduler.unschedule(id));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let stopped = counter.runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), stopped);
    }
}
