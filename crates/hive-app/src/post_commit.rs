//! Executor for work deferred until after a commit.

use crate::unit::AsyncAfterCommit;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Runs post-commit tasks off the committing thread.
///
/// Failures are logged and never reach the caller whose operation already
/// succeeded.
pub struct PostCommitExecutor {
    mode: Mode,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

enum Mode {
    Runtime(Handle),
    Inline,
}

impl PostCommitExecutor {
    /// Executor spawning blocking tasks on `handle`.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            mode: Mode::Runtime(handle),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Executor bound to the ambient tokio runtime, falling back to inline execution.
    #[must_use]
    pub fn current() -> Self {
        Handle::try_current().map_or_else(|_| Self::inline(), Self::new)
    }

    /// Executor running tasks right away on the committing thread.
    #[must_use]
    pub fn inline() -> Self {
        Self {
            mode: Mode::Inline,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Run `task`, logging any failure under `label`.
    pub fn submit(&self, label: &'static str, task: AsyncAfterCommit) {
        match &self.mode {
            Mode::Inline => run_logged(label, task),
            Mode::Runtime(handle) => {
                let join = handle.spawn_blocking(move || run_logged(label, task));
                let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                in_flight.retain(|task| !task.is_finished());
                in_flight.push(join);
            }
        }
    }

    /// Wait for every submitted task to finish.
    pub async fn drain(&self) {
        let pending: Vec<_> = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let count = pending.len();
        for task in pending {
            if let Err(err) = task.await {
                error!(error = %err, "Post-commit task panicked");
            }
        }
        if count > 0 {
            debug!(tasks = count, "Drained post-commit tasks");
        }
    }
}

fn run_logged(label: &'static str, task: AsyncAfterCommit) {
    if let Err(err) = task() {
        let message = format!("{err:#}");
        error!(task = label, error = %message, "Post-commit task failed");
    }
}

impl Default for PostCommitExecutor {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Debug for PostCommitExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            Mode::Runtime(_) => "runtime",
            Mode::Inline => "inline",
        };
        f.debug_struct("PostCommitExecutor")
            .field("mode", &mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread")]
    async fn drain_waits_for_spawned_tasks() {
        let executor = PostCommitExecutor::current();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let done = Arc::clone(&done);
            executor.submit(
                "count",
                Box::new(move || {
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
        executor.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_task_does_not_affect_others() {
        let executor = PostCommitExecutor::current();
        let done = Arc::new(AtomicUsize::new(0));
        executor.submit("fail", Box::new(|| Err(anyhow::anyhow!("boom"))));
        let counter = Arc::clone(&done);
        executor.submit(
            "count",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        executor.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn inline_runs_immediately_without_runtime() {
        let executor = PostCommitExecutor::current();
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        executor.submit(
            "count",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
