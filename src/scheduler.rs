//! Tick-driven scheduled tasks with cancellation tokens
//!
//! Timed work (auto-resolving alerts, lifting suppressions) is queued here and
//! executed only when the owner calls `take_due`, so nothing runs in the
//! background and tests can drive time explicitly.

use crate::events::Timestamp;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag used to cancel a scheduled task before it runs
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A task waiting for its due time
#[derive(Debug)]
struct ScheduledTask<T> {
    due: Timestamp,
    token: CancellationToken,
    task: T,
}

/// Queue of tasks released by explicit ticks
#[derive(Debug)]
pub struct Scheduler<T> {
    tasks: Vec<ScheduledTask<T>>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Queue a task to run at or after `due`
    ///
    /// # Returns
    ///
    /// A token that prevents the task from running once cancelled
    pub fn schedule(&mut self, due: Timestamp, task: T) -> CancellationToken {
        let token = CancellationToken::new();
        self.tasks.push(ScheduledTask {
            due,
            token: token.clone(),
            task,
        });
        token
    }

    /// Remove and return every due, non-cancelled task in due order
    ///
    /// Cancelled tasks are discarded whether or not they are due.
    pub fn take_due(&mut self, now: Timestamp) -> Vec<T> {
        self.tasks.retain(|entry| !entry.token.is_cancelled());

        let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|entry| entry.due <= now);
        self.tasks = pending;

        due.sort_by_key(|entry| entry.due);
        due.into_iter().map(|entry| entry.task).collect()
    }

    /// Number of tasks that are still waiting and not cancelled
    pub fn pending(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| !entry.token.is_cancelled())
            .count()
    }

    /// Cancel and drop every queued task
    pub fn cancel_all(&mut self) {
        for entry in self.tasks.drain(..) {
            entry.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_take_due_returns_only_due_tasks() {
        let mut scheduler = Scheduler::new();
        let now = Utc::now();

        scheduler.schedule(now + Duration::seconds(10), "later");
        scheduler.schedule(now - Duration::seconds(1), "due");

        assert_eq!(scheduler.take_due(now), vec!["due"]);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.take_due(now + Duration::seconds(10)), vec!["later"]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_due_tasks_come_back_in_due_order() {
        let mut scheduler = Scheduler::new();
        let now = Utc::now();

        scheduler.schedule(now - Duration::seconds(1), 2);
        scheduler.schedule(now - Duration::seconds(5), 1);
        scheduler.schedule(now, 3);

        assert_eq!(scheduler.take_due(now), vec![1, 2, 3]);
    }

    #[test]
    fn test_cancelled_task_never_runs() {
        let mut scheduler = Scheduler::new();
        let now = Utc::now();

        let token = scheduler.schedule(now, "cancel me");
        scheduler.schedule(now, "keep me");
        token.cancel();

        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.take_due(now), vec!["keep me"]);
    }

    #[test]
    fn test_cancel_all_flags_tokens() {
        let mut scheduler = Scheduler::new();
        let now = Utc::now();

        let token = scheduler.schedule(now + Duration::minutes(5), ());
        scheduler.cancel_all();

        assert!(token.is_cancelled());
        assert_eq!(scheduler.pending(), 0);
        assert!(scheduler.take_due(now + Duration::minutes(10)).is_empty());
    }
}
