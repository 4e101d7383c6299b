//! Process-wide failure capture
//!
//! Panics (through a chained panic hook) and failed async tasks (through
//! `JoinHandle` supervision) are queued in a bounded inbox. Nothing is
//! tracked from inside the hook; the inbox is drained into the error tracker
//! on the next tick.

use crate::alerts::dispatch::panic_message;
use crate::events::Timestamp;
use chrono::Utc;
use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt::Display;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Default inbox capacity
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOrigin {
    /// A panic on any thread
    Panic,
    /// An async task that panicked or returned an error
    Task,
}

/// A failure waiting to be tracked
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFailure {
    pub origin: CaptureOrigin,
    pub message: String,
    pub location: Option<String>,
    pub thread: Option<String>,
    pub timestamp: Timestamp,
}

/// Bounded inbox fed by the panic hook and task supervisors
///
/// Clones share the same inbox.
#[derive(Debug, Clone)]
pub struct GlobalCapture {
    inbox: Arc<Mutex<VecDeque<CapturedFailure>>>,
    capacity: usize,
    active: Arc<AtomicBool>,
}

impl Default for GlobalCapture {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl GlobalCapture {
    pub fn new(capacity: usize) -> Self {
        Self {
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install a panic hook that records panics and then runs the previous hook
    ///
    /// Installing twice on the same inbox is a no-op.
    pub fn install(&self) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }

        let previous = panic::take_hook();
        let capture = self.clone();
        panic::set_hook(Box::new(move |info| {
            if capture.active.load(Ordering::SeqCst) {
                capture.push(CapturedFailure {
                    origin: CaptureOrigin::Panic,
                    message: panic_message(info.payload()),
                    location: info
                        .location()
                        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
                    thread: std::thread::current().name().map(str::to_string),
                    timestamp: Utc::now(),
                });
            }
            previous(info);
        }));
        debug!("Global failure capture installed");
    }

    /// Stop recording panics
    ///
    /// The hook stays chained but only forwards to the previous hook.
    pub fn uninstall(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            debug!("Global failure capture disabled");
        }
    }

    pub fn is_installed(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Queue a failure, evicting the oldest one when full
    pub fn push(&self, failure: CapturedFailure) {
        let mut inbox = self.lock();
        if inbox.len() >= self.capacity {
            inbox.pop_front();
        }
        inbox.push_back(failure);
    }

    /// Queue an error reported by an async task
    pub fn record_task_failure(&self, message: impl Into<String>) {
        self.push(CapturedFailure {
            origin: CaptureOrigin::Task,
            message: message.into(),
            location: None,
            thread: None,
            timestamp: Utc::now(),
        });
    }

    /// Await a task, recording it if it panicked
    ///
    /// # Returns
    ///
    /// The task's output, or `None` if it panicked or was cancelled
    pub async fn supervise<T>(&self, handle: JoinHandle<T>) -> Option<T> {
        match handle.await {
            Ok(output) => Some(output),
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                self.record_task_failure(format!(
                    "Task panicked: {}",
                    panic_message(payload.as_ref())
                ));
                None
            }
            Err(e) => {
                debug!("Supervised task did not complete: {}", e);
                None
            }
        }
    }

    /// Await a fallible task, recording a panic or a returned error
    pub async fn supervise_result<T, E: Display>(
        &self,
        handle: JoinHandle<Result<T, E>>,
    ) -> Option<T> {
        match self.supervise(handle).await? {
            Ok(output) => Some(output),
            Err(e) => {
                warn!("Supervised task failed: {}", e);
                self.record_task_failure(format!("Task failed: {}", e));
                None
            }
        }
    }

    /// Take every queued failure, oldest first
    pub fn drain(&self) -> Vec<CapturedFailure> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CapturedFailure>> {
        // A poisoned inbox still holds valid entries
        self.inbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
