//! Cancellable, progress-reporting wrapper around one unit of background
//! work. Every scan pipeline in the engine is expressed as one trackable
//! task: callers start it, observe progress, optionally request cancellation
//! and await the terminal outcome.

use log::error;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Terminal outcome of a trackable task.
///
/// The caller always receives one of these, never an unhandled fault; the
/// task body converts cancellation and internal failures into `Cancelled`
/// and `Failed` after logging them.
#[derive(Debug, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Completed(T),
    Cancelled,
    Failed,
}

impl<T> TaskOutcome<T> {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }

    /// The result, if the task completed normally.
    pub fn into_completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

/// Monotonically updated done/total progress counter pair.
#[derive(Debug, Default)]
pub struct TaskProgress {
    done: AtomicU64,
    total: AtomicU64,
}

impl TaskProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, done: u64, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.done.store(done, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64) {
        (self.done.load(Ordering::Relaxed), self.total.load(Ordering::Relaxed))
    }

    pub fn fraction(&self) -> f64 {
        let (done, total) = self.snapshot();
        if total == 0 {
            0.0
        } else {
            done as f64 / total as f64
        }
    }
}

/// Execution context handed to the task body.
#[derive(Clone)]
pub struct TaskContext {
    token: CancellationToken,
    progress: Arc<TaskProgress>,
}

impl TaskContext {
    /// Cooperative cancellation check, consulted at stage boundaries.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    pub fn progress(&self) -> &TaskProgress {
        &self.progress
    }
}

/// Handle to a running background task. The caller holds this handle, never
/// the internal execution state.
pub struct TrackableTask<T> {
    name: String,
    token: CancellationToken,
    progress: Arc<TaskProgress>,
    handle: JoinHandle<TaskOutcome<T>>,
}

impl<T: Send + 'static> TrackableTask<T> {
    /// Spawn the task body on the supplied runtime. The body receives a
    /// [`TaskContext`] and must resolve to a terminal [`TaskOutcome`].
    pub fn spawn<F, Fut>(name: impl Into<String>, runtime: &tokio::runtime::Handle, body: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = TaskOutcome<T>> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let progress = Arc::new(TaskProgress::new());
        let ctx = TaskContext {
            token: token.clone(),
            progress: Arc::clone(&progress),
        };
        let handle = runtime.spawn(body(ctx));
        Self {
            name,
            token,
            progress,
            handle,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request cooperative cancellation. Observed at stage boundaries, never
    /// preemptively mid-unit-of-work.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn progress(&self) -> (u64, u64) {
        self.progress.snapshot()
    }

    /// Await the terminal outcome. A panicked task body is reported as
    /// `Failed`, never propagated.
    pub async fn outcome(self) -> TaskOutcome<T> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("task '{}' panicked: {}", self.name, e);
                TaskOutcome::Failed
            }
        }
    }
}
