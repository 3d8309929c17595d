//! Input activation plumbing.
//!
//! The engine only needs to know when the configured activation combination
//! (keys/buttons/axes) was last fully satisfied. Input sources write that
//! edge into an [`ActivationRecord`] asynchronously; the scan tick reads it
//! synchronously. Subscriptions are scoped: the guard returned by
//! [`InputSource::subscribe`] releases the observer when dropped, on every
//! exit path of a scan.

use anyhow::Result;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static TIME_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds since the process-wide monotonic origin.
pub fn monotonic_millis() -> u64 {
    TIME_ORIGIN.elapsed().as_millis() as u64
}

const NEVER: u64 = u64::MAX;

/// Last timestamp at which the configured activation combination was fully
/// satisfied. Written by input delivery, read by the scan tick.
#[derive(Debug)]
pub struct ActivationRecord {
    last_activated: AtomicU64,
}

impl ActivationRecord {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            last_activated: AtomicU64::new(NEVER),
        })
    }

    /// Record an activation edge at the current instant.
    pub fn touch(&self) {
        self.last_activated.store(monotonic_millis(), Ordering::Relaxed);
    }

    /// Milliseconds elapsed since the last activation edge, if any.
    pub fn millis_since_activation(&self) -> Option<u64> {
        match self.last_activated.load(Ordering::Relaxed) {
            NEVER => None,
            at => Some(monotonic_millis().saturating_sub(at)),
        }
    }

    /// `(now − lastActivationEdge) < timeout`, false when no edge was ever
    /// recorded.
    pub fn is_active_within(&self, timeout_ms: u64) -> bool {
        self.millis_since_activation()
            .is_some_and(|elapsed| elapsed < timeout_ms)
    }
}

/// Source of activation events (keyboard, controller, mouse).
pub trait InputSource: Send + Sync {
    /// Begin delivering activation edges into `record`. The returned guard
    /// stops delivery when dropped.
    fn subscribe(&self, record: Arc<ActivationRecord>) -> Result<InputSubscription>;
}

/// Scoped subscription guard. Dropping it releases the observer.
pub struct InputSubscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl InputSubscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Subscription with no release action, for sources that need none.
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for InputSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
