//! In-flight work tracking.
//!
//! Counts requests and background tasks process-wide so shutdown can hold
//! off until the count drains to zero or a deadline passes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Process-wide counter of in-flight requests and background tasks.
#[derive(Default)]
pub struct InFlight {
    count: AtomicUsize,
}

/// RAII guard decrementing the counter on drop.
pub struct InFlightGuard {
    tracker: Arc<InFlight>,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one unit of in-flight work.
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { tracker: self.clone() }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until the count drains to zero or `max_wait` elapses.
    ///
    /// Returns `true` when everything completed within the deadline.
    pub async fn drain(&self, max_wait: Duration, check_interval: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + max_wait;
        while self.count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    remaining = self.count(),
                    "drain deadline reached with work still in flight"
                );
                return false;
            }
            tokio::time::sleep(check_interval).await;
        }
        true
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.count.fetch_sub(1, Ordering::SeqCst);
    }
}
