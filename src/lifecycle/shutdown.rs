//! Shutdown coordination for the engine.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::lifecycle::tracker::InFlight;

/// Coordinator for graceful shutdown.
///
/// Carries the process-wide stop signal. The app hands a child of this
/// token to every streaming response, so triggering shutdown halts
/// long-running streams; `trigger_and_drain` then holds process exit until
/// in-flight work completes.
pub struct Shutdown {
    cancel: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self { cancel: CancellationToken::new() }
    }

    /// A token observing the shutdown signal. Streams and background work
    /// poll this to stop cooperatively.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.cancel.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn triggered(&self) {
        self.cancel.cancelled().await;
    }

    /// Trigger shutdown, then wait for in-flight work to drain.
    ///
    /// Returns `true` when everything completed within `max_wait`.
    pub async fn trigger_and_drain(
        &self,
        in_flight: &Arc<InFlight>,
        max_wait: Duration,
        check_interval: Duration,
    ) -> bool {
        self.trigger();
        tracing::info!(
            in_flight = in_flight.count(),
            "shutdown requested, waiting for in-flight work"
        );
        let drained = in_flight.drain(max_wait, check_interval).await;
        if drained {
            tracing::info!("all in-flight work completed");
        }
        drained
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_and_drain_waits_for_released_work() {
        let shutdown = Arc::new(Shutdown::new());
        let in_flight = InFlight::new();
        let guard = in_flight.enter();

        let observer = shutdown.clone();
        tokio::spawn(async move {
            observer.triggered().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(guard);
        });

        let drained = shutdown
            .trigger_and_drain(&in_flight, Duration::from_millis(500), Duration::from_millis(5))
            .await;
        assert!(drained);
        assert!(shutdown.is_triggered());
        assert_eq!(in_flight.count(), 0);
    }

    #[tokio::test]
    async fn trigger_and_drain_reports_deadline_miss() {
        let shutdown = Shutdown::new();
        let in_flight = InFlight::new();
        let _stuck = in_flight.enter();
        let drained = shutdown
            .trigger_and_drain(&in_flight, Duration::from_millis(20), Duration::from_millis(5))
            .await;
        assert!(!drained);
    }
}
