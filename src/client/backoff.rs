//! Jittered exponential backoff for the retry loop.

use std::time::Duration;

use rand::Rng;

/// Delay before retry `attempt` (1-based). Doubles per attempt, capped at
/// `max_ms`, plus 0 to 10% jitter.
pub(crate) fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }
    let exponential = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(exponential).min(max_ms);
    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_cap() {
        assert!(backoff_delay(1, 100, 2_000).as_millis() >= 100);
        assert!(backoff_delay(2, 100, 2_000).as_millis() >= 200);
        let capped = backoff_delay(10, 100, 1_000);
        assert!(capped.as_millis() >= 1_000 && capped.as_millis() <= 1_100);
    }

    #[test]
    fn zeroth_attempt_has_no_delay() {
        assert_eq!(backoff_delay(0, 100, 1_000), Duration::ZERO);
    }
}
