//! Per-key retry accounting for failed reconciles.
//!
//! The controller's scheduler owns the delay itself; this module only
//! decides how long to ask for and when to stop asking.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use kube::runtime::controller::Action;

use super::key::ObjectKey;

/// First retry delay.
pub const BASE_DELAY: Duration = Duration::from_millis(5);

/// Longest delay between retries.
pub const MAX_DELAY: Duration = Duration::from_secs(1000);

/// `base * 2^failures`, capped at `cap`.
pub fn backoff(base: Duration, cap: Duration, failures: u32) -> Duration {
    2u32.checked_pow(failures)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |d| d.min(cap))
}

/// Consecutive failures per function. Synchronous so `error_policy` can
/// use it directly.
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<ObjectKey, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failure for `key` and return the new total.
    pub fn increment(&self, key: &ObjectKey) -> u32 {
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = attempts.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset(&self, key: &ObjectKey) {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }

    pub fn get(&self, key: &ObjectKey) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

/// What to do after the `attempt`-th consecutive failure: requeue with
/// backoff while under `max_retries`, otherwise wait for the next change.
pub fn retry_action(attempt: u32, max_retries: u32) -> Action {
    if attempt > max_retries {
        Action::await_change()
    } else {
        Action::requeue(backoff(
            BASE_DELAY,
            MAX_DELAY,
            attempt.saturating_sub(1),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff(BASE_DELAY, MAX_DELAY, 0), Duration::from_millis(5));
        assert_eq!(backoff(BASE_DELAY, MAX_DELAY, 1), Duration::from_millis(10));
        assert_eq!(backoff(BASE_DELAY, MAX_DELAY, 4), Duration::from_millis(80));
        assert_eq!(backoff(BASE_DELAY, MAX_DELAY, 30), MAX_DELAY);
        assert_eq!(backoff(BASE_DELAY, MAX_DELAY, 64), MAX_DELAY);
    }

    #[test]
    fn tracker_counts_and_resets_per_key() {
        let tracker = RetryTracker::new();
        let a = ObjectKey::new("default", "a");
        let b = ObjectKey::new("default", "b");

        assert_eq!(tracker.get(&a), 0);
        assert_eq!(tracker.increment(&a), 1);
        assert_eq!(tracker.increment(&a), 2);
        assert_eq!(tracker.increment(&b), 1);

        tracker.reset(&a);
        assert_eq!(tracker.get(&a), 0);
        assert_eq!(tracker.get(&b), 1);
    }

    #[test]
    fn retries_back_off_until_the_budget_is_spent() {
        assert_eq!(retry_action(1, 5), Action::requeue(Duration::from_millis(5)));
        assert_eq!(retry_action(3, 5), Action::requeue(Duration::from_millis(20)));
        assert_eq!(retry_action(5, 5), Action::requeue(Duration::from_millis(80)));
        assert_eq!(retry_action(6, 5), Action::await_change());
        assert_eq!(retry_action(1, 0), Action::await_change());
    }
}
