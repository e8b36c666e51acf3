//! Per-object exponential backoff for failed reconciliations

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::adapters::ObjectIdentity;

/// Largest exponent applied to the base delay
const MAX_DOUBLINGS: u32 = 16;

/// Delay before retry number `failures` (1-based)
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(MAX_DOUBLINGS);
    base.saturating_mul(1u32 << exponent).min(max)
}

/// Consecutive failure counts, reset once an object reconciles cleanly
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ObjectIdentity, u32>>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Count a failure for `id` and return how long to wait before retrying
    pub fn next_delay(&self, id: &ObjectIdentity) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        let count = failures.entry(id.clone()).or_insert(0);
        *count = count.saturating_add(1);
        backoff_delay(self.base, self.max, *count)
    }

    /// The longest delay, used for errors a retry cannot fix
    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// Number of objects with outstanding failures
    pub fn tracked(&self) -> usize {
        self.failures.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Forget the failures of `id`
    pub fn reset(&self, id: &ObjectIdentity) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(5);
    const MAX: Duration = Duration::from_secs(300);

    #[test]
    fn delay_doubles_until_capped() {
        assert_eq!(backoff_delay(BASE, MAX, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(BASE, MAX, 2), Duration::from_secs(10));
        assert_eq!(backoff_delay(BASE, MAX, 3), Duration::from_secs(20));
        assert_eq!(backoff_delay(BASE, MAX, 7), MAX);
        assert_eq!(backoff_delay(BASE, MAX, u32::MAX), MAX);
    }

    #[test]
    fn failures_are_tracked_per_object() {
        let backoff = Backoff::new(BASE, MAX);
        let web = ObjectIdentity::new("default", "web");
        let api = ObjectIdentity::new("default", "api");

        assert_eq!(backoff.next_delay(&web), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(&web), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(&api), Duration::from_secs(5));

        backoff.reset(&web);
        assert_eq!(backoff.next_delay(&web), Duration::from_secs(5));
    }
}
