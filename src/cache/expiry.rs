//! Wall-clock source and max-age arithmetic shared by every reader and writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use time::OffsetDateTime;

/// Seconds since the Unix epoch.
pub type EpochSeconds = i64;

/// Source of "now" for expiry and delayed-purge decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> EpochSeconds;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> EpochSeconds {
        OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// A clock that only moves when told to. Used to drive expiry and delayed
/// invalidation deterministically.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: EpochSeconds) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn set(&self, now: EpochSeconds) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(SystemClock.now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> EpochSeconds {
        self.now.load(Ordering::SeqCst)
    }
}

/// Expiry rules for cache items.
pub struct ExpiryPolicy;

impl ExpiryPolicy {
    /// Absolute expiry for an item written at `now` with the given max-age.
    pub fn expires_at(now: EpochSeconds, max_age: u64) -> EpochSeconds {
        let max_age = i64::try_from(max_age).unwrap_or(i64::MAX);
        now.saturating_add(max_age)
    }

    /// An item is stale from the second its expiry is reached.
    pub fn is_expired(expires: Option<EpochSeconds>, now: EpochSeconds) -> bool {
        expires.is_some_and(|expires| now >= expires)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_expiry_never_expires() {
        assert!(!ExpiryPolicy::is_expired(None, i64::MAX));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let expires = ExpiryPolicy::expires_at(1_000, 60);
        assert_eq!(expires, 1_060);
        assert!(!ExpiryPolicy::is_expired(Some(expires), 1_059));
        assert!(ExpiryPolicy::is_expired(Some(expires), 1_060));
    }

    #[test]
    fn past_expiry_is_expired() {
        assert!(ExpiryPolicy::is_expired(Some(1_000), 5_000));
    }

    #[test]
    fn huge_max_age_saturates() {
        assert_eq!(ExpiryPolicy::expires_at(10, u64::MAX), i64::MAX);
    }

    #[test]
    fn manual_clock_moves_on_demand() {
        let clock = ManualClock::new(100);
        let shared = clock.clone();
        clock.advance(5);
        assert_eq!(shared.now(), 105);
        shared.set(7);
        assert_eq!(clock.now(), 7);
    }
}
