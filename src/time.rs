//! Injectable "now" provider.
//!
//! Every component that reasons about elapsed time (call timeouts, adapter
//! windows, iteration cache validity) consumes it through this trait
//! instead of calling a global clock directly, so tests can advance time
//! deterministically without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A source of the current instant.
///
/// Implementations must be cheap to call repeatedly (the iteration loop
/// calls it once per active call per tick) and must be monotonic from the
/// caller's point of view: two calls in happens-before order must not
/// observe time moving backwards.
pub trait TimeSource: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Production time source: wraps [`chrono::Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually-advanced clock for deterministic tests.
///
/// Starts at the Unix epoch unless constructed with [`ManualClock::at`].
/// `advance` moves the clock forward; the clock never moves backwards.
#[derive(Debug, Clone)]
pub struct ManualClock {
    nanos_since_epoch: Arc<AtomicI64>,
}

impl ManualClock {
    /// A clock starting at the Unix epoch.
    pub fn new() -> Self {
        Self::at(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// A clock starting at the given instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            nanos_since_epoch: Arc::new(AtomicI64::new(
                instant.timestamp_nanos_opt().unwrap_or(0),
            )),
        }
    }

    /// Advances the clock by `duration`. Panics on an attempt to go
    /// backwards, since the contract is monotonic.
    pub fn advance(&self, duration: chrono::Duration) {
        let delta = duration.num_nanoseconds().unwrap_or(0);
        assert!(delta >= 0, "ManualClock can only advance forward");
        self.nanos_since_epoch.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let nanos = self.nanos_since_epoch.load(Ordering::SeqCst);
        DateTime::<Utc>::from_timestamp(
            nanos / 1_000_000_000,
            (nanos.rem_euclid(1_000_000_000)) as u32,
        )
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_roughly_now() {
        let before = Utc::now();
        let sampled = SystemClock.now();
        let after = Utc::now();
        assert!(sampled >= before && sampled <= after);
    }

    #[test]
    fn manual_clock_starts_at_epoch_and_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), DateTime::<Utc>::UNIX_EPOCH);
        clock.advance(chrono::Duration::milliseconds(150));
        assert_eq!(
            clock.now(),
            DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::milliseconds(150)
        );
    }

    #[test]
    fn manual_clock_is_shared_across_clones() {
        let clock = ManualClock::new();
        let clone = clock.clone();
        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(clone.now(), clock.now());
    }

    #[test]
    #[should_panic(expected = "forward")]
    fn manual_clock_rejects_negative_advance() {
        let clock = ManualClock::new();
        clock.advance(chrono::Duration::milliseconds(-1));
    }
}
