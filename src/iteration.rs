//! Iteration optimizer: shrinks the steady-state cost of `Manager::iterate`
//! when the common case is "few or zero active calls", via a cached count
//! fast path and a pool of reusable scratch slices.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::call::Call;
use crate::time::TimeSource;

/// A reusable buffer of call handles, returned to the pool after one
/// iteration tick.
pub type CallHandle = Arc<Call>;

/// Tunables for [`IterationOptimizer`].
#[derive(Debug, Clone)]
pub struct IterationOptimizerConfig {
    /// How long a cached "zero calls" result remains valid before the
    /// next tick must re-check the call table.
    pub cache_validity: chrono::Duration,
    /// Initial number of pre-allocated scratch slices in the pool.
    pub initial_pool_capacity: usize,
}

impl Default for IterationOptimizerConfig {
    fn default() -> Self {
        Self {
            cache_validity: chrono::Duration::milliseconds(100),
            initial_pool_capacity: 8,
        }
    }
}

/// A pool of scratch `Vec<CallHandle>` buffers, so the per-tick copy of
/// live call handles does not allocate on the steady-state path.
struct ScratchPool {
    free: Mutex<Vec<Vec<CallHandle>>>,
}

impl ScratchPool {
    fn new(initial_capacity: usize) -> Self {
        let mut free = Vec::with_capacity(initial_capacity);
        for _ in 0..initial_capacity {
            free.push(Vec::new());
        }
        Self {
            free: Mutex::new(free),
        }
    }

    fn acquire(&self) -> Vec<CallHandle> {
        self.free.lock().pop().unwrap_or_default()
    }

    /// Returns a slice to the pool, clearing its elements first so call
    /// references are not retained between ticks.
    fn release(&self, mut slice: Vec<CallHandle>) {
        slice.clear();
        self.free.lock().push(slice);
    }
}

/// Exponential moving average with a fixed smoothing factor, plus a
/// running peak.
struct LatencyTracker {
    ema_micros: AtomicI64,
    peak_micros: AtomicI64,
}

const EMA_ALPHA_PERCENT: i64 = 10; // alpha = 0.1, tracked as an integer percent

impl LatencyTracker {
    fn new() -> Self {
        Self {
            ema_micros: AtomicI64::new(0),
            peak_micros: AtomicI64::new(0),
        }
    }

    fn record(&self, sample_micros: i64) {
        self.peak_micros.fetch_max(sample_micros, Ordering::SeqCst);
        let mut current = self.ema_micros.load(Ordering::SeqCst);
        loop {
            let updated = current
                + (sample_micros - current) * EMA_ALPHA_PERCENT / 100;
            match self.ema_micros.compare_exchange_weak(
                current,
                updated,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    fn ema_micros(&self) -> i64 {
        self.ema_micros.load(Ordering::SeqCst)
    }

    fn peak_micros(&self) -> i64 {
        self.peak_micros.load(Ordering::SeqCst)
    }
}

/// Shrinks the steady-state cost of the manager's per-tick call-table
/// scan. See SPEC_FULL.md §9 for the pool's grounding.
pub struct IterationOptimizer {
    config: IterationOptimizerConfig,
    clock: Arc<dyn TimeSource>,
    pool: ScratchPool,
    total_iterations: AtomicU64,
    total_calls_processed: AtomicU64,
    detailed_logging: AtomicBool,
    profiling: AtomicBool,
    last_call_count: AtomicU64,
    last_update_nanos: AtomicI64,
    latency: LatencyTracker,
}

impl IterationOptimizer {
    /// Creates an optimizer with its scratch pool pre-filled.
    pub fn new(config: IterationOptimizerConfig, clock: Arc<dyn TimeSource>) -> Self {
        let pool = ScratchPool::new(config.initial_pool_capacity);
        Self {
            config,
            clock,
            pool,
            total_iterations: AtomicU64::new(0),
            total_calls_processed: AtomicU64::new(0),
            detailed_logging: AtomicBool::new(false),
            profiling: AtomicBool::new(false),
            last_call_count: AtomicU64::new(0),
            last_update_nanos: AtomicI64::new(i64::MIN),
            latency: LatencyTracker::new(),
        }
    }

    /// Enables or disables detailed (per-call) logging.
    pub fn set_detailed_logging(&self, enabled: bool) {
        self.detailed_logging.store(enabled, Ordering::SeqCst);
    }

    /// `true` if detailed logging is enabled.
    pub fn detailed_logging(&self) -> bool {
        self.detailed_logging.load(Ordering::SeqCst)
    }

    /// Enables or disables latency profiling.
    pub fn set_profiling(&self, enabled: bool) {
        self.profiling.store(enabled, Ordering::SeqCst);
    }

    /// `true` if latency profiling is enabled.
    pub fn profiling(&self) -> bool {
        self.profiling.load(Ordering::SeqCst)
    }

    /// Total number of ticks that reached the call-table scan (excludes
    /// ticks short-circuited by the cache).
    pub fn total_iterations(&self) -> u64 {
        self.total_iterations.load(Ordering::SeqCst)
    }

    /// Total number of call handles processed across all ticks.
    pub fn total_calls_processed(&self) -> u64 {
        self.total_calls_processed.load(Ordering::SeqCst)
    }

    /// Current EMA of iteration latency, in microseconds.
    pub fn ema_latency_micros(&self) -> i64 {
        self.latency.ema_micros()
    }

    /// Peak observed iteration latency, in microseconds.
    pub fn peak_latency_micros(&self) -> i64 {
        self.latency.peak_micros()
    }

    /// Returns a scratch slice to the pool, clearing it first.
    pub fn release(&self, slice: Vec<CallHandle>) {
        self.pool.release(slice);
    }

    /// Runs the fast-path/slow-path decision for one tick.
    ///
    /// `running` must reflect the manager's running flag at the moment
    /// the caller decides whether to scan; `collect` is invoked only when
    /// the cache is stale or previously non-empty, and must return the
    /// live call handles under the manager's read lock.
    ///
    /// Returns `(Some(slice), true)` when the caller must process a
    /// (possibly empty) slice and MUST return it via [`Self::release`];
    /// returns `(None, false)` when the cache fast path applies and no
    /// lock was taken.
    pub fn tick<F>(&self, running: bool, collect: F) -> (Option<Vec<CallHandle>>, bool)
    where
        F: FnOnce() -> Vec<CallHandle>,
    {
        let start = self.clock.now();
        let now_nanos = start.timestamp_nanos_opt().unwrap_or(0);

        let last_update = self.last_update_nanos.load(Ordering::SeqCst);
        let cache_fresh = last_update != i64::MIN
            && now_nanos - last_update < self.config.cache_validity.num_nanoseconds().unwrap_or(0);
        let cached_count = self.last_call_count.load(Ordering::SeqCst);

        if cache_fresh && cached_count == 0 {
            return (None, false);
        }

        let mut slice = self.pool.acquire();
        slice.extend(collect());

        if !running || slice.is_empty() {
            self.pool.release(slice);
            return (None, false);
        }

        self.last_call_count
            .store(slice.len() as u64, Ordering::SeqCst);
        self.last_update_nanos.store(now_nanos, Ordering::SeqCst);
        self.total_iterations.fetch_add(1, Ordering::SeqCst);
        self.total_calls_processed
            .fetch_add(slice.len() as u64, Ordering::SeqCst);

        if self.profiling.load(Ordering::SeqCst) {
            let elapsed = self.clock.now() - start;
            self.latency
                .record(elapsed.num_microseconds().unwrap_or(0));
        }

        (Some(slice), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use crate::types::{CallId, PeerId};

    fn sample_call(clock: Arc<ManualClock>, peer: u32) -> CallHandle {
        Arc::new(Call::new(PeerId(peer), CallId(peer), clock))
    }

    #[test]
    fn empty_table_short_circuits_after_first_scan() {
        let clock = Arc::new(ManualClock::new());
        let optimizer = IterationOptimizer::new(IterationOptimizerConfig::default(), clock.clone());

        let (slice, took_lock) = optimizer.tick(true, Vec::new);
        assert!(took_lock == false || slice.as_ref().map(|s| s.is_empty()).unwrap_or(true));
        // cache is now primed at zero; a fast second tick within the
        // cache window must not call `collect` at all.
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let called_clone = called.clone();
        let (slice2, took_lock2) = optimizer.tick(true, move || {
            called_clone.store(true, Ordering::SeqCst);
            Vec::new()
        });
        assert!(slice2.is_none());
        assert!(!took_lock2);
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn nonempty_slice_is_returned_and_poolable() {
        let clock = Arc::new(ManualClock::new());
        let optimizer = IterationOptimizer::new(IterationOptimizerConfig::default(), clock.clone());
        let call = sample_call(clock, 1);

        let (slice, took_lock) = optimizer.tick(true, || vec![call.clone()]);
        assert!(took_lock);
        let slice = slice.unwrap();
        assert_eq!(slice.len(), 1);
        optimizer.release(slice);
        assert_eq!(optimizer.total_calls_processed(), 1);
        assert_eq!(optimizer.total_iterations(), 1);
    }

    #[test]
    fn released_slice_is_cleared() {
        let clock = Arc::new(ManualClock::new());
        let optimizer = IterationOptimizer::new(IterationOptimizerConfig::default(), clock.clone());
        let call = sample_call(clock, 1);
        let mut slice = optimizer.tick(true, || vec![call]).0.unwrap();
        optimizer.release(std::mem::take(&mut slice));
        let reused = optimizer.tick(true, Vec::new).0;
        // after release the pool slice must have been emptied; a
        // subsequent empty collect should indeed yield an empty/absent
        // result rather than leaking the old handle.
        assert!(reused.is_none() || reused.unwrap().is_empty());
    }

    #[test]
    fn not_running_drops_to_none() {
        let clock = Arc::new(ManualClock::new());
        let optimizer = IterationOptimizer::new(IterationOptimizerConfig::default(), clock.clone());
        let call = sample_call(clock, 1);
        let (slice, took_lock) = optimizer.tick(false, || vec![call]);
        assert!(slice.is_none());
        assert!(!took_lock);
    }

    #[test]
    fn profiling_updates_latency_tracker_when_enabled() {
        let clock = Arc::new(ManualClock::new());
        let optimizer = IterationOptimizer::new(IterationOptimizerConfig::default(), clock.clone());
        optimizer.set_profiling(true);
        let call = sample_call(clock, 1);
        let (slice, _) = optimizer.tick(true, || vec![call]);
        optimizer.release(slice.unwrap());
        assert!(optimizer.ema_latency_micros() >= 0);
        assert!(optimizer.peak_latency_micros() >= 0);
    }
}
