//! System-wide metrics aggregation: rolling per-call history, recomputed
//! system summary, and a cooperative tokio reporter task.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::time::TimeSource;
use crate::types::{
    AggregatedReport, CallMetrics, CallMetricsHistory, PeerId, QualityLevel, SystemMetrics,
};

/// Maximum number of historical snapshots retained per call.
const MAX_HISTORY_LEN: usize = 60;

/// Tunables for [`MetricsAggregator`].
#[derive(Debug, Clone)]
pub struct MetricsAggregatorConfig {
    /// Cadence at which the reporter task builds and dispatches a report.
    pub report_interval: chrono::Duration,
}

impl Default for MetricsAggregatorConfig {
    fn default() -> Self {
        Self {
            report_interval: chrono::Duration::seconds(5),
        }
    }
}

/// Callback invoked with a fresh [`AggregatedReport`] on each reporter tick.
pub type ReportCallback = Arc<dyn Fn(AggregatedReport) + Send + Sync>;

struct AggregatorState {
    histories: HashMap<PeerId, CallMetricsHistory>,
    system: SystemMetrics,
    total_calls: u64,
    failed_calls: u64,
}

/// Aggregates per-call metrics into rolling histories and a recomputed
/// system-wide summary, and optionally runs a background reporter task.
pub struct MetricsAggregator {
    config: MetricsAggregatorConfig,
    clock: Arc<dyn TimeSource>,
    state: RwLock<AggregatorState>,
    callback: RwLock<Option<ReportCallback>>,
    shutdown: RwLock<Option<watch::Sender<bool>>>,
}

impl MetricsAggregator {
    /// Creates an aggregator with an empty call table.
    pub fn new(config: MetricsAggregatorConfig, clock: Arc<dyn TimeSource>) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            state: RwLock::new(AggregatorState {
                histories: HashMap::new(),
                system: SystemMetrics {
                    last_update: now,
                    ..Default::default()
                },
                total_calls: 0,
                failed_calls: 0,
            }),
            callback: RwLock::new(None),
            shutdown: RwLock::new(None),
        }
    }

    /// Registers (or clears) the report callback consumed by the reporter
    /// task.
    pub fn set_report_callback(&self, cb: Option<ReportCallback>) {
        *self.callback.write() = cb;
    }

    /// Begins tracking `peer`, incrementing the monotonic total-calls
    /// counter. Idempotent: tracking an already-tracked peer is a no-op
    /// beyond refreshing `last_update`.
    pub fn start_call_tracking(&self, peer: PeerId) {
        let mut state = self.state.write();
        if !state.histories.contains_key(&peer) {
            state.histories.insert(peer, CallMetricsHistory::default());
            state.total_calls += 1;
        }
        self.recompute_system(&mut state);
    }

    /// Stops tracking `peer`. If `failed` is set, counts it toward
    /// `failed_calls`.
    pub fn stop_call_tracking(&self, peer: PeerId, failed: bool) {
        let mut state = self.state.write();
        if state.histories.remove(&peer).is_some() && failed {
            state.failed_calls += 1;
        }
        self.recompute_system(&mut state);
    }

    /// Records a fresh snapshot for `peer`, pushing the previous
    /// `current` onto history (capped at [`MAX_HISTORY_LEN`]) and
    /// recomputing the system summary.
    pub fn record_metrics(&self, peer: PeerId, metrics: CallMetrics) {
        let mut state = self.state.write();
        let entry = state.histories.entry(peer).or_default();
        if let Some(previous) = entry.current.replace(metrics) {
            entry.history.push(previous);
            if entry.history.len() > MAX_HISTORY_LEN {
                let overflow = entry.history.len() - MAX_HISTORY_LEN;
                entry.history.drain(0..overflow);
            }
        }
        self.recompute_system(&mut state);
    }

    /// A snapshot of the current system-wide summary.
    pub fn system_metrics(&self) -> SystemMetrics {
        self.state.read().system.clone()
    }

    /// The tracked history for `peer`, if any.
    pub fn call_history(&self, peer: PeerId) -> Option<CallMetricsHistory> {
        self.state.read().histories.get(&peer).cloned()
    }

    /// Number of calls currently tracked.
    pub fn active_call_count(&self) -> u64 {
        self.state.read().histories.len() as u64
    }

    /// Monotonic count of calls ever tracked.
    pub fn total_call_count(&self) -> u64 {
        self.state.read().total_calls
    }

    fn recompute_system(&self, state: &mut AggregatorState) {
        let active = state.histories.len() as u64;
        let now = self.clock.now();

        if active == 0 {
            state.system = SystemMetrics {
                active_calls: 0,
                total_calls: state.total_calls,
                failed_calls: state.failed_calls,
                last_update: now,
                ..Default::default()
            };
            return;
        }

        let mut sum_loss = 0.0;
        let mut sum_jitter = 0.0;
        let mut sum_bitrate = 0.0;
        let mut sum_duration = 0.0;
        let (mut excellent, mut good, mut fair, mut poor) = (0u64, 0u64, 0u64, 0u64);

        for history in state.histories.values() {
            if let Some(m) = &history.current {
                sum_loss += m.packet_loss_pct;
                sum_jitter += m.jitter_ms;
                sum_bitrate += (m.audio_bps + m.video_bps) as f64;
                sum_duration += m.call_duration_ms as f64;
                match m.quality_level {
                    QualityLevel::Excellent => excellent += 1,
                    QualityLevel::Good => good += 1,
                    QualityLevel::Fair => fair += 1,
                    QualityLevel::Poor | QualityLevel::Unacceptable => poor += 1,
                }
            }
        }

        let n = active as f64;
        state.system = SystemMetrics {
            active_calls: active,
            total_calls: state.total_calls,
            failed_calls: state.failed_calls,
            avg_packet_loss_pct: sum_loss / n,
            avg_jitter_ms: sum_jitter / n,
            avg_bitrate_bps: sum_bitrate / n,
            avg_duration_ms: sum_duration / n,
            excellent_count: excellent,
            good_count: good,
            fair_count: fair,
            poor_count: poor,
            last_update: now,
        };
    }

    /// Majority-rule overall quality across tracked calls.
    ///
    /// No active calls yields `Excellent`. Otherwise: a poor-bucket
    /// majority yields `Poor`; a poor-or-fair majority yields `Fair`;
    /// a good-or-excellent majority yields `Excellent` if excellent
    /// outnumbers good, else `Good`; anything else is `Good`.
    pub fn overall_quality(&self) -> QualityLevel {
        let state = self.state.read();
        let s = &state.system;
        if s.active_calls == 0 {
            return QualityLevel::Excellent;
        }
        let half = s.active_calls as f64 / 2.0;
        if s.poor_count as f64 > half {
            return QualityLevel::Poor;
        }
        if (s.fair_count + s.poor_count) as f64 > half {
            return QualityLevel::Fair;
        }
        if (s.good_count + s.excellent_count) as f64 > half {
            return if s.excellent_count > s.good_count {
                QualityLevel::Excellent
            } else {
                QualityLevel::Good
            };
        }
        QualityLevel::Good
    }

    /// Builds one [`AggregatedReport`] snapshot.
    pub fn build_report(&self) -> AggregatedReport {
        let state = self.state.read();
        let per_call = state
            .histories
            .iter()
            .filter_map(|(peer, h)| h.current.map(|m| (*peer, m)))
            .collect();
        AggregatedReport {
            system: state.system.clone(),
            per_call,
            overall_quality: self.overall_quality(),
            timestamp: self.clock.now(),
            interval: self.config.report_interval,
        }
    }

    /// Spawns the reporter task, which builds and dispatches a report on
    /// every `report_interval` tick until [`Self::stop`] is called.
    ///
    /// A second call while already running is a no-op; callers that need
    /// a different interval must `stop` first.
    pub fn start(self: &Arc<Self>) {
        let mut shutdown = self.shutdown.write();
        if shutdown.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *shutdown = Some(tx);
        drop(shutdown);

        let aggregator = self.clone();
        let interval = std::time::Duration::from_millis(
            aggregator.config.report_interval.num_milliseconds().max(0) as u64,
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = aggregator.build_report();
                        let cb = aggregator.callback.read().clone();
                        if let Some(cb) = cb {
                            cb(report);
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Signals the reporter task to exit on its next wakeup. Safe to call
    /// when the reporter was never started.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown.write().take() {
            let _ = tx.send(true);
        }
    }
}
