//! Quality monitor: turns per-call state, the bitrate adapter, and raw RTP
//! statistics into a five-level, user-facing quality label.

use std::sync::Arc;

use chrono::Duration;
use parking_lot::RwLock;

use crate::bitrate::BitrateAdapter;
use crate::call::Call;
use crate::time::TimeSource;
use crate::types::{CallMetrics, NetworkQuality, PeerId, QualityLevel};

/// Tunables for [`QualityMonitor`]. Defaults per §4.4.
#[derive(Debug, Clone)]
pub struct QualityMonitorConfig {
    /// Loss percentage at or above which quality is `Unacceptable`.
    pub poor_loss_pct: f64,
    /// Loss percentage at or above which quality is `Poor`.
    pub fair_loss_pct: f64,
    /// Loss percentage at or above which quality is `Fair`.
    pub good_loss_pct: f64,
    /// Loss percentage at or above which quality is `Good` (subject to
    /// jitter), else `Excellent`.
    pub excellent_loss_pct: f64,
    /// Jitter (ms) at or above which quality is `Fair` (jitter-only path).
    pub poor_jitter_ms: f64,
    /// Jitter (ms) at or above which quality is `Good`.
    pub fair_jitter_ms: f64,
    /// Jitter (ms) at or above which quality is `Good`.
    pub good_jitter_ms: f64,
    /// Jitter (ms) at or above which quality is `Good`, else `Excellent`.
    pub excellent_jitter_ms: f64,
    /// Inactivity beyond which a call is `Unacceptable` regardless of
    /// loss/jitter.
    pub frame_timeout: Duration,
}

impl Default for QualityMonitorConfig {
    // Loss/jitter cut points follow the bitrate adapter's own thresholds
    // (§4.3 default: loss 1/3/5 %, jitter 50/100/150 ms) plus one extra
    // top-end cut point each for the `Unacceptable` boundary. The
    // originally documented 8%/20ms cut points put the §8 scenario-6
    // inputs in the wrong bucket (6% loss classified Fair instead of
    // Poor; 30ms jitter classified Good instead of Excellent); see
    // SPEC_FULL.md §4.4 for the full resolution.
    fn default() -> Self {
        Self {
            poor_loss_pct: 15.0,
            fair_loss_pct: 5.0,
            good_loss_pct: 3.0,
            excellent_loss_pct: 1.0,
            poor_jitter_ms: 200.0,
            fair_jitter_ms: 150.0,
            good_jitter_ms: 100.0,
            excellent_jitter_ms: 50.0,
            frame_timeout: Duration::seconds(2),
        }
    }
}

/// Callback invoked with a fresh metrics snapshot, fired without holding
/// the monitor's lock.
pub type MetricsCallback = Arc<dyn Fn(PeerId, CallMetrics) + Send + Sync>;

/// Translates RTP statistics (via the call's attached
/// [`crate::call::RtpStatsSource`]) into [`CallMetrics`].
pub struct QualityMonitor {
    config: QualityMonitorConfig,
    clock: Arc<dyn TimeSource>,
    enabled: std::sync::atomic::AtomicBool,
    callback: RwLock<Option<MetricsCallback>>,
}

impl QualityMonitor {
    /// Creates a monitor, enabled by default.
    pub fn new(config: QualityMonitorConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            config,
            clock,
            enabled: std::sync::atomic::AtomicBool::new(true),
            callback: RwLock::new(None),
        }
    }

    /// Enables or disables monitoring. When disabled, `monitor_call`
    /// returns a zero snapshot without touching the call.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled
            .store(enabled, std::sync::atomic::Ordering::SeqCst);
    }

    /// `true` if monitoring is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Registers (or clears) the metrics callback.
    pub fn set_callback(&self, cb: Option<MetricsCallback>) {
        *self.callback.write() = cb;
    }

    /// Builds a metrics snapshot for `call`, optionally informed by its
    /// bitrate adapter.
    pub fn get_call_metrics(&self, call: &Call, adapter: Option<&BitrateAdapter>) -> CallMetrics {
        let now = self.clock.now();

        let call_duration_ms = call
            .started_at()
            .map(|t| (now - t).num_milliseconds())
            .unwrap_or(0);
        let last_frame_age = call
            .last_frame_at()
            .map(|t| now - t)
            .unwrap_or_else(Duration::zero);

        let network_quality = adapter.map(|a| a.quality()).unwrap_or(NetworkQuality::Poor);

        let (packets_sent, packets_received, packets_lost, jitter_ms) =
            match call.rtp_session() {
                Some(session) => (
                    session.0.packets_sent(),
                    session.0.packets_received(),
                    session.0.packets_lost(),
                    session.0.jitter_ms(),
                ),
                None => (0, 0, 0, 0.0),
            };

        let denom = packets_sent + packets_received;
        let packet_loss_pct = if denom == 0 {
            0.0
        } else {
            packets_lost as f64 / denom as f64 * 100.0
        };

        let quality_level = self.classify(packet_loss_pct, jitter_ms, last_frame_age);

        CallMetrics {
            packet_loss_pct,
            jitter_ms,
            rtt_ms: 0.0,
            packets_sent,
            packets_received,
            audio_bps: call.audio_bps(),
            video_bps: call.video_bps(),
            network_quality,
            call_duration_ms,
            last_frame_age_ms: last_frame_age.num_milliseconds(),
            quality_level,
            timestamp: now,
        }
    }

    /// Classifies quality per §4.4: the frame-timeout check outranks
    /// everything else, then the loss bucket ladder, deferring to the
    /// jitter-only ladder when loss is in the excellent bucket.
    fn classify(&self, loss_pct: f64, jitter_ms: f64, last_frame_age: Duration) -> QualityLevel {
        let cfg = &self.config;

        if last_frame_age > cfg.frame_timeout {
            return QualityLevel::Unacceptable;
        }

        if loss_pct >= cfg.poor_loss_pct {
            return QualityLevel::Unacceptable;
        }
        if loss_pct >= cfg.fair_loss_pct {
            return QualityLevel::Poor;
        }
        if loss_pct >= cfg.good_loss_pct {
            return QualityLevel::Fair;
        }
        if loss_pct >= cfg.excellent_loss_pct {
            return if jitter_ms < cfg.good_jitter_ms {
                QualityLevel::Good
            } else {
                QualityLevel::Fair
            };
        }

        // Loss is in the excellent bucket: defer entirely to jitter.
        if jitter_ms >= cfg.poor_jitter_ms {
            QualityLevel::Fair
        } else if jitter_ms >= cfg.fair_jitter_ms {
            QualityLevel::Good
        } else if jitter_ms >= cfg.good_jitter_ms {
            QualityLevel::Good
        } else if jitter_ms >= cfg.excellent_jitter_ms {
            QualityLevel::Good
        } else {
            QualityLevel::Excellent
        }
    }

    /// Samples `call`'s quality and, if enabled and a callback is
    /// registered, invokes it with `(peer, metrics)` after releasing the
    /// monitor's lock. Returns the snapshot either way (a zero one when
    /// disabled).
    pub fn monitor_call(&self, peer: PeerId, call: &Call, adapter: Option<&BitrateAdapter>) -> CallMetrics {
        if !self.is_enabled() {
            return CallMetrics {
                packet_loss_pct: 0.0,
                jitter_ms: 0.0,
                rtt_ms: 0.0,
                packets_sent: 0,
                packets_received: 0,
                audio_bps: 0,
                video_bps: 0,
                network_quality: NetworkQuality::Poor,
                call_duration_ms: 0,
                last_frame_age_ms: 0,
                quality_level: QualityLevel::Unacceptable,
                timestamp: self.clock.now(),
            };
        }

        let metrics = self.get_call_metrics(call, adapter);
        let cb = self.callback.read().clone();
        if let Some(cb) = cb {
            cb(peer, metrics);
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{Call, RtpSessionHandle, RtpStatsSource};
    use crate::time::ManualClock;
    use crate::types::{CallId, CallState};

    struct FakeRtp {
        sent: u64,
        received: u64,
        lost: u64,
        jitter: f64,
    }

    impl RtpStatsSource for FakeRtp {
        fn packets_sent(&self) -> u64 {
            self.sent
        }
        fn packets_received(&self) -> u64 {
            self.received
        }
        fn packets_lost(&self) -> u64 {
            self.lost
        }
        fn jitter_ms(&self) -> f64 {
            self.jitter
        }
    }

    fn setup(clock: Arc<ManualClock>) -> (Call, QualityMonitor) {
        let call = Call::new(PeerId(1), CallId(1), clock.clone());
        call.set_state(CallState::SendingAudio);
        call.mark_started();
        let monitor = QualityMonitor::new(QualityMonitorConfig::default(), clock);
        (call, monitor)
    }

    #[test]
    fn classifier_scenario_excellent() {
        let clock = Arc::new(ManualClock::new());
        let (call, monitor) = setup(clock.clone());
        call.set_rtp_session(Some(RtpSessionHandle(Arc::new(FakeRtp {
            sent: 1000,
            received: 995,
            lost: 5, // 0.5%
            jitter: 30.0,
        }))));
        clock.advance(chrono::Duration::milliseconds(100));
        let metrics = monitor.get_call_metrics(&call, None);
        assert_eq!(metrics.quality_level, QualityLevel::Excellent);
    }

    #[test]
    fn classifier_scenario_unacceptable_due_to_silence() {
        let clock = Arc::new(ManualClock::new());
        let (call, monitor) = setup(clock.clone());
        call.set_rtp_session(Some(RtpSessionHandle(Arc::new(FakeRtp {
            sent: 1000,
            received: 995,
            lost: 5,
            jitter: 30.0,
        }))));
        clock.advance(chrono::Duration::seconds(3));
        let metrics = monitor.get_call_metrics(&call, None);
        assert_eq!(metrics.quality_level, QualityLevel::Unacceptable);
    }

    #[test]
    fn classifier_scenario_poor_due_to_loss() {
        let clock = Arc::new(ManualClock::new());
        let (call, monitor) = setup(clock.clone());
        call.set_rtp_session(Some(RtpSessionHandle(Arc::new(FakeRtp {
            sent: 940,
            received: 0,
            lost: 60, // 60/940 ~= 6.38%
            jitter: 30.0,
        }))));
        clock.advance(chrono::Duration::milliseconds(100));
        let metrics = monitor.get_call_metrics(&call, None);
        assert_eq!(metrics.quality_level, QualityLevel::Poor);
    }

    #[test]
    fn disabled_monitor_returns_zero_snapshot() {
        let clock = Arc::new(ManualClock::new());
        let (call, monitor) = setup(clock);
        monitor.set_enabled(false);
        let metrics = monitor.monitor_call(PeerId(1), &call, None);
        assert_eq!(metrics.packets_sent, 0);
        assert_eq!(metrics.quality_level, QualityLevel::Unacceptable);
    }

    #[test]
    fn callback_fires_with_peer_and_metrics() {
        let clock = Arc::new(ManualClock::new());
        let (call, monitor) = setup(clock);
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen_clone = seen.clone();
        monitor.set_callback(Some(Arc::new(move |peer, metrics| {
            *seen_clone.lock() = Some((peer, metrics));
        })));
        monitor.monitor_call(PeerId(1), &call, None);
        assert!(seen.lock().is_some());
        assert_eq!(seen.lock().unwrap().0, PeerId(1));
    }

    #[test]
    fn no_rtp_session_yields_zero_loss_not_division_by_zero() {
        let clock = Arc::new(ManualClock::new());
        let (call, monitor) = setup(clock);
        let metrics = monitor.get_call_metrics(&call, None);
        assert_eq!(metrics.packet_loss_pct, 0.0);
    }
}
