use std::sync::Arc;

use callcore::call::{Call, RtpSessionHandle, RtpStatsSource};
use callcore::quality::{QualityMonitor, QualityMonitorConfig};
use callcore::time::ManualClock;
use callcore::types::{CallId, CallState, PeerId, QualityLevel};

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

fn started_call(clock: Arc<ManualClock>) -> Call {
    let call = Call::new(PeerId(1), CallId(1), clock);
    call.set_state(CallState::SendingAudio);
    call.mark_started();
    call
}

#[test]
fn excellent_loss_and_jitter_yields_excellent() {
    let clock = Arc::new(ManualClock::new());
    let call = started_call(clock.clone());
    call.set_rtp_session(Some(RtpSessionHandle(Arc::new(FakeRtp {
        sent: 1000,
        received: 995,
        lost: 5,
        jitter: 15.0,
    }))));
    let monitor = QualityMonitor::new(QualityMonitorConfig::default(), clock.clone());
    clock.advance(chrono::Duration::milliseconds(500));
    assert_eq!(
        monitor.get_call_metrics(&call, None).quality_level,
        QualityLevel::Excellent
    );
}

#[test]
fn heavy_loss_yields_poor_or_worse() {
    let clock = Arc::new(ManualClock::new());
    let call = started_call(clock.clone());
    call.set_rtp_session(Some(RtpSessionHandle(Arc::new(FakeRtp {
        sent: 900,
        received: 0,
        lost: 100, // ~11%
        jitter: 30.0,
    }))));
    let monitor = QualityMonitor::new(QualityMonitorConfig::default(), clock.clone());
    clock.advance(chrono::Duration::milliseconds(500));
    assert!(monitor.get_call_metrics(&call, None).quality_level <= QualityLevel::Poor);
}

#[test]
fn silence_beyond_frame_timeout_is_unacceptable_even_with_perfect_stats() {
    let clock = Arc::new(ManualClock::new());
    let call = started_call(clock.clone());
    call.set_rtp_session(Some(RtpSessionHandle(Arc::new(FakeRtp {
        sent: 1000,
        received: 1000,
        lost: 0,
        jitter: 1.0,
    }))));
    let monitor = QualityMonitor::new(QualityMonitorConfig::default(), clock.clone());
    clock.advance(chrono::Duration::seconds(5));
    assert_eq!(
        monitor.get_call_metrics(&call, None).quality_level,
        QualityLevel::Unacceptable
    );
}

#[test]
fn disabling_monitor_yields_a_zero_snapshot_without_touching_the_call() {
    let clock = Arc::new(ManualClock::new());
    let call = started_call(clock.clone());
    let monitor = QualityMonitor::new(QualityMonitorConfig::default(), clock);
    monitor.set_enabled(false);
    let metrics = monitor.monitor_call(PeerId(1), &call, None);
    assert_eq!(metrics.quality_level, QualityLevel::Unacceptable);
    assert_eq!(metrics.packets_sent, 0);
}
