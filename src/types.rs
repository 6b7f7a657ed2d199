//! Core wire-stable and in-memory types shared across the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable 32-bit identifier for a correspondent, assigned by the host
/// messenger. Not generated by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl From<u32> for PeerId {
    fn from(v: u32) -> Self {
        PeerId(v)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic per-manager call identifier, 32-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u32);

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-call lifecycle/activity state.
///
/// Numeric values are part of the external contract and MUST NOT change:
/// `None` = 0, `Error` = 1, `Finished` = 2. The remaining variants are
/// stable within this crate but were not separately pinned upstream;
/// they are assigned contiguous values here and must not be reordered
/// once published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CallState {
    /// Call exists but no media direction has been established yet.
    None = 0,
    /// The call encountered an unrecoverable error and is pending removal.
    Error = 1,
    /// The call has ended normally and is pending removal.
    Finished = 2,
    /// Locally sending an audio stream to the peer.
    SendingAudio = 3,
    /// Locally sending a video stream to the peer.
    SendingVideo = 4,
    /// Locally accepting (receiving) an audio stream from the peer.
    AcceptingAudio = 5,
    /// Locally accepting (receiving) a video stream from the peer.
    AcceptingVideo = 6,
}

impl CallState {
    /// `true` for the three terminal/inactive states that can never time
    /// out and are excluded from active-call counts.
    pub fn is_terminal_or_inactive(self) -> bool {
        matches!(self, CallState::None | CallState::Error | CallState::Finished)
    }

    /// Numeric wire value, stable per the contract above.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Remote-control actions carried by `CallControl` signaling packets.
///
/// Numeric values are part of the external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CallControl {
    /// Resume a paused call.
    Resume = 0,
    /// Pause the call (both directions).
    Pause = 1,
    /// Cancel an in-progress call setup.
    Cancel = 2,
    /// Mute outgoing audio.
    MuteAudio = 3,
    /// Unmute outgoing audio.
    UnmuteAudio = 4,
    /// Hide outgoing video.
    HideVideo = 5,
    /// Show outgoing video.
    ShowVideo = 6,
}

impl CallControl {
    /// Converts a wire byte into a `CallControl`, or `None` if the byte is
    /// not one of the defined values.
    pub fn try_from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(CallControl::Resume),
            1 => Some(CallControl::Pause),
            2 => Some(CallControl::Cancel),
            3 => Some(CallControl::MuteAudio),
            4 => Some(CallControl::UnmuteAudio),
            5 => Some(CallControl::HideVideo),
            6 => Some(CallControl::ShowVideo),
            _ => None,
        }
    }

    /// The wire byte for this action.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// The adapter's internal network-quality classification, derived from
/// loss and jitter alone (see [`crate::bitrate::BitrateAdapter::assess`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NetworkQuality {
    /// Worst bucket: heavy loss and/or jitter.
    Poor,
    /// Noticeably degraded but usable.
    Fair,
    /// Minor degradation.
    Good,
    /// Best bucket: negligible loss and jitter.
    Excellent,
}

/// Coarse, user-facing quality label produced by the quality monitor.
///
/// `Unacceptable` is a harsher bottom rung than [`NetworkQuality::Poor`],
/// reserved for calls that are effectively dead (no recent frames).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityLevel {
    /// Beyond poor: the call appears to have gone silent.
    Unacceptable,
    /// Worst active bucket.
    Poor,
    /// Noticeably degraded but usable.
    Fair,
    /// Minor degradation.
    Good,
    /// Best bucket.
    Excellent,
}

/// A point-in-time snapshot produced by the quality monitor for one call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CallMetrics {
    /// Packet loss percentage in `[0, 100]`.
    pub packet_loss_pct: f64,
    /// Jitter, in milliseconds.
    pub jitter_ms: f64,
    /// Round-trip time, in milliseconds. Zero if unknown.
    pub rtt_ms: f64,
    /// Total packets sent over the RTP session, if any.
    pub packets_sent: u64,
    /// Total packets received over the RTP session, if any.
    pub packets_received: u64,
    /// Current audio bitrate in bits per second.
    pub audio_bps: u32,
    /// Current video bitrate in bits per second.
    pub video_bps: u32,
    /// The adapter's network-quality classification (or `Poor` when no
    /// adapter is attached — see §4.4).
    pub network_quality: NetworkQuality,
    /// Wall-clock duration since the call started, in milliseconds.
    pub call_duration_ms: i64,
    /// Milliseconds since the last media frame arrived or was sent.
    pub last_frame_age_ms: i64,
    /// The coarse, user-facing quality label.
    pub quality_level: QualityLevel,
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

/// A per-call rolling window of metrics snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallMetricsHistory {
    /// Most recently recorded snapshot, if any.
    pub current: Option<CallMetrics>,
    /// Oldest-first history, capped at the aggregator's configured length.
    pub history: Vec<CallMetrics>,
}

/// System-wide summary maintained by the metrics aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Number of calls currently tracked.
    pub active_calls: u64,
    /// Monotonically non-decreasing count of calls ever tracked.
    pub total_calls: u64,
    /// Count of calls torn down in an error state.
    pub failed_calls: u64,
    /// Mean packet loss percentage across tracked calls.
    pub avg_packet_loss_pct: f64,
    /// Mean jitter, in milliseconds, across tracked calls.
    pub avg_jitter_ms: f64,
    /// Mean combined (audio + video) bitrate across tracked calls.
    pub avg_bitrate_bps: f64,
    /// Mean call duration, in milliseconds, across tracked calls.
    pub avg_duration_ms: f64,
    /// Count of tracked calls currently at `Excellent`.
    pub excellent_count: u64,
    /// Count of tracked calls currently at `Good`.
    pub good_count: u64,
    /// Count of tracked calls currently at `Fair`.
    pub fair_count: u64,
    /// Count of tracked calls currently at `Poor` or `Unacceptable`.
    pub poor_count: u64,
    /// When this summary was last recomputed.
    pub last_update: DateTime<Utc>,
}

/// A combined report the aggregator's reporter task dispatches on each
/// tick of its configured interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedReport {
    /// Snapshot of the system-wide summary at report time.
    pub system: SystemMetrics,
    /// Snapshot of each tracked call's current metrics, keyed by peer.
    pub per_call: Vec<(PeerId, CallMetrics)>,
    /// The majority-rule overall quality across tracked calls.
    pub overall_quality: QualityLevel,
    /// When the report was generated.
    pub timestamp: DateTime<Utc>,
    /// The interval this reporter is configured to run at.
    pub interval: chrono::Duration,
}
