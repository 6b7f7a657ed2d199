//! Per-call state: the state machine, control flags, bitrates, timing and
//! media handles for one conversation with a peer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::bitrate::BitrateAdapter;
use crate::time::TimeSource;
use crate::types::{CallId, CallState, PeerId};

/// An opaque handle to an audio processing pipeline. This crate never
/// looks inside it; audio processing is out of scope (§1).
#[derive(Debug, Clone)]
pub struct AudioHandle(pub Arc<str>);

/// An opaque handle to a video processing pipeline. Out of scope (§1).
#[derive(Debug, Clone)]
pub struct VideoHandle(pub Arc<str>);

/// The minimal set of RTP statistics the quality monitor needs.
///
/// An embedder backs this with a real RTP session; this crate only reads
/// these four fields (§4.4).
pub trait RtpStatsSource: Send + Sync {
    /// Total packets sent so far.
    fn packets_sent(&self) -> u64;
    /// Total packets received so far.
    fn packets_received(&self) -> u64;
    /// Total packets lost so far.
    fn packets_lost(&self) -> u64;
    /// Current jitter estimate, in milliseconds.
    fn jitter_ms(&self) -> f64;
}

/// An opaque handle to an RTP session, exposing only [`RtpStatsSource`].
#[derive(Clone)]
pub struct RtpSessionHandle(pub Arc<dyn RtpStatsSource>);

impl std::fmt::Debug for RtpSessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpSessionHandle").finish_non_exhaustive()
    }
}

/// Mutable per-call state, guarded by its own lock (never the manager's).
#[derive(Debug)]
struct CallInner {
    state: CallState,
    audio_enabled: bool,
    video_enabled: bool,
    paused: bool,
    audio_muted: bool,
    video_hidden: bool,
    audio_bps: u32,
    video_bps: u32,
    started_at: Option<DateTime<Utc>>,
    last_frame_at: Option<DateTime<Utc>>,
    audio_handle: Option<AudioHandle>,
    video_handle: Option<VideoHandle>,
    rtp_session: Option<RtpSessionHandle>,
}

/// One active conversation with a peer.
///
/// All mutating operations take the exclusive half of an internal
/// reader/writer lock; all reads take the shared half. Snapshot-returning
/// methods never hand out references into the guarded state.
pub struct Call {
    peer_id: PeerId,
    call_id: CallId,
    clock: Arc<dyn TimeSource>,
    adapter: Option<Arc<BitrateAdapter>>,
    inner: RwLock<CallInner>,
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("peer_id", &self.peer_id)
            .field("call_id", &self.call_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Call {
    /// Creates a new call in state `None`, not yet started.
    pub fn new(peer_id: PeerId, call_id: CallId, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            peer_id,
            call_id,
            clock,
            adapter: None,
            inner: RwLock::new(CallInner {
                state: CallState::None,
                audio_enabled: false,
                video_enabled: false,
                paused: false,
                audio_muted: false,
                video_hidden: false,
                audio_bps: 0,
                video_bps: 0,
                started_at: None,
                last_frame_at: None,
                audio_handle: None,
                video_handle: None,
                rtp_session: None,
            }),
        }
    }

    /// Attaches a bitrate adapter to this call. Per-call ownership per
    /// the resolved open question in SPEC_FULL.md §9.
    pub fn with_adapter(mut self, adapter: Arc<BitrateAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// This call's peer id.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// This call's call id.
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// This call's bitrate adapter, if any.
    pub fn adapter(&self) -> Option<&Arc<BitrateAdapter>> {
        self.adapter.as_ref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CallState {
        self.inner.read().state
    }

    /// Sets the lifecycle state directly. Used by the manager after it has
    /// decided on a transition (e.g. `StartCall`, `AnswerCall`, timeout).
    pub fn set_state(&self, state: CallState) {
        self.inner.write().state = state;
    }

    /// `true` if audio is enabled for this call.
    pub fn audio_enabled(&self) -> bool {
        self.inner.read().audio_enabled
    }

    /// `true` if video is enabled for this call.
    pub fn video_enabled(&self) -> bool {
        self.inner.read().video_enabled
    }

    /// Sets capability flags and selects the corresponding `Sending*` /
    /// `Accepting*` state. `sending` picks between the `Sending*` and
    /// `Accepting*` variant families. When both media are enabled, video
    /// is treated as the higher-priority tag for the composed state, per
    /// §3's "highest-priority applicable state" rule.
    pub fn set_capabilities_and_state(&self, audio_enabled: bool, video_enabled: bool, sending: bool) {
        let mut inner = self.inner.write();
        inner.audio_enabled = audio_enabled;
        inner.video_enabled = video_enabled;
        inner.state = match (sending, video_enabled, audio_enabled) {
            (true, true, _) => CallState::SendingVideo,
            (true, false, true) => CallState::SendingAudio,
            (false, true, _) => CallState::AcceptingVideo,
            (false, false, true) => CallState::AcceptingAudio,
            _ => CallState::None,
        };
    }

    /// `true` once `started_at` has been set.
    pub fn has_started(&self) -> bool {
        self.inner.read().started_at.is_some()
    }

    /// Marks the call as started at the current instant, if not already.
    pub fn mark_started(&self) {
        let mut inner = self.inner.write();
        if inner.started_at.is_none() {
            let now = self.clock.now();
            inner.started_at = Some(now);
            inner.last_frame_at = Some(now);
        }
    }

    /// `started_at`, if the call has begun.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().started_at
    }

    /// Timestamp of the last media arrival or send, if any.
    pub fn last_frame_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_frame_at
    }

    /// Refreshes `last_frame_at` to the current instant.
    ///
    /// Strictly advances under a monotonic clock, since the underlying
    /// clock is required to never move backwards (§8).
    pub fn update_last_frame(&self) {
        self.inner.write().last_frame_at = Some(self.clock.now());
    }

    /// Current audio bitrate in bits per second.
    pub fn audio_bps(&self) -> u32 {
        self.inner.read().audio_bps
    }

    /// Current video bitrate in bits per second.
    pub fn video_bps(&self) -> u32 {
        self.inner.read().video_bps
    }

    /// Sets the audio bitrate.
    pub fn set_audio_bps(&self, bps: u32) {
        self.inner.write().audio_bps = bps;
    }

    /// Sets the video bitrate.
    pub fn set_video_bps(&self, bps: u32) {
        self.inner.write().video_bps = bps;
    }

    /// `true` if the call is paused.
    pub fn paused(&self) -> bool {
        self.inner.read().paused
    }

    /// `true` if outgoing audio is muted.
    pub fn audio_muted(&self) -> bool {
        self.inner.read().audio_muted
    }

    /// `true` if outgoing video is hidden.
    pub fn video_hidden(&self) -> bool {
        self.inner.read().video_hidden
    }

    /// Applies a `CallControl` action to this call's flags.
    pub fn apply_control(&self, control: crate::types::CallControl) {
        use crate::types::CallControl::*;
        let mut inner = self.inner.write();
        match control {
            Resume => inner.paused = false,
            Pause => inner.paused = true,
            Cancel => {}
            MuteAudio => inner.audio_muted = true,
            UnmuteAudio => inner.audio_muted = false,
            HideVideo => inner.video_hidden = true,
            ShowVideo => inner.video_hidden = false,
        }
    }

    /// Attaches an audio processing handle.
    pub fn set_audio_handle(&self, handle: Option<AudioHandle>) {
        self.inner.write().audio_handle = handle;
    }

    /// Attaches a video processing handle.
    pub fn set_video_handle(&self, handle: Option<VideoHandle>) {
        self.inner.write().video_handle = handle;
    }

    /// Attaches an RTP session handle.
    pub fn set_rtp_session(&self, handle: Option<RtpSessionHandle>) {
        self.inner.write().rtp_session = handle;
    }

    /// `true` if an audio pipeline handle is attached.
    pub fn has_audio_pipeline(&self) -> bool {
        self.inner.read().audio_handle.is_some()
    }

    /// `true` if a video pipeline handle is attached.
    pub fn has_video_pipeline(&self) -> bool {
        self.inner.read().video_handle.is_some()
    }

    /// Clones the RTP session handle, if attached.
    pub fn rtp_session(&self) -> Option<RtpSessionHandle> {
        self.inner.read().rtp_session.clone()
    }

    /// Checks whether this call should be considered timed out right now.
    ///
    /// Mirrors `checkCallTimeout`: never true for a terminal/inactive
    /// state, never true before the call has started, true only once the
    /// gap since the last frame exceeds `timeout`.
    pub fn is_timed_out(&self, timeout: chrono::Duration) -> bool {
        let inner = self.inner.read();
        if inner.state.is_terminal_or_inactive() {
            return false;
        }
        let Some(started_at) = inner.started_at else {
            return false;
        };
        let _ = started_at;
        let Some(last_frame_at) = inner.last_frame_at else {
            return false;
        };
        self.clock.now() - last_frame_at > timeout
    }
}
