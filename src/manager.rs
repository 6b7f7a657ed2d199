//! The call control plane: owns the call table, runs the iteration loop,
//! routes inbound signaling/media packets, and enforces call timeouts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::aggregator::{MetricsAggregator, MetricsAggregatorConfig};
use crate::bitrate::{BitrateAdapter, BitrateAdapterConfig};
use crate::call::Call;
use crate::error::{CallCoreError, Result};
use crate::iteration::{IterationOptimizer, IterationOptimizerConfig};
use crate::quality::{QualityMonitor, QualityMonitorConfig};
use crate::signaling::{
    BitrateControlPacket, CallControlPacket, CallRequestPacket, CallResponsePacket,
    PACKET_TYPE_AUDIO_FRAME, PACKET_TYPE_BITRATE_CONTROL, PACKET_TYPE_CALL_CONTROL,
    PACKET_TYPE_CALL_REQUEST, PACKET_TYPE_CALL_RESPONSE, PACKET_TYPE_VIDEO_FRAME,
};
use crate::time::TimeSource;
use crate::transport::{resolve_or_placeholder, AddressResolver, Transport};
use crate::types::{CallId, CallState, PeerId};

/// Default inactivity timeout applied to new calls.
const DEFAULT_CALL_TIMEOUT: chrono::Duration = chrono::Duration::seconds(30);

/// Default scheduler tick interval.
const DEFAULT_ITERATION_INTERVAL_MS: u64 = 20;

/// Callback invoked when a call is torn down by the inactivity timeout.
pub type TimeoutCallback = Arc<dyn Fn(PeerId) + Send + Sync>;

struct ManagerState {
    calls: HashMap<PeerId, Arc<Call>>,
    running: bool,
}

/// Construction-time configuration for [`Manager`].
#[derive(Clone)]
pub struct ManagerConfig {
    /// Inactivity timeout applied to newly created calls.
    pub call_timeout: chrono::Duration,
    /// Bitrate adapter configuration applied to every call's adapter.
    pub bitrate_config: BitrateAdapterConfig,
    /// Quality monitor configuration.
    pub quality_config: QualityMonitorConfig,
    /// Metrics aggregator configuration.
    pub aggregator_config: MetricsAggregatorConfig,
    /// Iteration optimizer configuration.
    pub iteration_config: IterationOptimizerConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            bitrate_config: BitrateAdapterConfig::default(),
            quality_config: QualityMonitorConfig::default(),
            aggregator_config: MetricsAggregatorConfig::default(),
            iteration_config: IterationOptimizerConfig::default(),
        }
    }
}

/// Owns the call table and coordinates every other component.
///
/// Construction requires a transport handle and a peer-address resolver.
/// The manager registers handlers for the four signaling packet types and
/// the two media frame types on the supplied transport.
pub struct Manager {
    state: RwLock<ManagerState>,
    call_timeout: RwLock<chrono::Duration>,
    next_call_id: AtomicU32,
    clock: Arc<dyn TimeSource>,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn AddressResolver>,
    config: ManagerConfig,
    monitor: QualityMonitor,
    aggregator: Arc<MetricsAggregator>,
    iteration: IterationOptimizer,
    timeout_callback: RwLock<Option<TimeoutCallback>>,
    monitor_enabled: AtomicBool,
}

impl Manager {
    /// Creates a manager bound to `transport`/`resolver` and registers its
    /// packet handlers. Does not start the iteration loop.
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn AddressResolver>,
        config: ManagerConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            state: RwLock::new(ManagerState {
                calls: HashMap::new(),
                running: false,
            }),
            call_timeout: RwLock::new(config.call_timeout),
            next_call_id: AtomicU32::new(1),
            clock: clock.clone(),
            transport: transport.clone(),
            resolver,
            monitor: QualityMonitor::new(config.quality_config.clone(), clock.clone()),
            aggregator: Arc::new(MetricsAggregator::new(config.aggregator_config.clone(), clock.clone())),
            iteration: IterationOptimizer::new(config.iteration_config.clone(), clock),
            config,
            timeout_callback: RwLock::new(None),
            monitor_enabled: AtomicBool::new(true),
        });
        manager.register_handlers();
        manager
    }

    fn register_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let m = weak.clone();
        self.transport.register_handler(
            PACKET_TYPE_CALL_REQUEST,
            Arc::new(move |payload, addr| {
                if let Some(manager) = m.upgrade() {
                    manager.on_call_request(&payload, &addr);
                }
            }),
        );
        let m = weak.clone();
        self.transport.register_handler(
            PACKET_TYPE_CALL_RESPONSE,
            Arc::new(move |payload, addr| {
                if let Some(manager) = m.upgrade() {
                    manager.on_call_response(&payload, &addr);
                }
            }),
        );
        let m = weak.clone();
        self.transport.register_handler(
            PACKET_TYPE_CALL_CONTROL,
            Arc::new(move |payload, addr| {
                if let Some(manager) = m.upgrade() {
                    manager.on_call_control(&payload, &addr);
                }
            }),
        );
        let m = weak.clone();
        self.transport.register_handler(
            PACKET_TYPE_BITRATE_CONTROL,
            Arc::new(move |payload, addr| {
                if let Some(manager) = m.upgrade() {
                    manager.on_bitrate_control(&payload, &addr);
                }
            }),
        );
        let m = weak.clone();
        self.transport.register_handler(
            PACKET_TYPE_AUDIO_FRAME,
            Arc::new(move |payload, addr| {
                if let Some(manager) = m.upgrade() {
                    manager.handle_audio_frame(&payload, &addr);
                }
            }),
        );
        let m = weak;
        self.transport.register_handler(
            PACKET_TYPE_VIDEO_FRAME,
            Arc::new(move |payload, addr| {
                if let Some(manager) = m.upgrade() {
                    manager.handle_video_frame(&payload, &addr);
                }
            }),
        );
    }

    /// Transitions to running. Fails if already running.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.running {
            return Err(CallCoreError::state("manager already running"));
        }
        state.running = true;
        Ok(())
    }

    /// Transitions every call to `Finished`, empties the table, and marks
    /// the manager not running. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.write();
        for call in state.calls.values() {
            call.set_state(CallState::Finished);
        }
        state.calls.clear();
        state.running = false;
    }

    /// `true` if the manager is currently running.
    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    /// The scheduler tick interval the caller should drive `iterate` at.
    pub fn iteration_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(DEFAULT_ITERATION_INTERVAL_MS)
    }

    /// Sets the inactivity timeout applied to `checkCallTimeout`. Requires
    /// `timeout > 0`.
    pub fn set_call_timeout(&self, timeout: chrono::Duration) -> Result<()> {
        if timeout <= chrono::Duration::zero() {
            return Err(CallCoreError::invalid_argument("call timeout must be positive"));
        }
        *self.call_timeout.write() = timeout;
        Ok(())
    }

    /// Registers (or clears) the timeout callback.
    pub fn set_call_timeout_callback(&self, cb: Option<TimeoutCallback>) {
        *self.timeout_callback.write() = cb;
    }

    /// Enables or disables quality sampling during iteration.
    pub fn set_monitoring_enabled(&self, enabled: bool) {
        self.monitor_enabled.store(enabled, Ordering::SeqCst);
        self.monitor.set_enabled(enabled);
    }

    /// Starts an outgoing call. Requires the manager to be running; fails
    /// if a call already exists for `peer`, or if both bitrates are zero.
    pub fn start_call(&self, peer: PeerId, audio_bps: u32, video_bps: u32) -> Result<Arc<Call>> {
        if !self.is_running() {
            return Err(CallCoreError::state("manager not running"));
        }
        if audio_bps == 0 && video_bps == 0 {
            return Err(CallCoreError::invalid_argument(
                "at least one of audio_bps/video_bps must be nonzero",
            ));
        }

        let mut state = self.state.write();
        if state.calls.contains_key(&peer) {
            return Err(CallCoreError::Duplicate { peer_id: peer.0 });
        }

        let call_id = CallId(self.next_call_id.fetch_add(1, Ordering::SeqCst));
        let adapter = Arc::new(BitrateAdapter::new(
            peer,
            audio_bps,
            video_bps,
            self.config.bitrate_config.clone(),
            self.clock.clone(),
        )?);
        let call = Arc::new(Call::new(peer, call_id, self.clock.clone()).with_adapter(adapter));
        call.set_capabilities_and_state(audio_bps > 0, video_bps > 0, true);
        call.set_audio_bps(audio_bps);
        call.set_video_bps(video_bps);
        call.mark_started();

        state.calls.insert(peer, call.clone());
        drop(state);

        self.aggregator.start_call_tracking(peer);
        debug!(peer = %peer, call_id = %call_id, "started outgoing call");
        Ok(call)
    }

    /// Answers an inbound call. Requires the manager to be running and an
    /// existing call for `peer` in state `None`.
    pub fn answer_call(&self, peer: PeerId, audio_bps: u32, video_bps: u32) -> Result<Arc<Call>> {
        if !self.is_running() {
            return Err(CallCoreError::state("manager not running"));
        }
        let state = self.state.read();
        let call = state
            .calls
            .get(&peer)
            .cloned()
            .ok_or_else(|| CallCoreError::state(format!("no call for peer {peer}")))?;
        drop(state);

        if call.state() != CallState::None {
            return Err(CallCoreError::state("call is not awaiting an answer"));
        }
        call.set_capabilities_and_state(audio_bps > 0, video_bps > 0, false);
        call.set_audio_bps(audio_bps);
        call.set_video_bps(video_bps);
        call.mark_started();
        debug!(peer = %peer, "answered inbound call");
        Ok(call)
    }

    /// Ends a call, transitioning it to `Finished` and removing it from
    /// the table. Fails if no call exists for `peer`.
    pub fn end_call(&self, peer: PeerId) -> Result<()> {
        let mut state = self.state.write();
        let call = state
            .calls
            .remove(&peer)
            .ok_or_else(|| CallCoreError::state(format!("no call for peer {peer}")))?;
        drop(state);
        call.set_state(CallState::Finished);
        self.aggregator.stop_call_tracking(peer, false);
        debug!(peer = %peer, "ended call");
        Ok(())
    }

    /// Updates the audio bitrate on an existing call.
    pub fn set_audio_bitrate(&self, peer: PeerId, bps: u32) -> Result<()> {
        let call = self.get_call(peer)?;
        call.set_audio_bps(bps);
        Ok(())
    }

    /// Updates the video bitrate on an existing call.
    pub fn set_video_bitrate(&self, peer: PeerId, bps: u32) -> Result<()> {
        let call = self.get_call(peer)?;
        call.set_video_bps(bps);
        Ok(())
    }

    /// Looks up the call for `peer`.
    pub fn get_call(&self, peer: PeerId) -> Result<Arc<Call>> {
        self.state
            .read()
            .calls
            .get(&peer)
            .cloned()
            .ok_or_else(|| CallCoreError::state(format!("no call for peer {peer}")))
    }

    /// All currently active calls.
    pub fn get_active_calls(&self) -> Vec<Arc<Call>> {
        self.state.read().calls.values().cloned().collect()
    }

    /// Number of currently active calls.
    pub fn get_call_count(&self) -> usize {
        self.state.read().calls.len()
    }

    /// A handle to the metrics aggregator, for starting/stopping its
    /// reporter and reading its snapshots.
    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.aggregator
    }

    /// Runs one scheduler tick: scans active calls via the iteration
    /// optimizer's fast path, invoking `process_call` on each.
    pub fn iterate(&self) {
        let running = self.is_running();
        let (slice, took_lock) = self.iteration.tick(running, || self.get_active_calls());
        if !took_lock {
            return;
        }
        let Some(slice) = slice else { return };

        for call in &slice {
            self.process_call(call);
        }

        self.iteration.release(slice);
    }

    /// Applies the per-call iteration algorithm from SPEC_FULL.md §4.1:
    /// remove calls in `Error`, tear down timed-out calls, otherwise
    /// sample quality and drive the bitrate adapter.
    fn process_call(&self, call: &Arc<Call>) {
        if call.state() == CallState::Error {
            self.state.write().calls.remove(&call.peer_id());
            self.aggregator.stop_call_tracking(call.peer_id(), true);
            return;
        }

        let timeout = *self.call_timeout.read();
        if call.is_timed_out(timeout) {
            call.set_state(CallState::Finished);
            self.state.write().calls.remove(&call.peer_id());
            self.aggregator.stop_call_tracking(call.peer_id(), false);
            let cb = self.timeout_callback.read().clone();
            if let Some(cb) = cb {
                cb(call.peer_id());
            }
            return;
        }

        if self.monitor_enabled.load(Ordering::SeqCst) {
            let metrics = self
                .monitor
                .monitor_call(call.peer_id(), call, call.adapter().map(|a| a.as_ref()));
            self.aggregator.record_metrics(call.peer_id(), metrics);

            if let Some(adapter) = call.adapter() {
                if let Some(session) = call.rtp_session() {
                    adapter.update_network_stats(
                        session.0.packets_sent(),
                        session.0.packets_received(),
                        session.0.packets_lost(),
                        session.0.jitter_ms(),
                    );
                }
            }
        }
    }

    fn resolve_peer_from_addr(&self, addr: &[u8]) -> Option<PeerId> {
        self.resolver.reverse(addr)
    }

    fn on_call_request(&self, payload: &[u8], addr: &[u8]) {
        let packet = match CallRequestPacket::from_bytes(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping malformed CallRequest");
                return;
            }
        };
        let Some(peer) = self.resolve_peer_from_addr(addr) else {
            warn!("CallRequest from unresolvable address");
            return;
        };
        debug!(peer = %peer, call_id = packet.call_id, "received CallRequest");
    }

    fn on_call_response(&self, payload: &[u8], addr: &[u8]) {
        let packet = match CallResponsePacket::from_bytes(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping malformed CallResponse");
                return;
            }
        };
        let Some(peer) = self.resolve_peer_from_addr(addr) else {
            return;
        };
        if !packet.accepted {
            let _ = self.end_call(peer);
        }
    }

    fn on_call_control(&self, payload: &[u8], addr: &[u8]) {
        let packet = match CallControlPacket::from_bytes(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping malformed CallControl");
                return;
            }
        };
        let Some(peer) = self.resolve_peer_from_addr(addr) else {
            return;
        };
        if let Ok(call) = self.get_call(peer) {
            call.apply_control(packet.control);
        }
    }

    fn on_bitrate_control(&self, payload: &[u8], addr: &[u8]) {
        let packet = match BitrateControlPacket::from_bytes(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping malformed BitrateControl");
                return;
            }
        };
        let Some(peer) = self.resolve_peer_from_addr(addr) else {
            return;
        };
        let _ = self.set_audio_bitrate(peer, packet.audio_bps);
        let _ = self.set_video_bitrate(peer, packet.video_bps);
    }

    /// Dispatches an inbound audio frame bound to packet type `0x33`.
    pub fn handle_audio_frame(&self, payload: &[u8], addr: &[u8]) {
        self.handle_media_frame(payload, addr, |call| call.has_audio_pipeline());
    }

    /// Dispatches an inbound video frame bound to packet type `0x34`.
    pub fn handle_video_frame(&self, payload: &[u8], addr: &[u8]) {
        self.handle_media_frame(payload, addr, |call| call.has_video_pipeline());
    }

    fn handle_media_frame(&self, payload: &[u8], addr: &[u8], has_pipeline: impl Fn(&Call) -> bool) {
        let Some(peer) = self.resolve_peer_from_addr(addr) else {
            warn!("media frame from unresolvable address");
            return;
        };
        let Ok(call) = self.get_call(peer) else {
            warn!(peer = %peer, "media frame for unknown peer");
            return;
        };
        call.update_last_frame();
        if !has_pipeline(&call) {
            // No configured pipeline: drop silently, per §4.1.
            return;
        }
        let _ = payload;
    }

    /// Resolves `peer` via the configured resolver, falling back to the
    /// loopback placeholder when the result is too short.
    pub async fn resolve_peer_address(&self, peer: PeerId) -> bytes::Bytes {
        resolve_or_placeholder(self.resolver.as_ref(), peer).await
    }
}
