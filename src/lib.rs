//! callcore - the control plane for a peer-to-peer audio/video calling
//! subsystem.
//!
//! This crate owns call lifecycle, per-call state, inactivity timeouts,
//! AIMD bitrate adaptation, quality classification, system-wide metrics
//! aggregation, and the signaling codec that carries call setup/control
//! over an external transport. It does not touch codecs, RTP packetization
//! or UI; those are supplied by the embedder through the [`transport`] and
//! [`call`] trait boundaries.
//!
//! # Examples
//!
//! Requires the `test-utils` feature for the mock transport/resolver shown
//! here; embedders supply their own [`transport::Transport`] and
//! [`transport::AddressResolver`] implementations in production.
//!
//! ```ignore
//! use callcore::prelude::*;
//! use callcore::transport::mock::{MockResolver, MockTransport};
//! use std::sync::Arc;
//!
//! let manager = Manager::new(
//!     Arc::new(MockTransport::new()),
//!     Arc::new(MockResolver),
//!     ManagerConfig::default(),
//!     Arc::new(SystemClock),
//! );
//! manager.start().expect("manager should start cleanly");
//! let call = manager
//!     .start_call(PeerId(1), 32_000, 0)
//!     .expect("call should start");
//! assert_eq!(call.state(), CallState::SendingAudio);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
// These three stay scoped to non-test builds: every `#[cfg(test)] mod
// tests` block in this crate (and the `tests/` integration suites, which
// are separate crates entirely) relies on `.unwrap()`/`.expect()` for
// fixture setup and assertions, which is normal test style, not a lint
// violation. Library code itself must still never panic/unwrap/expect.
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

/// System-wide rolling metrics history and reporter task.
pub mod aggregator;
/// AIMD bitrate adaptation.
pub mod bitrate;
/// Per-call state machine, control flags, and media/RTP handles.
pub mod call;
/// Crate-wide error type.
pub mod error;
/// Fast-path scratch-slice pooling for the iteration loop.
pub mod iteration;
/// Owns the call table, runs iteration, routes inbound packets.
pub mod manager;
/// Translates RTP statistics into a five-level quality label.
pub mod quality;
/// Fixed-layout signaling packet codec.
pub mod signaling;
/// Injectable time source for deterministic testing.
pub mod time;
/// Transport and address-resolver contracts, plus test mocks.
pub mod transport;
/// Core wire-stable and in-memory types.
pub mod types;


/// Convenience re-exports of the crate's most commonly used items.
pub mod prelude {
    pub use crate::aggregator::{MetricsAggregator, MetricsAggregatorConfig};
    pub use crate::bitrate::{BitrateAdapter, BitrateAdapterConfig};
    pub use crate::call::{Call, RtpSessionHandle, RtpStatsSource};
    pub use crate::error::{CallCoreError, Result};
    pub use crate::manager::{Manager, ManagerConfig};
    pub use crate::quality::{QualityMonitor, QualityMonitorConfig};
    pub use crate::signaling::{
        BitrateControlPacket, CallControlPacket, CallRequestPacket, CallResponsePacket,
    };
    pub use crate::time::{ManualClock, SystemClock, TimeSource};
    pub use crate::transport::{AddressResolver, Transport};
    pub use crate::types::{
        AggregatedReport, CallControl, CallId, CallMetrics, CallMetricsHistory, CallState,
        NetworkQuality, PeerId, QualityLevel, SystemMetrics,
    };
}
