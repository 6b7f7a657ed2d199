//! Crate-wide error type.
//!
//! One variant per error kind named in the call-control-plane error
//! taxonomy: lifecycle misuse, bad arguments, duplicate calls, transport
//! failures, malformed signaling, and unrecoverable pipeline failures.

use thiserror::Error;

/// Errors returned by public operations on [`crate::manager::Manager`] and
/// its collaborators.
///
/// Callbacks (quality, bitrate, timeout, report) never fail and therefore
/// never produce one of these; they are purely a public-operation return
/// type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallCoreError {
    /// Operation attempted in the wrong lifecycle state (manager not
    /// running, already running, call in the wrong state, no such call).
    #[error("invalid state: {0}")]
    State(String),

    /// Bad argument: zero bitrates on both media, non-positive timeout,
    /// unknown peer, or an address the resolver could not produce.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A call already exists for this peer.
    #[error("duplicate call for peer {peer_id}")]
    Duplicate {
        /// The peer id that already has an active call.
        peer_id: u32,
    },

    /// The underlying transport's `Send` failed; surfaced verbatim.
    #[error("transport error: {0}")]
    Transport(String),

    /// A signaling packet was too short or malformed. Never torn down a
    /// call by itself — callers log and drop.
    #[error("decode error: {0}")]
    Decode(String),

    /// A media pipeline (audio/video processor, RTP session) failed in a
    /// way the call cannot recover from.
    #[error("internal pipeline error: {0}")]
    InternalPipeline(String),
}

/// Convenience alias used on every public signature in this crate.
pub type Result<T> = std::result::Result<T, CallCoreError>;

impl CallCoreError {
    /// Shorthand for [`CallCoreError::State`].
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Shorthand for [`CallCoreError::InvalidArgument`].
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Shorthand for [`CallCoreError::Decode`].
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Shorthand for [`CallCoreError::InternalPipeline`].
    pub fn internal_pipeline(msg: impl Into<String>) -> Self {
        Self::InternalPipeline(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_carries_peer_id() {
        let err = CallCoreError::Duplicate { peer_id: 7 };
        assert_eq!(err.to_string(), "duplicate call for peer 7");
    }

    #[test]
    fn shorthands_build_expected_variants() {
        assert_eq!(
            CallCoreError::state("not running"),
            CallCoreError::State("not running".to_string())
        );
        assert_eq!(
            CallCoreError::invalid_argument("bad timeout"),
            CallCoreError::InvalidArgument("bad timeout".to_string())
        );
    }
}
