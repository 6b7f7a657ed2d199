//! Hand-rolled big-endian signaling codec: four fixed-layout packets.
//!
//! Sizes are exact; decoders reject any input that is not precisely the
//! expected length rather than trying to parse a truncated packet.

use crate::error::{CallCoreError, Result};
use crate::types::CallControl;

/// Wire byte for [`CallRequestPacket`].
pub const PACKET_TYPE_CALL_REQUEST: u8 = 0x30;
/// Wire byte for [`CallResponsePacket`].
pub const PACKET_TYPE_CALL_RESPONSE: u8 = 0x31;
/// Wire byte for [`CallControlPacket`].
pub const PACKET_TYPE_CALL_CONTROL: u8 = 0x32;
/// Wire byte for inbound/outbound audio media frames.
pub const PACKET_TYPE_AUDIO_FRAME: u8 = 0x33;
/// Wire byte for inbound/outbound video media frames.
pub const PACKET_TYPE_VIDEO_FRAME: u8 = 0x34;
/// Wire byte for [`BitrateControlPacket`].
pub const PACKET_TYPE_BITRATE_CONTROL: u8 = 0x35;

// `copy_from_slice` rather than `<[u8; N]>::try_from(..).unwrap()`: every
// call site has already passed `require_len`, so the slice is always
// exactly 4/8 bytes wide and this never panics, without reaching for
// `.unwrap()`/`.expect()` in library code.
fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(arr)
}

fn read_i64(buf: &[u8], offset: usize) -> i64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&buf[offset..offset + 8]);
    i64::from_be_bytes(arr)
}

fn require_len(buf: &[u8], expected: usize, packet: &str) -> Result<()> {
    if buf.len() != expected {
        return Err(CallCoreError::decode(format!(
            "{packet}: expected {expected} bytes, got {}",
            buf.len()
        )));
    }
    Ok(())
}

/// Requests that a call be established (or that its parameters change),
/// 20 bytes: `call_id(4) · audio_bps(4) · video_bps(4) · ts_nanos(8)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRequestPacket {
    /// Identifies the call this request pertains to.
    pub call_id: u32,
    /// Requested audio bitrate, bits per second.
    pub audio_bps: u32,
    /// Requested video bitrate, bits per second.
    pub video_bps: u32,
    /// Sender's timestamp, nanoseconds since the Unix epoch.
    pub ts_nanos: i64,
}

impl CallRequestPacket {
    /// Encoded size in bytes.
    pub const SIZE: usize = 20;

    /// Serializes to exactly [`Self::SIZE`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.call_id.to_be_bytes());
        buf.extend_from_slice(&self.audio_bps.to_be_bytes());
        buf.extend_from_slice(&self.video_bps.to_be_bytes());
        buf.extend_from_slice(&self.ts_nanos.to_be_bytes());
        buf
    }

    /// Deserializes from exactly [`Self::SIZE`] bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        require_len(buf, Self::SIZE, "CallRequest")?;
        Ok(Self {
            call_id: read_u32(buf, 0),
            audio_bps: read_u32(buf, 4),
            video_bps: read_u32(buf, 8),
            ts_nanos: read_i64(buf, 12),
        })
    }
}

/// Answers a [`CallRequestPacket`], 21 bytes:
/// `call_id(4) · accepted(1) · audio_bps(4) · video_bps(4) · ts_nanos(8)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallResponsePacket {
    /// Identifies the call being answered.
    pub call_id: u32,
    /// Whether the call was accepted.
    pub accepted: bool,
    /// Responder's chosen audio bitrate, bits per second.
    pub audio_bps: u32,
    /// Responder's chosen video bitrate, bits per second.
    pub video_bps: u32,
    /// Sender's timestamp, nanoseconds since the Unix epoch.
    pub ts_nanos: i64,
}

impl CallResponsePacket {
    /// Encoded size in bytes.
    pub const SIZE: usize = 21;

    /// Serializes to exactly [`Self::SIZE`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.call_id.to_be_bytes());
        buf.push(if self.accepted { 1 } else { 0 });
        buf.extend_from_slice(&self.audio_bps.to_be_bytes());
        buf.extend_from_slice(&self.video_bps.to_be_bytes());
        buf.extend_from_slice(&self.ts_nanos.to_be_bytes());
        buf
    }

    /// Deserializes from exactly [`Self::SIZE`] bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        require_len(buf, Self::SIZE, "CallResponse")?;
        Ok(Self {
            call_id: read_u32(buf, 0),
            accepted: buf[4] != 0,
            audio_bps: read_u32(buf, 5),
            video_bps: read_u32(buf, 9),
            ts_nanos: read_i64(buf, 13),
        })
    }
}

/// Carries a remote-control action, 13 bytes:
/// `call_id(4) · control(1) · ts_nanos(8)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallControlPacket {
    /// Identifies the call this control applies to.
    pub call_id: u32,
    /// The requested action.
    pub control: CallControl,
    /// Sender's timestamp, nanoseconds since the Unix epoch.
    pub ts_nanos: i64,
}

impl CallControlPacket {
    /// Encoded size in bytes.
    pub const SIZE: usize = 13;

    /// Serializes to exactly [`Self::SIZE`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.call_id.to_be_bytes());
        buf.push(self.control.as_u8());
        buf.extend_from_slice(&self.ts_nanos.to_be_bytes());
        buf
    }

    /// Deserializes from exactly [`Self::SIZE`] bytes. Rejects an
    /// unrecognized control byte as malformed.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        require_len(buf, Self::SIZE, "CallControl")?;
        let control = CallControl::try_from_u8(buf[4])
            .ok_or_else(|| CallCoreError::decode(format!("unknown control byte {}", buf[4])))?;
        Ok(Self {
            call_id: read_u32(buf, 0),
            control,
            ts_nanos: read_i64(buf, 5),
        })
    }
}

/// Requests a specific bitrate for a call, 20 bytes: same layout as
/// [`CallRequestPacket`] but a distinct packet type on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateControlPacket {
    /// Identifies the call this control applies to.
    pub call_id: u32,
    /// Requested audio bitrate, bits per second.
    pub audio_bps: u32,
    /// Requested video bitrate, bits per second.
    pub video_bps: u32,
    /// Sender's timestamp, nanoseconds since the Unix epoch.
    pub ts_nanos: i64,
}

impl BitrateControlPacket {
    /// Encoded size in bytes.
    pub const SIZE: usize = 20;

    /// Serializes to exactly [`Self::SIZE`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.call_id.to_be_bytes());
        buf.extend_from_slice(&self.audio_bps.to_be_bytes());
        buf.extend_from_slice(&self.video_bps.to_be_bytes());
        buf.extend_from_slice(&self.ts_nanos.to_be_bytes());
        buf
    }

    /// Deserializes from exactly [`Self::SIZE`] bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        require_len(buf, Self::SIZE, "BitrateControl")?;
        Ok(Self {
            call_id: read_u32(buf, 0),
            audio_bps: read_u32(buf, 4),
            video_bps: read_u32(buf, 8),
            ts_nanos: read_i64(buf, 12),
        })
    }
}
