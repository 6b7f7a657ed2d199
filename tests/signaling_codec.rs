use callcore::error::CallCoreError;
use callcore::signaling::{CallRequestPacket, PACKET_TYPE_AUDIO_FRAME, PACKET_TYPE_VIDEO_FRAME};
use callcore::types::CallControl;
use pretty_assertions::assert_eq;

#[test]
fn call_request_matches_the_documented_wire_layout() {
    let packet = CallRequestPacket {
        call_id: 0x0102_0304,
        audio_bps: 64_000,
        video_bps: 1_000_000,
        ts_nanos: 1_700_000_000_000_000_000,
    };
    let bytes = packet.to_bytes();
    assert_eq!(bytes.len(), 20);
    assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);

    let decoded = CallRequestPacket::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn truncated_call_request_is_rejected_as_decode_error() {
    let packet = CallRequestPacket {
        call_id: 1,
        audio_bps: 2,
        video_bps: 3,
        ts_nanos: 4,
    };
    let bytes = packet.to_bytes();
    let err = CallRequestPacket::from_bytes(&bytes[..19]).unwrap_err();
    assert!(matches!(err, CallCoreError::Decode(_)));
}

#[test]
fn control_enum_wire_values_are_stable() {
    assert_eq!(CallControl::Resume.as_u8(), 0);
    assert_eq!(CallControl::ShowVideo.as_u8(), 6);
}

#[test]
fn media_frame_packet_type_bytes_are_stable() {
    assert_eq!(PACKET_TYPE_AUDIO_FRAME, 0x33);
    assert_eq!(PACKET_TYPE_VIDEO_FRAME, 0x34);
}
