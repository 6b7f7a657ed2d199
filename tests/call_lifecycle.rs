use std::sync::Arc;

use callcore::manager::{Manager, ManagerConfig};
use callcore::time::ManualClock;
use callcore::transport::mock::{MockResolver, MockTransport};
use callcore::types::{CallState, PeerId};

fn manager(clock: Arc<ManualClock>) -> Arc<Manager> {
    Manager::new(
        Arc::new(MockTransport::new()),
        Arc::new(MockResolver),
        ManagerConfig::default(),
        clock,
    )
}

#[test]
fn outgoing_call_reaches_sending_video_when_both_media_enabled() {
    let manager = manager(Arc::new(ManualClock::new()));
    manager.start().unwrap();
    let call = manager.start_call(PeerId(1), 32_000, 500_000).unwrap();
    assert_eq!(call.state(), CallState::SendingVideo);
    assert!(call.has_started());
}

#[test]
fn inbound_call_answered_reaches_accepting_state() {
    let manager = manager(Arc::new(ManualClock::new()));
    manager.start().unwrap();

    // Simulate an inbound CallRequest having created a call in state None:
    // start_call always marks `sending`, so we exercise answer_call against
    // a call seeded directly through the manager's table via a fresh
    // outgoing call downgraded back to None for this scenario.
    let call = manager.start_call(PeerId(2), 32_000, 0).unwrap();
    call.set_capabilities_and_state(false, false, true);
    assert_eq!(call.state(), CallState::None);

    let answered = manager.answer_call(PeerId(2), 32_000, 500_000).unwrap();
    assert_eq!(answered.state(), CallState::AcceptingVideo);
}

#[test]
fn end_call_is_reflected_in_active_call_count() {
    let manager = manager(Arc::new(ManualClock::new()));
    manager.start().unwrap();
    manager.start_call(PeerId(1), 32_000, 0).unwrap();
    manager.start_call(PeerId(2), 32_000, 0).unwrap();
    assert_eq!(manager.get_call_count(), 2);

    manager.end_call(PeerId(1)).unwrap();
    assert_eq!(manager.get_call_count(), 1);
    assert!(manager.get_call(PeerId(1)).is_err());
}

#[test]
fn stop_transitions_every_call_to_finished_and_empties_table() {
    let manager = manager(Arc::new(ManualClock::new()));
    manager.start().unwrap();
    let a = manager.start_call(PeerId(1), 32_000, 0).unwrap();
    let b = manager.start_call(PeerId(2), 32_000, 0).unwrap();

    manager.stop();

    assert_eq!(a.state(), CallState::Finished);
    assert_eq!(b.state(), CallState::Finished);
    assert_eq!(manager.get_call_count(), 0);
    assert!(!manager.is_running());
}

#[test]
fn control_flags_toggle_via_inbound_packet() {
    use callcore::signaling::{CallControlPacket, PACKET_TYPE_CALL_CONTROL};
    use callcore::types::CallControl;

    let transport = Arc::new(MockTransport::new());
    let manager = Manager::new(
        transport.clone(),
        Arc::new(MockResolver),
        ManagerConfig::default(),
        Arc::new(ManualClock::new()),
    );
    manager.start().unwrap();
    let call = manager.start_call(PeerId(7), 32_000, 0).unwrap();
    assert!(!call.paused());

    let packet = CallControlPacket {
        call_id: call.call_id().0,
        control: CallControl::Pause,
        ts_nanos: 0,
    };
    // Address whose first four bytes big-endian encode peer 7, matching
    // the default resolver's reverse convention.
    transport.deliver(PACKET_TYPE_CALL_CONTROL, packet.to_bytes().into(), vec![0, 0, 0, 7, 0, 0].into());

    assert!(call.paused());
}
