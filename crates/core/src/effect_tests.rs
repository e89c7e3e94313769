// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::message::MessageKind;

fn request(kind: MessageKind, sender: u32, ts: u64) -> ProtocolMessage {
    ProtocolMessage::new(NodeId::new(sender), kind, Timestamp::new(ts))
}

#[test]
fn stabilized_returns_popped_message() {
    let acquire = request(MessageKind::Acquire, 1, 4);
    let release = request(MessageKind::Release, 2, 7);

    let popped = Event::AcquireStabilized {
        message: acquire,
        permits: 0,
    };
    assert_eq!(popped.stabilized(), Some(&acquire));

    let returned = Event::ReleaseStabilized {
        message: release,
        permits: 1,
    };
    assert_eq!(returned.stabilized(), Some(&release));
}

#[yare::parameterized(
    queued = { Event::RequestQueued { message: ProtocolMessage::acquire(NodeId::new(0), Timestamp::new(1)) } },
    ack = { Event::AckObserved { from: NodeId::new(0), timestamp: Timestamp::new(2), stable_bound: Timestamp::new(1) } },
    violation = { Event::InvariantViolation(Violation::DuplicateRequest { message: ProtocolMessage::release(NodeId::new(1), Timestamp::new(3)) }) },
)]
fn other_events_have_no_stabilized_message(event: Event) {
    assert_eq!(event.stabilized(), None);
}

#[yare::parameterized(
    unknown_sender = {
        Violation::UnknownSender { message: ProtocolMessage::acquire(NodeId::new(9), Timestamp::new(3)) },
        "unknown sender: ACQUIRE@3 from 9",
    },
    duplicate = {
        Violation::DuplicateRequest { message: ProtocolMessage::release(NodeId::new(1), Timestamp::new(5)) },
        "duplicate request delivered: RELEASE@5 from 1",
    },
    regression = {
        Violation::WatermarkRegression { from: NodeId::new(2), timestamp: Timestamp::new(4), watermark: Timestamp::new(8) },
        "ack from 2 at 4 is below its watermark 8",
    },
    release_without_grant = {
        Violation::ReleaseWithoutGrant { message: ProtocolMessage::release(NodeId::new(0), Timestamp::new(6)) },
        "no matching local grant: RELEASE@6 from 0",
    },
    late_request = {
        Violation::LateRequest { message: ProtocolMessage::acquire(NodeId::new(1), Timestamp::new(3)), stable_bound: Timestamp::new(10) },
        "ACQUIRE@3 from 1 arrived below the stable bound 10",
    },
)]
fn violation_display_names_the_message(violation: Violation, expected: &str) {
    let text = violation.to_string();
    assert!(text.contains(expected), "got {text:?}");
}

#[test]
fn only_late_requests_are_fatal() {
    let message = ProtocolMessage::acquire(NodeId::new(1), Timestamp::new(3));
    assert!(Violation::LateRequest {
        message,
        stable_bound: Timestamp::new(10),
    }
    .is_fatal());
    assert!(!Violation::DuplicateRequest { message }.is_fatal());
    assert!(!Violation::UnknownSender { message }.is_fatal());
    assert!(!Violation::ReleaseWithoutGrant { message }.is_fatal());
}
