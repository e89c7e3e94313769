// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn node(id: u32) -> NodeId {
    NodeId::new(id)
}

fn ts(value: u64) -> Timestamp {
    Timestamp::new(value)
}

#[test]
fn lower_timestamp_orders_first() {
    let early = ProtocolMessage::acquire(node(2), ts(3));
    let late = ProtocolMessage::acquire(node(0), ts(4));
    assert!(early < late);
}

#[test]
fn equal_timestamps_break_ties_by_sender() {
    let low = ProtocolMessage::acquire(node(1), ts(5));
    let high = ProtocolMessage::acquire(node(2), ts(5));
    assert!(low < high);

    let mut messages = vec![high, low];
    messages.sort();
    assert_eq!(messages, vec![low, high]);
}

#[yare::parameterized(
    acquire = { MessageKind::Acquire, 0 },
    release = { MessageKind::Release, 1 },
    ack = { MessageKind::Ack, 2 },
)]
fn kind_uses_integer_tag(kind: MessageKind, tag: u8) {
    assert_eq!(u8::from(kind), tag);
    assert_eq!(MessageKind::try_from(tag), Ok(kind));
}

#[test]
fn unknown_kind_tag_is_rejected() {
    assert_eq!(MessageKind::try_from(3), Err(UnknownKind(3)));

    let json = r#"{"sender":1,"kind":9,"timestamp":4}"#;
    assert!(serde_json::from_str::<ProtocolMessage>(json).is_err());
}

#[test]
fn wire_form_has_integer_fields() {
    let msg = ProtocolMessage::release(node(1), ts(4));
    let json = serde_json::to_string(&msg).unwrap();
    assert_eq!(json, r#"{"sender":1,"kind":1,"timestamp":4}"#);
}

#[test]
fn display_names_kind_time_and_sender() {
    let msg = ProtocolMessage::ack(node(2), ts(9));
    assert_eq!(msg.to_string(), "ACK@9 from 2");
}
