// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn node(id: u32) -> NodeId {
    NodeId::new(id)
}

fn ts(value: u64) -> Timestamp {
    Timestamp::new(value)
}

fn engine(id: u32, peers: usize) -> CoordinationEngine {
    CoordinationEngine::new(SemaphoreConfig::new(node(id), peers)).unwrap()
}

fn broadcasts(effects: &[Effect]) -> Vec<ProtocolMessage> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Broadcast(msg) => Some(*msg),
            _ => None,
        })
        .collect()
}

fn violations(effects: &[Effect]) -> Vec<Violation> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Emit(Event::InvariantViolation(v)) => Some(v.clone()),
            _ => None,
        })
        .collect()
}

fn granted(effects: &[Effect]) -> bool {
    effects.iter().any(|e| matches!(e, Effect::Granted { .. }))
}

/// Deliver `msg` to the engine and deliver its own resulting broadcasts back
/// to itself until quiet. Only meaningful for a single-node network.
fn loopback(engine: &mut CoordinationEngine, msg: ProtocolMessage) -> Vec<Effect> {
    let mut all = Vec::new();
    let mut pending = vec![msg];
    while let Some(next) = pending.pop() {
        let effects = engine.on_message(next);
        pending.extend(broadcasts(&effects));
        all.extend(effects);
    }
    all
}

#[yare::parameterized(
    no_peers = { 0, 0, 1, ConfigError::NoPeers },
    node_out_of_range = { 3, 3, 1, ConfigError::NodeOutOfRange { node_id: NodeId::new(3), peers: 3 } },
    no_permits = { 0, 2, 0, ConfigError::NoPermits },
)]
fn invalid_config_is_rejected(id: u32, peers: usize, permits: u32, expected: ConfigError) {
    let config = SemaphoreConfig::new(node(id), peers).with_permits(permits);
    assert_eq!(CoordinationEngine::new(config).unwrap_err(), expected);
}

#[test]
fn new_engine_starts_idle_with_full_capacity() {
    let config = SemaphoreConfig::new(node(1), 3).with_permits(2);
    let engine = CoordinationEngine::new(config).unwrap();
    let status = engine.status();

    assert_eq!(status.permits, 2);
    assert_eq!(status.local, LocalState::Idle);
    assert_eq!(status.clock, Timestamp::ZERO);
    assert_eq!(status.stable_bound, Timestamp::ZERO);
    assert!(!engine.is_granted());
}

#[test]
fn acquire_broadcasts_request_stamped_with_tick() {
    let mut engine = engine(1, 3);
    let effects = engine.request_acquire().unwrap();

    assert_eq!(
        effects,
        vec![Effect::Broadcast(ProtocolMessage::acquire(node(1), ts(1)))]
    );
    assert!(matches!(engine.local(), LocalState::Waiting { .. }));
}

#[test]
fn second_acquire_while_waiting_is_usage_error() {
    let mut engine = engine(0, 2);
    engine.request_acquire().unwrap();
    assert_eq!(engine.request_acquire(), Err(UsageError::AcquirePending));
}

#[test]
fn release_without_grant_is_usage_error() {
    let mut engine = engine(0, 2);
    assert_eq!(engine.request_release(), Err(UsageError::NotHolding));

    engine.request_acquire().unwrap();
    assert_eq!(engine.request_release(), Err(UsageError::NotHolding));
    assert_eq!(engine.status().clock, ts(1));
}

#[test]
fn single_node_grants_after_own_ack() {
    let mut engine = engine(0, 1);
    let request = broadcasts(&engine.request_acquire().unwrap())[0];

    let effects = loopback(&mut engine, request);

    assert!(granted(&effects));
    assert!(engine.is_granted());
    assert_eq!(engine.permits(), 0);
}

#[test]
fn single_node_release_returns_permit() {
    let mut engine = engine(0, 1);
    let request = broadcasts(&engine.request_acquire().unwrap())[0];
    loopback(&mut engine, request);

    let release = broadcasts(&engine.request_release().unwrap())[0];
    assert_eq!(release.kind, MessageKind::Release);
    assert!(!engine.is_granted());

    let effects = loopback(&mut engine, release);
    assert!(effects
        .iter()
        .any(|e| matches!(e, Effect::Emit(Event::ReleaseStabilized { permits: 1, .. }))));
    assert_eq!(engine.permits(), 1);
    assert_eq!(engine.status().releases_stabilized, 1);
}

#[test]
fn request_is_acknowledged_with_clock_past_its_timestamp() {
    let mut engine = engine(1, 2);
    let effects = engine.on_message(ProtocolMessage::acquire(node(0), ts(10)));

    let acks = broadcasts(&effects);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].kind, MessageKind::Ack);
    assert_eq!(acks[0].sender, node(1));
    assert!(acks[0].timestamp > ts(10));
    assert_eq!(engine.status().pending_acquires, 1);
}

#[test]
fn request_waits_for_every_peer_to_acknowledge() {
    let mut engine = engine(0, 2);
    let request = broadcasts(&engine.request_acquire().unwrap())[0];
    let own_ack = broadcasts(&engine.on_message(request))[0];

    let effects = engine.on_message(own_ack);
    assert!(!granted(&effects));
    assert_eq!(engine.stable_bound(), Timestamp::ZERO);

    // Node 1 acknowledges at a time after having seen the request
    let effects = engine.on_message(ProtocolMessage::ack(node(1), ts(3)));
    assert!(granted(&effects));
    assert!(engine.is_granted());
}

#[test]
fn ack_at_request_timestamp_does_not_stabilize_it() {
    let mut engine = engine(1, 2);
    engine.on_message(ProtocolMessage::acquire(node(0), ts(5)));
    engine.on_message(ProtocolMessage::ack(node(0), ts(5)));
    engine.on_message(ProtocolMessage::ack(node(1), ts(9)));

    assert_eq!(engine.stable_bound(), ts(5));
    assert_eq!(engine.status().pending_acquires, 1);
    assert_eq!(engine.permits(), 1);
}

#[test]
fn stable_releases_apply_before_stable_acquires() {
    let mut engine = engine(2, 3);
    // Node 0 holds the only permit
    engine.on_message(ProtocolMessage::acquire(node(0), ts(1)));
    for peer in 0..3 {
        engine.on_message(ProtocolMessage::ack(node(peer), ts(2)));
    }
    assert_eq!(engine.permits(), 0);

    // Node 1 queues behind; node 0 releases; both stabilize in one pass
    engine.on_message(ProtocolMessage::acquire(node(1), ts(3)));
    engine.on_message(ProtocolMessage::release(node(0), ts(4)));
    engine.on_message(ProtocolMessage::ack(node(0), ts(10)));
    engine.on_message(ProtocolMessage::ack(node(1), ts(10)));
    let effects = engine.on_message(ProtocolMessage::ack(node(2), ts(10)));

    let order: Vec<_> = effects
        .iter()
        .filter_map(|e| match e {
            Effect::Emit(event) => event.stabilized().copied(),
            _ => None,
        })
        .collect();
    assert_eq!(
        order,
        vec![
            ProtocolMessage::release(node(0), ts(4)),
            ProtocolMessage::acquire(node(1), ts(3)),
        ]
    );
    assert_eq!(engine.permits(), 0);
}

#[test]
fn unknown_sender_is_reported_and_ignored() {
    let mut engine = engine(0, 2);
    let message = ProtocolMessage::acquire(node(5), ts(1));
    let effects = engine.on_message(message);

    assert_eq!(violations(&effects), vec![Violation::UnknownSender { message }]);
    assert!(broadcasts(&effects).is_empty());
    assert_eq!(engine.status().clock, Timestamp::ZERO);
}

#[test]
fn duplicate_request_is_reported_and_not_reacknowledged() {
    let mut engine = engine(0, 2);
    let message = ProtocolMessage::acquire(node(1), ts(1));
    engine.on_message(message);
    let effects = engine.on_message(message);

    assert_eq!(
        violations(&effects),
        vec![Violation::DuplicateRequest { message }]
    );
    assert!(broadcasts(&effects).is_empty());
    assert_eq!(engine.status().pending_acquires, 1);
}

fn stabilized_to(bound: u64) -> CoordinationEngine {
    let mut engine = engine(0, 2);
    engine.on_message(ProtocolMessage::ack(node(0), ts(bound)));
    engine.on_message(ProtocolMessage::ack(node(1), ts(bound)));
    assert_eq!(engine.stable_bound(), ts(bound));
    engine
}

#[yare::parameterized(
    acquire = { ProtocolMessage::acquire(NodeId::new(1), Timestamp::new(3)) },
    release = { ProtocolMessage::release(NodeId::new(1), Timestamp::new(9)) },
)]
fn request_below_stable_bound_is_refused(message: ProtocolMessage) {
    let mut engine = stabilized_to(10);
    let effects = engine.on_message(message);

    assert_eq!(
        violations(&effects),
        vec![Violation::LateRequest {
            message,
            stable_bound: ts(10),
        }]
    );
    assert!(violations(&effects)[0].is_fatal());
    assert!(broadcasts(&effects).is_empty());
    let status = engine.status();
    assert_eq!(status.pending_acquires, 0);
    assert_eq!(status.pending_releases, 0);
    assert_eq!(status.permits, 1);
}

#[test]
fn request_at_stable_bound_is_queued() {
    let mut engine = stabilized_to(10);
    let message = ProtocolMessage::acquire(node(1), ts(10));
    let effects = engine.on_message(message);

    assert!(violations(&effects).is_empty());
    assert_eq!(broadcasts(&effects).len(), 1);
    assert_eq!(engine.status().pending_acquires, 1);
}

#[test]
fn watermark_regression_is_reported() {
    let mut engine = engine(0, 2);
    engine.on_message(ProtocolMessage::ack(node(1), ts(8)));
    let effects = engine.on_message(ProtocolMessage::ack(node(1), ts(3)));

    assert_eq!(
        violations(&effects),
        vec![Violation::WatermarkRegression {
            from: node(1),
            timestamp: ts(3),
            watermark: ts(8),
        }]
    );
}

#[test]
fn own_release_without_local_grant_is_reported_but_processed() {
    let mut engine = engine(0, 1);
    let message = ProtocolMessage::release(node(0), ts(1));
    let effects = engine.on_message(message);

    assert_eq!(
        violations(&effects),
        vec![Violation::ReleaseWithoutGrant { message }]
    );
    assert_eq!(engine.status().pending_releases, 1);
    assert_eq!(broadcasts(&effects).len(), 1);
}

#[test]
fn handle_dispatches_by_input() {
    let mut engine = engine(0, 1);
    let effects = engine.handle(EngineInput::Acquire).unwrap();
    let request = broadcasts(&effects)[0];

    let effects = engine.handle(EngineInput::Message(request)).unwrap();
    assert_eq!(broadcasts(&effects)[0].kind, MessageKind::Ack);

    assert_eq!(
        engine.handle(EngineInput::Release),
        Err(UsageError::NotHolding)
    );
}
