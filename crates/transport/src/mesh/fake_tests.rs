// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dsem_core::Timestamp;

fn drain(rx: &mut DeliveryReceiver) -> Vec<Delivery> {
    let mut out = Vec::new();
    while let Ok(delivery) = rx.try_recv() {
        out.push(delivery);
    }
    out
}

fn messages(rx: &mut DeliveryReceiver) -> Vec<ProtocolMessage> {
    drain(rx)
        .into_iter()
        .filter_map(|d| match d {
            Delivery::Message { message, .. } => Some(message),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn broadcast_reaches_every_node() {
    let (network, mut receivers) = FakeNetwork::new(3);
    let message = ProtocolMessage::acquire(NodeId::new(2), Timestamp::new(1));

    network.endpoint(NodeId::new(2)).broadcast(message).await.unwrap();

    for rx in &mut receivers {
        assert_eq!(messages(rx), vec![message]);
    }
    assert_eq!(network.sent(), vec![message]);
}

#[tokio::test]
async fn drop_acks_passes_requests() {
    let (network, mut receivers) = FakeNetwork::new(2);
    let node = NodeId::new(1);
    network.set_filter(node, LinkFilter::DropAcks);
    let transport = network.endpoint(node);

    let ack = ProtocolMessage::ack(node, Timestamp::new(2));
    let acquire = ProtocolMessage::acquire(node, Timestamp::new(3));
    transport.broadcast(ack).await.unwrap();
    transport.broadcast(acquire).await.unwrap();

    assert_eq!(messages(&mut receivers[0]), vec![acquire]);
    assert_eq!(network.sent(), vec![ack, acquire]);
}

#[tokio::test]
async fn disconnected_node_cannot_broadcast() {
    let (network, mut receivers) = FakeNetwork::new(2);
    network.disconnect(NodeId::new(0));

    let result = network
        .endpoint(NodeId::new(0))
        .broadcast(ProtocolMessage::acquire(NodeId::new(0), Timestamp::new(1)))
        .await;

    assert!(matches!(result, Err(TransportError::BroadcastFailed { .. })));
    let seen = drain(&mut receivers[1]);
    assert!(matches!(
        seen.as_slice(),
        [Delivery::PeerDeparted { peer }] if *peer == NodeId::new(0)
    ));
    assert!(drain(&mut receivers[0]).is_empty());
}
