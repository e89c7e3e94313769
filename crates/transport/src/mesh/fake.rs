// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory mesh for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{Delivery, DeliveryReceiver, DeliverySender, PeerTransport, TransportError};
use async_trait::async_trait;
use dsem_core::{MessageKind, NodeId, ProtocolMessage};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Which outbound messages of a node reach the network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkFilter {
    #[default]
    PassAll,
    /// Drop ACKs, pass requests
    DropAcks,
    DropAll,
}

impl LinkFilter {
    fn passes(self, message: &ProtocolMessage) -> bool {
        match self {
            LinkFilter::PassAll => true,
            LinkFilter::DropAcks => message.kind != MessageKind::Ack,
            LinkFilter::DropAll => false,
        }
    }
}

struct NetworkState {
    inboxes: Vec<DeliverySender>,
    filters: Vec<LinkFilter>,
    disconnected: Vec<bool>,
    sent: Vec<ProtocolMessage>,
}

/// Shared in-memory network with immediate, ordered delivery
#[derive(Clone)]
pub struct FakeNetwork {
    state: Arc<Mutex<NetworkState>>,
}

/// One node's view of a [`FakeNetwork`]
#[derive(Clone)]
pub struct FakeTransport {
    node_id: NodeId,
    network: FakeNetwork,
}

impl FakeNetwork {
    /// Create a network of `peers` nodes and the delivery queue of each
    pub fn new(peers: usize) -> (Self, Vec<DeliveryReceiver>) {
        let (inboxes, receivers): (Vec<_>, Vec<_>) =
            (0..peers).map(|_| mpsc::unbounded_channel()).unzip();
        let state = NetworkState {
            inboxes,
            filters: vec![LinkFilter::PassAll; peers],
            disconnected: vec![false; peers],
            sent: Vec::new(),
        };
        let network = Self {
            state: Arc::new(Mutex::new(state)),
        };
        (network, receivers)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn endpoint(&self, node_id: NodeId) -> FakeTransport {
        FakeTransport {
            node_id,
            network: self.clone(),
        }
    }

    /// Filter outbound traffic of `node`
    pub fn set_filter(&self, node: NodeId, filter: LinkFilter) {
        if let Some(slot) = self.lock().filters.get_mut(node.index()) {
            *slot = filter;
        }
    }

    /// Cut `node` off: its broadcasts fail and every other node sees it
    /// depart
    pub fn disconnect(&self, node: NodeId) {
        let mut state = self.lock();
        if let Some(flag) = state.disconnected.get_mut(node.index()) {
            *flag = true;
        }
        for (index, inbox) in state.inboxes.iter().enumerate() {
            if index != node.index() {
                let _ = inbox.send(Delivery::PeerDeparted { peer: node });
            }
        }
    }

    /// Every message broadcast so far, filtered or not
    pub fn sent(&self) -> Vec<ProtocolMessage> {
        self.lock().sent.clone()
    }

    /// Push a delivery straight into `to`'s queue
    pub fn inject(&self, to: NodeId, delivery: Delivery) {
        if let Some(inbox) = self.lock().inboxes.get(to.index()) {
            let _ = inbox.send(delivery);
        }
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    fn local_id(&self) -> NodeId {
        self.node_id
    }

    fn peer_count(&self) -> usize {
        self.network.lock().inboxes.len()
    }

    async fn broadcast(&self, message: ProtocolMessage) -> Result<(), TransportError> {
        let mut state = self.network.lock();
        let sender = self.node_id.index();
        if state.disconnected.get(sender).copied().unwrap_or(true) {
            return Err(TransportError::BroadcastFailed {
                failed: NodeId::all(state.inboxes.len()).collect(),
            });
        }
        state.sent.push(message);
        let filter = state.filters[sender];
        if !filter.passes(&message) {
            return Ok(());
        }
        for inbox in &state.inboxes {
            // A dropped receiver means that node has stopped
            let _ = inbox.send(Delivery::Message {
                from: self.node_id,
                message,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
