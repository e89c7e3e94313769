// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reliable FIFO broadcast between every pair of nodes
//!
//! A transport delivers each broadcast to all nodes, the sender included, in
//! per-link FIFO order. Inbound traffic and link faults flow into a single
//! [`DeliveryReceiver`] owned by the node runtime.

mod tcp;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use tcp::{MeshConfig, MeshHandle, TcpMesh};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeNetwork, FakeTransport, LinkFilter};

use crate::protocol::ProtocolError;
use async_trait::async_trait;
use dsem_core::{NodeId, ProtocolMessage};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from the peer mesh
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broadcast could not be queued for nodes {failed:?}")]
    BroadcastFailed { failed: Vec<NodeId> },

    #[error("could not connect to node {peer} at {addr} after {attempts} attempts: {reason}")]
    ConnectFailed {
        peer: NodeId,
        addr: SocketAddr,
        attempts: u32,
        reason: String,
    },

    #[error("node {peer} unreachable after {attempts} attempts: {reason}")]
    PeerUnreachable {
        peer: NodeId,
        attempts: u32,
        reason: String,
    },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("mesh did not form in time, missing inbound links from {missing:?}")]
    MeshTimeout { missing: Vec<NodeId> },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the transport hands to the node runtime
#[derive(Debug)]
pub enum Delivery {
    /// A protocol message from `from`
    Message {
        from: NodeId,
        message: ProtocolMessage,
    },
    /// The inbound link from `peer` closed cleanly
    PeerDeparted { peer: NodeId },
    /// The inbound link from `peer` broke mid-stream
    LinkLost { peer: NodeId, reason: String },
    /// The transport can no longer guarantee delivery
    Fault(TransportError),
}

pub type DeliverySender = mpsc::UnboundedSender<Delivery>;
pub type DeliveryReceiver = mpsc::UnboundedReceiver<Delivery>;

/// Broadcast fabric used by the node runtime
#[async_trait]
pub trait PeerTransport: Clone + Send + Sync + 'static {
    /// This node's id
    fn local_id(&self) -> NodeId;

    /// Network size, this node included
    fn peer_count(&self) -> usize;

    /// Queue `message` for every node, this node included, preserving
    /// per-link FIFO order
    async fn broadcast(&self, message: ProtocolMessage) -> Result<(), TransportError>;
}
