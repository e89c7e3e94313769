// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rendezvous: one round of address exchange before the mesh forms
//!
//! The service accepts exactly one registration per node, then sends every
//! node the complete table indexed by node id and stops. Nothing after
//! bootstrap depends on it.

use dsem_core::NodeId;
use dsem_transport::protocol::{self, ProtocolError, DEFAULT_TIMEOUT};
use dsem_transport::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{info, warn};

/// A node announcing where it listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub node_id: NodeId,
    pub address: String,
    pub port: u16,
}

/// Every node's address, indexed by node id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTable {
    pub addresses: Vec<String>,
    pub ports: Vec<u16>,
}

impl PeerTable {
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Parse the table into socket addresses
    pub fn socket_addrs(&self) -> Result<Vec<SocketAddr>, RendezvousError> {
        if self.addresses.len() != self.ports.len() {
            return Err(RendezvousError::InvalidTable(format!(
                "{} addresses but {} ports",
                self.addresses.len(),
                self.ports.len()
            )));
        }
        NodeId::all(self.len())
            .zip(self.addresses.iter().zip(&self.ports))
            .map(|(node, (address, port))| {
                let ip: IpAddr = address.parse().map_err(|_| {
                    RendezvousError::InvalidTable(format!(
                        "node {node} has unparsable address {address:?}"
                    ))
                })?;
                Ok(SocketAddr::new(ip, *port))
            })
            .collect()
    }
}

/// Service answer to a registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RendezvousReply {
    Table(PeerTable),
    Rejected { reason: String },
}

/// Bootstrap errors. All are fatal to the node or the service.
#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("failed to bind rendezvous at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("rendezvous needs at least one node")]
    NoPeers,

    #[error("registration rejected: {reason}")]
    Rejected { reason: String },

    #[error("rendezvous at {addr} unreachable after {attempts} attempts: {reason}")]
    Unreachable {
        addr: SocketAddr,
        attempts: u32,
        reason: String,
    },

    #[error("no peer table within {0:?}")]
    Timeout(Duration),

    #[error("round closed after {timeout:?} with nodes {missing:?} unregistered")]
    Incomplete {
        missing: Vec<NodeId>,
        timeout: Duration,
    },

    #[error("invalid peer table: {0}")]
    InvalidTable(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One-shot bootstrap service for a network of `peers` nodes
pub struct RendezvousService {
    listener: TcpListener,
    peers: usize,
    registration_timeout: Duration,
    round_timeout: Option<Duration>,
}

impl RendezvousService {
    pub async fn bind(addr: SocketAddr, peers: usize) -> Result<Self, RendezvousError> {
        if peers == 0 {
            return Err(RendezvousError::NoPeers);
        }
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RendezvousError::Bind { addr, source })?;
        Ok(Self {
            listener,
            peers,
            registration_timeout: DEFAULT_TIMEOUT,
            round_timeout: None,
        })
    }

    /// How long a connected node may take to send its registration
    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    /// Give up on the round if some node has not registered by then
    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = Some(timeout);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RendezvousError> {
        Ok(self.listener.local_addr()?)
    }

    /// Collect one registration per node, publish the table, stop.
    ///
    /// An out-of-range or repeated node id aborts the round: every node
    /// connected so far is told why, and the service returns the error. So
    /// does the round deadline, naming the nodes that never registered.
    pub async fn serve(self) -> Result<PeerTable, RendezvousError> {
        let mut addresses: Vec<Option<String>> = vec![None; self.peers];
        let mut ports = vec![0u16; self.peers];
        let mut clients: Vec<TcpStream> = Vec::with_capacity(self.peers);
        let deadline = self.round_timeout.map(|t| Instant::now() + t);

        while clients.len() < self.peers {
            let accepted = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.listener.accept()).await,
                None => Ok(self.listener.accept().await),
            };
            let Ok(accepted) = accepted else {
                let missing: Vec<NodeId> = NodeId::all(self.peers)
                    .filter(|node| addresses[node.index()].is_none())
                    .collect();
                let timeout = self.round_timeout.unwrap_or_default();
                warn!(?missing, ?timeout, "rendezvous round timed out");
                let reply = RendezvousReply::Rejected {
                    reason: format!("nodes {missing:?} did not register within {timeout:?}"),
                };
                broadcast(&mut clients, &reply).await;
                return Err(RendezvousError::Incomplete { missing, timeout });
            };
            let (mut stream, remote) = accepted?;
            let registration: Registration =
                match protocol::recv_with_timeout(&mut stream, self.registration_timeout).await {
                    Ok(registration) => registration,
                    Err(e) => {
                        warn!(%remote, error = %e, "dropping client without registration");
                        continue;
                    }
                };
            clients.push(stream);

            let node = registration.node_id;
            let reason = match addresses.get_mut(node.index()) {
                None => Some(format!(
                    "node id {node} is outside a network of {} nodes",
                    self.peers
                )),
                Some(slot) if slot.is_some() => Some(format!("node id {node} registered twice")),
                Some(slot) => {
                    *slot = Some(registration.address.clone());
                    ports[node.index()] = registration.port;
                    None
                }
            };
            if let Some(reason) = reason {
                warn!(%node, %remote, %reason, "aborting rendezvous");
                let reply = RendezvousReply::Rejected {
                    reason: reason.clone(),
                };
                broadcast(&mut clients, &reply).await;
                return Err(RendezvousError::Rejected { reason });
            }
            info!(
                %node,
                address = %registration.address,
                port = registration.port,
                registered = clients.len(),
                expected = self.peers,
                "node registered"
            );
        }

        let table = PeerTable {
            addresses: addresses.into_iter().map(Option::unwrap_or_default).collect(),
            ports,
        };
        broadcast(&mut clients, &RendezvousReply::Table(table.clone())).await;
        info!(peers = self.peers, "peer table published");
        Ok(table)
    }
}

async fn broadcast(clients: &mut [TcpStream], reply: &RendezvousReply) {
    for client in clients {
        if let Err(e) = protocol::send_with_timeout(client, reply, DEFAULT_TIMEOUT).await {
            warn!(error = %e, "could not deliver rendezvous reply");
        }
    }
}

/// Register with the rendezvous service and wait for the peer table.
///
/// Connecting is retried under `retry` because the service may start after
/// the nodes. The table must cover exactly `peers` nodes.
pub async fn register(
    rendezvous: SocketAddr,
    registration: Registration,
    peers: usize,
    retry: &RetryPolicy,
    timeout: Duration,
) -> Result<PeerTable, RendezvousError> {
    let mut stream = retry
        .retry("rendezvous", |_| TcpStream::connect(rendezvous))
        .await
        .map_err(|e| RendezvousError::Unreachable {
            addr: rendezvous,
            attempts: e.attempts,
            reason: e.last.to_string(),
        })?;
    protocol::send_with_timeout(&mut stream, &registration, DEFAULT_TIMEOUT).await?;
    info!(%rendezvous, node = %registration.node_id, "registered, waiting for peer table");

    let reply = match protocol::recv_with_timeout(&mut stream, timeout).await {
        Ok(reply) => reply,
        Err(ProtocolError::Timeout) => return Err(RendezvousError::Timeout(timeout)),
        Err(e) => return Err(e.into()),
    };
    match reply {
        RendezvousReply::Table(table) if table.len() == peers => Ok(table),
        RendezvousReply::Table(table) => Err(RendezvousError::InvalidTable(format!(
            "expected {peers} nodes, got {}",
            table.len()
        ))),
        RendezvousReply::Rejected { reason } => Err(RendezvousError::Rejected { reason }),
    }
}

#[cfg(test)]
#[path = "rendezvous_tests.rs"]
mod tests;
