// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP full mesh
//!
//! Every node opens one outbound link to every node in the table, its own
//! listener included, and sends a `Hello` naming itself. One writer task per
//! link drains an unbounded queue, so a broadcast never blocks the caller.
//!
//! Frames on a link are numbered from zero. The receiver delivers them in
//! sequence, drops any number it has already delivered, and answers with a
//! cumulative `Received` receipt. The writer keeps every unconfirmed frame
//! and replays all of them after a reconnect, so a broken connection loses
//! and reorders nothing. A sequence gap drops the link, which the writer
//! heals the same way.

use super::{Delivery, DeliveryReceiver, DeliverySender, PeerTransport, TransportError};
use crate::protocol::{self, PeerFrame, ProtocolError, DEFAULT_TIMEOUT, PROTOCOL_VERSION};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use dsem_core::{NodeId, ProtocolMessage};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// Mesh parameters for one node
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub node_id: NodeId,
    /// Listen address of every node, indexed by node id
    pub peers: Vec<SocketAddr>,
    pub retry: RetryPolicy,
    /// How long to wait for every node's inbound link
    pub formation_timeout: Duration,
}

impl MeshConfig {
    pub fn new(node_id: NodeId, peers: Vec<SocketAddr>) -> Self {
        Self {
            node_id,
            peers,
            retry: RetryPolicy::default(),
            formation_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_formation_timeout(mut self, timeout: Duration) -> Self {
        self.formation_timeout = timeout;
        self
    }
}

/// Broadcast handle onto an established mesh. Cheap to clone; outbound
/// links close once every clone is dropped.
#[derive(Clone)]
pub struct TcpMesh {
    node_id: NodeId,
    links: Arc<Vec<mpsc::UnboundedSender<ProtocolMessage>>>,
}

/// Owns the mesh's background tasks
pub struct MeshHandle {
    writers: Vec<JoinHandle<()>>,
    acceptor: JoinHandle<()>,
}

impl TcpMesh {
    /// Connect to every node, then wait until every node has connected back.
    ///
    /// `listener` must already be bound to this node's entry in
    /// `config.peers`.
    pub async fn establish(
        config: MeshConfig,
        listener: TcpListener,
    ) -> Result<(TcpMesh, MeshHandle, DeliveryReceiver), TransportError> {
        let peer_count = config.peers.len();
        if !config.node_id.is_member_of(peer_count) {
            return Err(TransportError::Handshake(format!(
                "node {} is not in a table of {} addresses",
                config.node_id, peer_count
            )));
        }

        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        let (joined_tx, mut joined_rx) = mpsc::unbounded_channel();
        let acceptor = tokio::spawn(accept_loop(
            listener,
            peer_count,
            InboundCursors::default(),
            deliveries_tx.clone(),
            joined_tx,
        ));

        let mut streams = Vec::with_capacity(peer_count);
        for (peer, addr) in NodeId::all(peer_count).zip(config.peers.iter().copied()) {
            match connect(config.node_id, peer, addr, &config.retry).await {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    acceptor.abort();
                    return Err(e);
                }
            }
        }
        tracing::debug!(node = %config.node_id, peers = peer_count, "outbound links open");

        let mut missing: BTreeSet<NodeId> = NodeId::all(peer_count).collect();
        let formation = tokio::time::timeout(config.formation_timeout, async {
            while !missing.is_empty() {
                match joined_rx.recv().await {
                    Some(peer) => {
                        missing.remove(&peer);
                    }
                    None => break,
                }
            }
        })
        .await;
        if formation.is_err() || !missing.is_empty() {
            acceptor.abort();
            return Err(TransportError::MeshTimeout {
                missing: missing.into_iter().collect(),
            });
        }

        let mut links = Vec::with_capacity(peer_count);
        let mut writers = Vec::with_capacity(peer_count);
        for ((peer, addr), stream) in NodeId::all(peer_count)
            .zip(config.peers.iter().copied())
            .zip(streams)
        {
            let (tx, rx) = mpsc::unbounded_channel();
            links.push(tx);
            let link = Link {
                local: config.node_id,
                peer,
                addr,
                retry: config.retry,
                queue: rx,
                deliveries: deliveries_tx.clone(),
                next_seq: 0,
                unconfirmed: VecDeque::new(),
            };
            writers.push(tokio::spawn(write_loop(link, stream)));
        }
        tracing::info!(node = %config.node_id, peers = peer_count, "mesh formed");

        let mesh = TcpMesh {
            node_id: config.node_id,
            links: Arc::new(links),
        };
        Ok((mesh, MeshHandle { writers, acceptor }, deliveries_rx))
    }
}

#[async_trait]
impl PeerTransport for TcpMesh {
    fn local_id(&self) -> NodeId {
        self.node_id
    }

    fn peer_count(&self) -> usize {
        self.links.len()
    }

    async fn broadcast(&self, message: ProtocolMessage) -> Result<(), TransportError> {
        let failed: Vec<NodeId> = NodeId::all(self.links.len())
            .zip(self.links.iter())
            .filter(|(_, link)| link.send(message).is_err())
            .map(|(peer, _)| peer)
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(TransportError::BroadcastFailed { failed })
        }
    }
}

impl MeshHandle {
    /// Wait up to `flush_timeout` for every queued frame to be confirmed by
    /// its receiver, then stop accepting. Writers drain only after every
    /// [`TcpMesh`] clone is dropped.
    pub async fn close(self, flush_timeout: Duration) {
        let MeshHandle { writers, acceptor } = self;
        let aborts: Vec<_> = writers.iter().map(|w| w.abort_handle()).collect();
        let flushed = tokio::time::timeout(flush_timeout, async {
            for writer in writers {
                let _ = writer.await;
            }
        })
        .await;
        if flushed.is_err() {
            tracing::warn!("outbound links did not drain before shutdown");
            for abort in aborts {
                abort.abort();
            }
        }
        acceptor.abort();
        let _ = acceptor.await;
    }

    /// Stop every mesh task immediately
    pub fn abort(self) {
        for writer in &self.writers {
            writer.abort();
        }
        self.acceptor.abort();
    }
}

async fn connect(
    local: NodeId,
    peer: NodeId,
    addr: SocketAddr,
    retry: &RetryPolicy,
) -> Result<TcpStream, TransportError> {
    retry
        .retry("connect", |_| open_link(local, addr))
        .await
        .map_err(|e| TransportError::ConnectFailed {
            peer,
            addr,
            attempts: e.attempts,
            reason: e.last.to_string(),
        })
}

async fn open_link(local: NodeId, addr: SocketAddr) -> Result<TcpStream, ProtocolError> {
    let mut stream = tokio::time::timeout(DEFAULT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    stream.set_nodelay(true)?;
    protocol::send_with_timeout(&mut stream, &PeerFrame::hello(local), DEFAULT_TIMEOUT).await?;
    Ok(stream)
}

/// Outbound side of one link
struct Link {
    local: NodeId,
    peer: NodeId,
    addr: SocketAddr,
    retry: RetryPolicy,
    queue: mpsc::UnboundedReceiver<ProtocolMessage>,
    deliveries: DeliverySender,
    next_seq: u64,
    /// Frames sent but not yet confirmed, oldest first
    unconfirmed: VecDeque<(u64, ProtocolMessage)>,
}

/// One TCP connection of a link. Receipts are read by their own task so the
/// writer can wait on its queue and on receipts at once.
struct Connection {
    writer: OwnedWriteHalf,
    receipts: mpsc::UnboundedReceiver<Result<u64, ProtocolError>>,
    reader: JoinHandle<()>,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        let (tx, receipts) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_receipts(reader, tx));
        Self {
            writer,
            receipts,
            reader,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_receipts(
    mut reader: OwnedReadHalf,
    receipts: mpsc::UnboundedSender<Result<u64, ProtocolError>>,
) {
    loop {
        let receipt = match protocol::recv::<_, PeerFrame>(&mut reader).await {
            Ok(PeerFrame::Received { next_seq }) => Ok(next_seq),
            Ok(other) => {
                tracing::warn!(frame = ?other, "ignoring unexpected frame on outbound link");
                continue;
            }
            Err(e) => Err(e),
        };
        let closed = receipt.is_err();
        if receipts.send(receipt).is_err() || closed {
            return;
        }
    }
}

/// Wait for the next receipt; never resolves while disconnected
async fn next_receipt(connection: &mut Option<Connection>) -> Result<u64, ProtocolError> {
    match connection {
        Some(connection) => connection
            .receipts
            .recv()
            .await
            .unwrap_or(Err(ProtocolError::ConnectionClosed)),
        None => std::future::pending().await,
    }
}

enum Step {
    Send(ProtocolMessage),
    Receipt(Result<u64, ProtocolError>),
    QueueClosed,
}

impl Link {
    fn track(&mut self, message: ProtocolMessage) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.unconfirmed.push_back((seq, message));
        seq
    }

    fn confirm(&mut self, next_seq: u64) {
        while self
            .unconfirmed
            .front()
            .is_some_and(|&(seq, _)| seq < next_seq)
        {
            self.unconfirmed.pop_front();
        }
    }

    /// Open a fresh connection and replay every unconfirmed frame on it,
    /// retrying under the link's policy
    async fn reconnect(&self) -> Result<Connection, TransportError> {
        let frames: Vec<PeerFrame> = self
            .unconfirmed
            .iter()
            .map(|&(seq, message)| PeerFrame::Message { seq, message })
            .collect();
        tracing::info!(peer = %self.peer, replay = frames.len(), "reconnecting");

        let (local, addr, frames) = (self.local, self.addr, &frames);
        self.retry
            .retry("reconnect", |_| async move {
                let mut stream = open_link(local, addr).await?;
                for frame in frames {
                    protocol::send(&mut stream, frame).await?;
                }
                Ok::<_, ProtocolError>(stream)
            })
            .await
            .map(Connection::new)
            .map_err(|e| TransportError::PeerUnreachable {
                peer: self.peer,
                attempts: e.attempts,
                reason: e.last.to_string(),
            })
    }

    fn fail(&self, error: TransportError) {
        tracing::error!(peer = %self.peer, error = %error, "peer unreachable");
        let _ = self.deliveries.send(Delivery::Fault(error));
    }

    /// Wait until the receiver has confirmed every frame, then close
    async fn flush(&mut self, connection: Option<Connection>) {
        if let Some(mut connection) = connection {
            while !self.unconfirmed.is_empty() {
                match connection.receipts.recv().await {
                    Some(Ok(next_seq)) => self.confirm(next_seq),
                    _ => {
                        tracing::debug!(
                            peer = %self.peer,
                            pending = self.unconfirmed.len(),
                            "link closed before every frame was confirmed"
                        );
                        break;
                    }
                }
            }
            let _ = connection.writer.shutdown().await;
        }
        tracing::debug!(peer = %self.peer, "outbound link closed");
    }
}

/// Drain one outbound queue. A broken connection is replaced and every
/// unconfirmed frame replayed; when the retry budget runs out the mesh
/// reports a fault. A connection that closes while nothing is pending is
/// only replaced once there is something to send.
async fn write_loop(mut link: Link, stream: TcpStream) {
    let mut connection = Some(Connection::new(stream));
    loop {
        let step = tokio::select! {
            next = link.queue.recv() => match next {
                Some(message) => Step::Send(message),
                None => Step::QueueClosed,
            },
            receipt = next_receipt(&mut connection) => Step::Receipt(receipt),
        };

        let healthy = match step {
            Step::QueueClosed => break,
            Step::Send(message) => {
                let seq = link.track(message);
                match connection.as_mut() {
                    Some(live) => {
                        let frame = PeerFrame::Message { seq, message };
                        match protocol::send(&mut live.writer, &frame).await {
                            Ok(()) => true,
                            Err(e) => {
                                tracing::warn!(peer = %link.peer, error = %e, "write failed");
                                false
                            }
                        }
                    }
                    None => false,
                }
            }
            Step::Receipt(Ok(next_seq)) => {
                link.confirm(next_seq);
                true
            }
            Step::Receipt(Err(e)) => {
                connection = None;
                if link.unconfirmed.is_empty() {
                    tracing::debug!(peer = %link.peer, error = %e, "idle link closed");
                    true
                } else {
                    tracing::warn!(
                        peer = %link.peer,
                        error = %e,
                        pending = link.unconfirmed.len(),
                        "link lost with unconfirmed frames"
                    );
                    false
                }
            }
        };

        if !healthy {
            connection = None;
            match link.reconnect().await {
                Ok(fresh) => connection = Some(fresh),
                Err(e) => {
                    link.fail(e);
                    return;
                }
            }
        }
    }
    link.flush(connection).await;
}

/// Next expected frame number from each sending node. Shared by every
/// inbound link so a replacement link and the one it replaces never deliver
/// the same frame twice or out of order.
#[derive(Clone, Default)]
struct InboundCursors(Arc<Mutex<HashMap<NodeId, u64>>>);

/// Outcome of offering one inbound frame
#[derive(Debug, PartialEq, Eq)]
enum Accepted {
    Delivered { next_seq: u64 },
    Duplicate { next_seq: u64 },
    Gap { expected: u64 },
    Closed,
}

impl InboundCursors {
    fn lock(&self) -> MutexGuard<'_, HashMap<NodeId, u64>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver `message` if `seq` is the next frame from `peer`. Delivery
    /// happens under the lock so concurrent links stay in sequence.
    fn accept(
        &self,
        peer: NodeId,
        seq: u64,
        message: ProtocolMessage,
        deliveries: &DeliverySender,
    ) -> Accepted {
        let mut cursors = self.lock();
        let next = cursors.entry(peer).or_insert(0);
        match seq.cmp(next) {
            std::cmp::Ordering::Less => Accepted::Duplicate { next_seq: *next },
            std::cmp::Ordering::Greater => Accepted::Gap { expected: *next },
            std::cmp::Ordering::Equal => {
                *next += 1;
                match deliveries.send(Delivery::Message {
                    from: peer,
                    message,
                }) {
                    Ok(()) => Accepted::Delivered { next_seq: *next },
                    Err(_) => Accepted::Closed,
                }
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    peer_count: usize,
    cursors: InboundCursors,
    deliveries: DeliverySender,
    joined: mpsc::UnboundedSender<NodeId>,
) {
    let mut readers = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    readers.spawn(serve_link(
                        stream,
                        remote,
                        peer_count,
                        cursors.clone(),
                        deliveries.clone(),
                        joined.clone(),
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
        }
    }
}

async fn serve_link(
    stream: TcpStream,
    remote: SocketAddr,
    peer_count: usize,
    cursors: InboundCursors,
    deliveries: DeliverySender,
    joined: mpsc::UnboundedSender<NodeId>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let peer = match handshake(&mut reader, peer_count).await {
        Ok(peer) => peer,
        Err(e) => {
            tracing::warn!(%remote, error = %e, "rejected inbound link");
            return;
        }
    };
    tracing::debug!(%peer, %remote, "inbound link ready");
    let _ = joined.send(peer);

    loop {
        match protocol::recv::<_, PeerFrame>(&mut reader).await {
            Ok(PeerFrame::Message { seq, message }) => {
                if message.sender != peer {
                    tracing::warn!(%peer, %message, "message sender differs from link owner");
                }
                let next_seq = match cursors.accept(peer, seq, message, &deliveries) {
                    Accepted::Delivered { next_seq } => next_seq,
                    Accepted::Duplicate { next_seq } => {
                        tracing::debug!(%peer, seq, "dropping replayed frame");
                        next_seq
                    }
                    Accepted::Gap { expected } => {
                        tracing::warn!(%peer, seq, expected, "frame sequence gap");
                        let _ = deliveries.send(Delivery::LinkLost {
                            peer,
                            reason: format!("expected frame {expected}, got {seq}"),
                        });
                        return;
                    }
                    Accepted::Closed => return,
                };
                let receipt = PeerFrame::Received { next_seq };
                if let Err(e) =
                    protocol::send_with_timeout(&mut writer, &receipt, DEFAULT_TIMEOUT).await
                {
                    tracing::debug!(%peer, error = %e, "could not send receipt");
                }
            }
            Ok(other) => {
                tracing::warn!(%peer, frame = ?other, "ignoring unexpected frame on inbound link");
            }
            Err(ProtocolError::ConnectionClosed) => {
                tracing::debug!(%peer, "inbound link closed");
                let _ = deliveries.send(Delivery::PeerDeparted { peer });
                return;
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "inbound link lost");
                let _ = deliveries.send(Delivery::LinkLost {
                    peer,
                    reason: e.to_string(),
                });
                return;
            }
        }
    }
}

async fn handshake(reader: &mut OwnedReadHalf, peer_count: usize) -> Result<NodeId, TransportError> {
    match protocol::recv_with_timeout(reader, DEFAULT_TIMEOUT).await? {
        PeerFrame::Hello { node_id, version } => {
            if version != PROTOCOL_VERSION {
                return Err(TransportError::Handshake(format!(
                    "node {node_id} speaks version {version}, expected {PROTOCOL_VERSION}"
                )));
            }
            if !node_id.is_member_of(peer_count) {
                return Err(TransportError::Handshake(format!(
                    "node {node_id} is outside a network of {peer_count} nodes"
                )));
            }
            Ok(node_id)
        }
        other => Err(TransportError::Handshake(format!(
            "expected hello, got {other:?}"
        ))),
    }
}

#[cfg(test)]
#[path = "tcp_tests.rs"]
mod tests;
