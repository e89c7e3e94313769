// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination engine: the per-node distributed semaphore state machine
//!
//! Every node runs one engine. Requests (ACQUIRE/RELEASE) are broadcast to all
//! nodes, acknowledged by all nodes, and applied in `(timestamp, sender)`
//! order once every node is known to have seen them. Because every node
//! applies the same stable prefix in the same order, every node reaches the
//! same grant decisions without a central lock manager.

use crate::clock::{LamportClock, Timestamp};
use crate::coordination::queue::PendingQueue;
use crate::coordination::watermark::{Advance, Watermarks};
use crate::effect::{Effect, Event, Violation};
use crate::id::NodeId;
use crate::message::{MessageKind, ProtocolMessage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Semaphore configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreConfig {
    /// This node's id
    pub node_id: NodeId,
    /// Fixed size of the network, this node included
    pub peers: usize,
    /// Initial permit count (1 for mutual exclusion)
    pub permits: u32,
}

impl SemaphoreConfig {
    pub fn new(node_id: NodeId, peers: usize) -> Self {
        Self {
            node_id,
            peers,
            permits: 1,
        }
    }

    pub fn with_permits(mut self, permits: u32) -> Self {
        self.permits = permits;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peers == 0 {
            return Err(ConfigError::NoPeers);
        }
        if !self.node_id.is_member_of(self.peers) {
            return Err(ConfigError::NodeOutOfRange {
                node_id: self.node_id,
                peers: self.peers,
            });
        }
        if self.permits == 0 {
            return Err(ConfigError::NoPermits);
        }
        Ok(())
    }
}

/// Invalid semaphore configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("peer count must be at least 1")]
    NoPeers,
    #[error("node id {node_id} is outside a network of {peers} nodes")]
    NodeOutOfRange { node_id: NodeId, peers: usize },
    #[error("permit count must be at least 1")]
    NoPermits,
}

/// Caller contract violations. These never touch shared protocol state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("an acquire is already waiting for its grant")]
    AcquirePending,
    #[error("this node already holds a permit")]
    AlreadyHolding,
    #[error("release called without a held permit")]
    NotHolding,
}

/// This node's own position in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Idle,
    /// ACQUIRE broadcast, grant not yet reached
    Waiting { request: ProtocolMessage },
    /// Own ACQUIRE popped from the stable prefix
    Holding { request: ProtocolMessage },
}

/// Inputs that drive the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineInput {
    /// Local intent to take a permit
    Acquire,
    /// Local intent to return the held permit
    Release,
    /// A message delivered by the transport
    Message(ProtocolMessage),
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub node_id: NodeId,
    pub clock: Timestamp,
    pub permits: u32,
    pub stable_bound: Timestamp,
    pub pending_acquires: usize,
    pub pending_releases: usize,
    pub local: LocalState,
    pub acquires_stabilized: u64,
    pub releases_stabilized: u64,
}

impl EngineStatus {
    pub fn is_holding(&self) -> bool {
        matches!(self.local, LocalState::Holding { .. })
    }
}

/// Per-node protocol state. Exclusively owned; all mutation goes through
/// [`CoordinationEngine::handle`] or its three entry points.
#[derive(Debug, Clone)]
pub struct CoordinationEngine {
    config: SemaphoreConfig,
    clock: LamportClock,
    acquires: PendingQueue,
    releases: PendingQueue,
    watermarks: Watermarks,
    permits: u32,
    local: LocalState,
    own_grants: u64,
    own_releases_seen: u64,
    acquires_stabilized: u64,
    releases_stabilized: u64,
}

impl CoordinationEngine {
    pub fn new(config: SemaphoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            clock: LamportClock::new(),
            acquires: PendingQueue::new(),
            releases: PendingQueue::new(),
            watermarks: Watermarks::new(config.peers),
            permits: config.permits,
            local: LocalState::Idle,
            own_grants: 0,
            own_releases_seen: 0,
            acquires_stabilized: 0,
            releases_stabilized: 0,
            config,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn config(&self) -> &SemaphoreConfig {
        &self.config
    }

    pub fn permits(&self) -> u32 {
        self.permits
    }

    pub fn local(&self) -> LocalState {
        self.local
    }

    /// True exactly while this node holds a granted permit
    pub fn is_granted(&self) -> bool {
        matches!(self.local, LocalState::Holding { .. })
    }

    pub fn stable_bound(&self) -> Timestamp {
        self.watermarks.stable_bound()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            node_id: self.config.node_id,
            clock: self.clock.now(),
            permits: self.permits,
            stable_bound: self.watermarks.stable_bound(),
            pending_acquires: self.acquires.len(),
            pending_releases: self.releases.len(),
            local: self.local,
            acquires_stabilized: self.acquires_stabilized,
            releases_stabilized: self.releases_stabilized,
        }
    }

    /// Dispatch one input
    pub fn handle(&mut self, input: EngineInput) -> Result<Vec<Effect>, UsageError> {
        match input {
            EngineInput::Acquire => self.request_acquire(),
            EngineInput::Release => self.request_release(),
            EngineInput::Message(message) => Ok(self.on_message(message)),
        }
    }

    /// Broadcast an ACQUIRE for this node. The grant arrives later as an
    /// [`Effect::Granted`] from [`Self::on_message`].
    pub fn request_acquire(&mut self) -> Result<Vec<Effect>, UsageError> {
        match self.local {
            LocalState::Waiting { .. } => Err(UsageError::AcquirePending),
            LocalState::Holding { .. } => Err(UsageError::AlreadyHolding),
            LocalState::Idle => {
                let request = ProtocolMessage::acquire(self.node_id(), self.clock.tick());
                self.local = LocalState::Waiting { request };
                Ok(vec![Effect::Broadcast(request)])
            }
        }
    }

    /// Clear the grant and broadcast a RELEASE
    pub fn request_release(&mut self) -> Result<Vec<Effect>, UsageError> {
        match self.local {
            LocalState::Holding { .. } => {
                self.local = LocalState::Idle;
                let release = ProtocolMessage::release(self.node_id(), self.clock.tick());
                Ok(vec![Effect::Broadcast(release)])
            }
            LocalState::Idle | LocalState::Waiting { .. } => Err(UsageError::NotHolding),
        }
    }

    /// Process one delivered message
    pub fn on_message(&mut self, message: ProtocolMessage) -> Vec<Effect> {
        let mut effects = Vec::new();

        if !message.sender.is_member_of(self.config.peers) {
            effects.push(violation(Violation::UnknownSender { message }));
            return effects;
        }

        self.clock.observe(message.timestamp);

        match message.kind {
            MessageKind::Acquire | MessageKind::Release => {
                self.enqueue(message, &mut effects);
            }
            MessageKind::Ack => {
                self.acknowledge(message, &mut effects);
            }
        }

        effects
    }

    /// Queue a request and acknowledge it. A request below the stable bound
    /// is refused: its place in the order has already been decided without
    /// it.
    fn enqueue(&mut self, message: ProtocolMessage, effects: &mut Vec<Effect>) {
        let queue = match message.kind {
            MessageKind::Release => &self.releases,
            _ => &self.acquires,
        };
        if queue.contains(&message) {
            effects.push(violation(Violation::DuplicateRequest { message }));
            return;
        }
        let stable_bound = self.watermarks.stable_bound();
        if message.timestamp < stable_bound {
            effects.push(violation(Violation::LateRequest {
                message,
                stable_bound,
            }));
            return;
        }

        if message.kind == MessageKind::Release && message.sender == self.node_id() {
            self.own_releases_seen += 1;
            if self.own_releases_seen > self.own_grants {
                effects.push(violation(Violation::ReleaseWithoutGrant { message }));
            }
        }
        let queue = match message.kind {
            MessageKind::Release => &mut self.releases,
            _ => &mut self.acquires,
        };
        queue.insert(message);
        effects.push(Effect::Emit(Event::RequestQueued { message }));

        let ack = ProtocolMessage::ack(self.node_id(), self.clock.tick());
        effects.push(Effect::Broadcast(ack));
    }

    fn acknowledge(&mut self, message: ProtocolMessage, effects: &mut Vec<Effect>) {
        match self.watermarks.record(message.sender, message.timestamp) {
            Advance::Advanced => {
                effects.push(Effect::Emit(Event::AckObserved {
                    from: message.sender,
                    timestamp: message.timestamp,
                    stable_bound: self.watermarks.stable_bound(),
                }));
                self.stabilize(effects);
            }
            Advance::Unchanged => {}
            Advance::Regressed { watermark } => {
                effects.push(violation(Violation::WatermarkRegression {
                    from: message.sender,
                    timestamp: message.timestamp,
                    watermark,
                }));
            }
            Advance::UnknownPeer => {
                effects.push(violation(Violation::UnknownSender { message }));
            }
        }
    }

    /// Drain the stable prefix: releases first, then acquires while permits
    /// remain. Both queues are drained strictly from the head.
    fn stabilize(&mut self, effects: &mut Vec<Effect>) {
        let bound = self.watermarks.stable_bound();

        while let Some(message) = self.releases.pop_stable(bound) {
            self.permits = self.permits.saturating_add(1);
            self.releases_stabilized += 1;
            effects.push(Effect::Emit(Event::ReleaseStabilized {
                message,
                permits: self.permits,
            }));
        }

        while self.permits > 0 {
            let Some(message) = self.acquires.pop_stable(bound) else {
                break;
            };
            self.permits -= 1;
            self.acquires_stabilized += 1;
            effects.push(Effect::Emit(Event::AcquireStabilized {
                message,
                permits: self.permits,
            }));

            if message.sender == self.node_id() {
                self.local = LocalState::Holding { request: message };
                self.own_grants += 1;
                effects.push(Effect::Granted { request: message });
            }
        }
    }
}

fn violation(violation: Violation) -> Effect {
    Effect::Emit(Event::InvariantViolation(violation))
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
