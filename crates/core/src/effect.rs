// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Effects and events produced by the coordination state machine

use crate::clock::Timestamp;
use crate::id::NodeId;
use crate::message::ProtocolMessage;
use std::fmt;

/// Effects are side effects the state machine asks its runtime to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a message to every node, this one included
    Broadcast(ProtocolMessage),
    /// This node's own request reached the stable prefix with a permit free
    Granted { request: ProtocolMessage },
    /// Emit an event for observers and logs
    Emit(Event),
}

/// Events emitted by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// An ACQUIRE or RELEASE was inserted into its pending queue
    RequestQueued { message: ProtocolMessage },
    /// An ACK advanced a peer's watermark
    AckObserved {
        from: NodeId,
        timestamp: Timestamp,
        stable_bound: Timestamp,
    },
    /// A stable RELEASE was popped, returning a permit
    ReleaseStabilized {
        message: ProtocolMessage,
        permits: u32,
    },
    /// A stable ACQUIRE was popped, consuming a permit
    AcquireStabilized {
        message: ProtocolMessage,
        permits: u32,
    },
    /// Something a correct network never produces; processing continues
    InvariantViolation(Violation),
}

impl Event {
    /// The stabilized message, for pop-order bookkeeping
    pub fn stabilized(&self) -> Option<&ProtocolMessage> {
        match self {
            Event::ReleaseStabilized { message, .. } | Event::AcquireStabilized { message, .. } => {
                Some(message)
            }
            _ => None,
        }
    }
}

/// Protocol anomalies. Only [`Violation::LateRequest`] is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Message from an id outside the network
    UnknownSender { message: ProtocolMessage },
    /// The same request was delivered twice
    DuplicateRequest { message: ProtocolMessage },
    /// An ACK carried a lower timestamp than one already seen from that peer
    WatermarkRegression {
        from: NodeId,
        timestamp: Timestamp,
        watermark: Timestamp,
    },
    /// A RELEASE from this node arrived with no local grant to match it
    ReleaseWithoutGrant { message: ProtocolMessage },
    /// A request arrived below the stable bound, where the order is already
    /// fixed. A FIFO link never produces this; it means a frame was lost or
    /// reordered and this node can no longer agree with the others.
    LateRequest {
        message: ProtocolMessage,
        stable_bound: Timestamp,
    },
}

impl Violation {
    /// Whether the node must stop instead of continuing
    pub fn is_fatal(&self) -> bool {
        matches!(self, Violation::LateRequest { .. })
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::UnknownSender { message } => {
                write!(f, "message from unknown sender: {message}")
            }
            Violation::DuplicateRequest { message } => {
                write!(f, "duplicate request delivered: {message}")
            }
            Violation::WatermarkRegression {
                from,
                timestamp,
                watermark,
            } => write!(
                f,
                "ack from {from} at {timestamp} is below its watermark {watermark}"
            ),
            Violation::ReleaseWithoutGrant { message } => {
                write!(f, "release with no matching local grant: {message}")
            }
            Violation::LateRequest {
                message,
                stable_bound,
            } => write!(
                f,
                "{message} arrived below the stable bound {stable_bound}"
            ),
        }
    }
}

#[cfg(test)]
#[path = "effect_tests.rs"]
mod tests;
