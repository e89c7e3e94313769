// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol messages exchanged between semaphore nodes

use crate::clock::Timestamp;
use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Kind of a protocol message. Encoded on the wire as its integer tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageKind {
    /// Request for a permit (P operation)
    Acquire = 0,
    /// Return of a permit (V operation)
    Release = 1,
    /// Acknowledgement carrying the sender's clock
    Ack = 2,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown message kind tag: {0}")]
pub struct UnknownKind(pub u8);

impl TryFrom<u8> for MessageKind {
    type Error = UnknownKind;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(MessageKind::Acquire),
            1 => Ok(MessageKind::Release),
            2 => Ok(MessageKind::Ack),
            other => Err(UnknownKind(other)),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind as u8
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Acquire => "ACQUIRE",
            MessageKind::Release => "RELEASE",
            MessageKind::Ack => "ACK",
        };
        f.write_str(name)
    }
}

/// An immutable protocol message.
///
/// Messages are totally ordered by `(timestamp, sender)`; the kind only
/// separates messages that can never share that pair in a correct run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub sender: NodeId,
    pub kind: MessageKind,
    pub timestamp: Timestamp,
}

impl ProtocolMessage {
    pub fn new(sender: NodeId, kind: MessageKind, timestamp: Timestamp) -> Self {
        Self {
            sender,
            kind,
            timestamp,
        }
    }

    pub fn acquire(sender: NodeId, timestamp: Timestamp) -> Self {
        Self::new(sender, MessageKind::Acquire, timestamp)
    }

    pub fn release(sender: NodeId, timestamp: Timestamp) -> Self {
        Self::new(sender, MessageKind::Release, timestamp)
    }

    pub fn ack(sender: NodeId, timestamp: Timestamp) -> Self {
        Self::new(sender, MessageKind::Ack, timestamp)
    }

    /// Key of the global total order
    pub fn order_key(&self) -> (Timestamp, NodeId) {
        (self.timestamp, self.sender)
    }
}

impl Ord for ProtocolMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key()
            .cmp(&other.order_key())
            .then(self.kind.cmp(&other.kind))
    }
}

impl PartialOrd for ProtocolMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ProtocolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} from {}", self.kind, self.timestamp, self.sender)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
