// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending request queue ordered by the global total order

use crate::clock::Timestamp;
use crate::message::ProtocolMessage;
use std::collections::BTreeSet;

/// Received requests of one kind, waiting to become causally stable.
///
/// Iteration and popping follow `(timestamp, sender)` order. A message is
/// popped at most once and only from the head.
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    messages: BTreeSet<ProtocolMessage>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message. Returns false if it was already queued.
    pub fn insert(&mut self, message: ProtocolMessage) -> bool {
        self.messages.insert(message)
    }

    pub fn contains(&self, message: &ProtocolMessage) -> bool {
        self.messages.contains(message)
    }

    /// Earliest queued message
    pub fn head(&self) -> Option<&ProtocolMessage> {
        self.messages.first()
    }

    /// Pop the head if its timestamp is strictly below `stable_bound`
    pub fn pop_stable(&mut self, stable_bound: Timestamp) -> Option<ProtocolMessage> {
        match self.messages.first() {
            Some(head) if head.timestamp < stable_bound => self.messages.pop_first(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtocolMessage> {
        self.messages.iter()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
