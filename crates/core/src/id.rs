// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one node in the semaphore network.
///
/// Ids are dense: a network of `n` nodes uses ids `0..n`, and the id doubles
/// as the index into per-peer tables (watermarks, peer address table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Position of this node in per-peer tables
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this id belongs to a network of `peers` nodes
    pub fn is_member_of(self, peers: usize) -> bool {
        self.index() < peers
    }

    /// All ids of a network of `peers` nodes, in ascending order
    pub fn all(peers: usize) -> impl Iterator<Item = NodeId> {
        (0..peers as u32).map(NodeId)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
