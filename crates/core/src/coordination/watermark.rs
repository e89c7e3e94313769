// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-peer acknowledgement watermarks

use crate::clock::Timestamp;
use crate::id::NodeId;

/// Outcome of recording an ACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The peer's watermark moved forward
    Advanced,
    /// The ACK was not above the current watermark (kept as is)
    Unchanged,
    /// The ACK was below the current watermark
    Regressed { watermark: Timestamp },
    /// The sender is not a member of this network
    UnknownPeer,
}

/// Highest ACK timestamp seen from each peer.
///
/// Watermarks never decrease. The minimum across all peers is the stable
/// bound: every queued message below it has been seen by every node.
#[derive(Debug, Clone)]
pub struct Watermarks {
    marks: Vec<Timestamp>,
}

impl Watermarks {
    pub fn new(peers: usize) -> Self {
        Self {
            marks: vec![Timestamp::ZERO; peers],
        }
    }

    pub fn get(&self, peer: NodeId) -> Option<Timestamp> {
        self.marks.get(peer.index()).copied()
    }

    pub fn record(&mut self, peer: NodeId, timestamp: Timestamp) -> Advance {
        let Some(mark) = self.marks.get_mut(peer.index()) else {
            return Advance::UnknownPeer;
        };
        if timestamp > *mark {
            *mark = timestamp;
            Advance::Advanced
        } else if timestamp < *mark {
            Advance::Regressed { watermark: *mark }
        } else {
            Advance::Unchanged
        }
    }

    /// `min(watermark[*])`
    pub fn stable_bound(&self) -> Timestamp {
        self.marks.iter().copied().min().unwrap_or(Timestamp::ZERO)
    }
}

#[cfg(test)]
#[path = "watermark_tests.rs"]
mod tests;
