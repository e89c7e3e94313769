// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lamport logical clock

use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical timestamp
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lamport scalar clock.
///
/// Advances on every local send (`tick`) and on every received message
/// (`observe`). The value attached to the next send always exceeds every
/// timestamp this clock has observed.
#[derive(Debug, Clone, Default)]
pub struct LamportClock {
    time: Timestamp,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time, without advancing
    pub fn now(&self) -> Timestamp {
        self.time
    }

    /// Advance for a local event and return the new time
    pub fn tick(&mut self) -> Timestamp {
        self.time = Timestamp(self.time.0.saturating_add(1));
        self.time
    }

    /// Merge a received timestamp: `time = max(time, remote + 1)`, then tick
    pub fn observe(&mut self, remote: Timestamp) -> Timestamp {
        let floor = remote.0.saturating_add(1);
        if floor > self.time.0 {
            self.time = Timestamp(floor);
        }
        self.tick()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
