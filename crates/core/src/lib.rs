// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dsem-core: protocol core for the distributed semaphore
//!
//! This crate provides:
//! - Lamport logical clock and node identifiers
//! - The three wire message kinds and their total order
//! - The per-node coordination state machine (no I/O, effect-based)

pub mod clock;
pub mod coordination;
pub mod effect;
pub mod id;
pub mod message;

pub use clock::{LamportClock, Timestamp};
pub use coordination::{
    CoordinationEngine, ConfigError, EngineInput, EngineStatus, LocalState, PendingQueue,
    SemaphoreConfig, UsageError, Watermarks,
};
pub use effect::{Effect, Event, Violation};
pub use id::NodeId;
pub use message::{MessageKind, ProtocolMessage, UnknownKind};
