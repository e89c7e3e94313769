// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination state for the distributed semaphore
//!
//! This module provides:
//! - **PendingQueue** - Received requests ordered by `(timestamp, sender)`
//! - **Watermarks** - Highest ACK timestamp per peer and the stable bound
//! - **CoordinationEngine** - The per-node state machine that turns inbound
//!   messages and local intents into broadcasts and grant decisions

pub mod engine;
pub mod queue;
pub mod watermark;

pub use engine::{
    ConfigError, CoordinationEngine, EngineInput, EngineStatus, LocalState, SemaphoreConfig,
    UsageError,
};
pub use queue::PendingQueue;
pub use watermark::Watermarks;
