// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Node bootstrap and lifecycle for the distributed semaphore
//!
//! - [`rendezvous`]: the one-shot service that collects every node's address
//!   and hands back the full table
//! - [`lifecycle`]: node configuration, startup into a running mesh, shutdown

pub mod lifecycle;
pub mod rendezvous;

pub use lifecycle::{startup, LifecycleError, Node, NodeConfig, NodeSettings};
pub use rendezvous::{
    register, PeerTable, Registration, RendezvousError, RendezvousReply, RendezvousService,
};
