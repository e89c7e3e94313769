// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Network I/O for the distributed semaphore: frame codec, full-mesh
//! broadcast fabric, retry policy

pub mod mesh;
pub mod protocol;
pub mod retry;
pub mod traced;

pub use mesh::{
    Delivery, DeliveryReceiver, DeliverySender, MeshConfig, MeshHandle, PeerTransport, TcpMesh,
    TransportError,
};
pub use protocol::{PeerFrame, ProtocolError, PROTOCOL_VERSION};
pub use retry::{Exhausted, RetryPolicy};
pub use traced::TracedTransport;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use mesh::{FakeNetwork, FakeTransport, LinkFilter};
