// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the node runtime

use dsem_core::{ConfigError, UsageError, Violation};
use dsem_transport::TransportError;
use thiserror::Error;

/// Fatal errors that stop the runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("configured for {configured} nodes but the transport spans {transport}")]
    PeerCountMismatch { configured: usize, transport: usize },
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("node diverged from the network order: {0}")]
    Diverged(Violation),
}

/// Errors returned to semaphore callers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SemaphoreError {
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),
    #[error("node runtime has stopped")]
    Stopped,
}
