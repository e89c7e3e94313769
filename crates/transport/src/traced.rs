// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced transport wrapper for consistent observability

use crate::mesh::{PeerTransport, TransportError};
use async_trait::async_trait;
use dsem_core::{NodeId, ProtocolMessage};
use tracing::Instrument;

/// Wrapper that adds tracing to any PeerTransport
#[derive(Clone)]
pub struct TracedTransport<T> {
    inner: T,
}

impl<T> TracedTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: PeerTransport> PeerTransport for TracedTransport<T> {
    fn local_id(&self) -> NodeId {
        self.inner.local_id()
    }

    fn peer_count(&self) -> usize {
        self.inner.peer_count()
    }

    async fn broadcast(&self, message: ProtocolMessage) -> Result<(), TransportError> {
        let span = tracing::info_span!(
            "transport.broadcast",
            node = %self.inner.local_id(),
            kind = ?message.kind,
            ts = %message.timestamp,
        );
        async {
            let start = std::time::Instant::now();
            let result = self.inner.broadcast(message).await;
            let elapsed_us = start.elapsed().as_micros() as u64;
            match &result {
                Ok(()) => tracing::debug!(elapsed_us, "queued"),
                Err(e) => tracing::error!(elapsed_us, error = %e, "broadcast failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
