// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Caller-facing semaphore handle

use crate::error::SemaphoreError;
use crate::runtime::Command;
use dsem_core::{EngineStatus, NodeId};
use tokio::sync::{mpsc, oneshot, watch};

/// Handle onto a running node. Clones share the same node and the same
/// single permit slot: a node holds at most one permit at a time.
#[derive(Clone)]
pub struct Semaphore {
    node_id: NodeId,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<EngineStatus>,
}

impl Semaphore {
    pub(crate) fn new(
        node_id: NodeId,
        commands: mpsc::UnboundedSender<Command>,
        status: watch::Receiver<EngineStatus>,
    ) -> Self {
        Self {
            node_id,
            commands,
            status,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Broadcast an ACQUIRE and wait until this node is granted a permit.
    ///
    /// There is no timeout. Dropping the returned future does not withdraw
    /// the request; if the grant arrives later it is released at once.
    pub async fn acquire(&self) -> Result<(), SemaphoreError> {
        let (reply, granted) = oneshot::channel();
        self.send(Command::Acquire { reply })?;
        let request = granted.await.map_err(|_| SemaphoreError::Stopped)??;
        tracing::debug!(node = %self.node_id, %request, "acquired");
        Ok(())
    }

    /// Return the held permit
    pub async fn release(&self) -> Result<(), SemaphoreError> {
        let (reply, done) = oneshot::channel();
        self.send(Command::Release { reply })?;
        done.await.map_err(|_| SemaphoreError::Stopped)??;
        Ok(())
    }

    /// Dijkstra's name for [`Self::acquire`]
    pub async fn p(&self) -> Result<(), SemaphoreError> {
        self.acquire().await
    }

    /// Dijkstra's name for [`Self::release`]
    pub async fn v(&self) -> Result<(), SemaphoreError> {
        self.release().await
    }

    /// Latest engine snapshot
    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// Wait until the engine status satisfies `predicate`
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&EngineStatus) -> bool,
    ) -> Result<EngineStatus, SemaphoreError> {
        let mut status = self.status.clone();
        let snapshot = status
            .wait_for(predicate)
            .await
            .map_err(|_| SemaphoreError::Stopped)?;
        Ok(snapshot.clone())
    }

    /// Resolve once the runtime task has ended, for any reason
    pub async fn stopped(&self) {
        let mut status = self.status.clone();
        while status.changed().await.is_ok() {}
    }

    /// Ask the runtime to stop. Queued outbound messages are still flushed
    /// by the transport.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// False once the runtime task has ended
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    fn send(&self, command: Command) -> Result<(), SemaphoreError> {
        self.commands
            .send(command)
            .map_err(|_| SemaphoreError::Stopped)
    }
}
