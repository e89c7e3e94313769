// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime task that owns one node's coordination engine

use crate::error::RuntimeError;
use crate::semaphore::Semaphore;
use dsem_core::{
    CoordinationEngine, Effect, EngineStatus, Event, ProtocolMessage, SemaphoreConfig, UsageError,
};
use dsem_transport::{Delivery, DeliveryReceiver, PeerTransport};
use std::collections::VecDeque;
use std::ops::ControlFlow;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Requests from [`Semaphore`] handles
pub(crate) enum Command {
    Acquire {
        reply: oneshot::Sender<Result<ProtocolMessage, UsageError>>,
    },
    Release {
        reply: oneshot::Sender<Result<(), UsageError>>,
    },
    Shutdown,
}

/// Single owner of a node's protocol state.
///
/// Local commands and network deliveries are processed one at a time, so
/// every engine transition and the effects it produces run to completion
/// before the next input is looked at.
pub struct Runtime<T> {
    engine: CoordinationEngine,
    transport: T,
    observer: Option<mpsc::UnboundedSender<Event>>,
    waiter: Option<oneshot::Sender<Result<ProtocolMessage, UsageError>>>,
}

impl<T: PeerTransport> Runtime<T> {
    /// Create a runtime; `transport` must span exactly `config.peers` nodes
    pub fn new(config: SemaphoreConfig, transport: T) -> Result<Self, RuntimeError> {
        if transport.peer_count() != config.peers {
            return Err(RuntimeError::PeerCountMismatch {
                configured: config.peers,
                transport: transport.peer_count(),
            });
        }
        let engine = CoordinationEngine::new(config)?;
        Ok(Self {
            engine,
            transport,
            observer: None,
            waiter: None,
        })
    }

    /// Forward every protocol event to `observer`
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<Event>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Start the runtime task.
    ///
    /// The task keeps acknowledging peers after every [`Semaphore`] handle is
    /// dropped; it stops on [`Semaphore::shutdown`], on a fatal transport
    /// fault, or when `deliveries` closes.
    pub fn spawn(
        self,
        deliveries: DeliveryReceiver,
    ) -> (Semaphore, JoinHandle<Result<(), RuntimeError>>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(self.engine.status());
        let semaphore = Semaphore::new(self.engine.node_id(), commands_tx, status_rx);
        let handle = tokio::spawn(self.run(commands_rx, deliveries, status_tx));
        (semaphore, handle)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut deliveries: DeliveryReceiver,
        status: watch::Sender<EngineStatus>,
    ) -> Result<(), RuntimeError> {
        let config = self.engine.config().clone();
        tracing::info!(
            node = %config.node_id,
            peers = config.peers,
            permits = config.permits,
            "runtime started"
        );

        let mut commands_open = true;
        let result = loop {
            let step = tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        commands_open = false;
                        Ok(ControlFlow::Continue(()))
                    }
                },
                delivery = deliveries.recv() => match delivery {
                    Some(delivery) => self.on_delivery(delivery).await,
                    None => {
                        tracing::info!(node = %config.node_id, "delivery channel closed");
                        Ok(ControlFlow::Break(()))
                    }
                },
            };
            status.send_replace(self.engine.status());
            match step {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        match &result {
            Ok(()) => tracing::info!(node = %config.node_id, "runtime stopped"),
            Err(e) => tracing::error!(node = %config.node_id, error = %e, "runtime failed"),
        }
        result
    }

    async fn on_command(&mut self, command: Command) -> Result<ControlFlow<()>, RuntimeError> {
        match command {
            Command::Acquire { reply } => match self.engine.request_acquire() {
                Ok(effects) => {
                    self.waiter = Some(reply);
                    self.execute(effects).await?;
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Release { reply } => match self.engine.request_release() {
                Ok(effects) => {
                    self.execute(effects).await?;
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Shutdown => {
                tracing::info!(node = %self.engine.node_id(), "shutdown requested");
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn on_delivery(&mut self, delivery: Delivery) -> Result<ControlFlow<()>, RuntimeError> {
        let node = self.engine.node_id();
        match delivery {
            Delivery::Message { from, message } => {
                tracing::trace!(%node, %from, %message, "delivered");
                let effects = self.engine.on_message(message);
                self.execute(effects).await?;
            }
            Delivery::PeerDeparted { peer } => {
                tracing::info!(%node, %peer, "peer departed");
            }
            Delivery::LinkLost { peer, reason } => {
                tracing::warn!(%node, %peer, %reason, "inbound link lost");
            }
            Delivery::Fault(e) => return Err(e.into()),
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Perform effects in order
    async fn execute(&mut self, effects: Vec<Effect>) -> Result<(), RuntimeError> {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Broadcast(message) => self.transport.broadcast(message).await?,
                Effect::Granted { request } => queue.extend(self.grant(request)),
                Effect::Emit(event) => self.emit(event)?,
            }
        }
        Ok(())
    }

    /// Hand the grant to the waiting caller. A grant nobody waits for any
    /// more is released straight away so the permit is not lost.
    fn grant(&mut self, request: ProtocolMessage) -> Vec<Effect> {
        let node = self.engine.node_id();
        tracing::info!(%node, ts = %request.timestamp, "permit granted");

        let delivered = match self.waiter.take() {
            Some(waiter) => waiter.send(Ok(request)).is_ok(),
            None => false,
        };
        if delivered {
            return Vec::new();
        }

        tracing::warn!(%node, "grant has no waiting caller, releasing");
        match self.engine.request_release() {
            Ok(effects) => effects,
            Err(e) => {
                tracing::error!(%node, error = %e, "could not release abandoned grant");
                Vec::new()
            }
        }
    }

    /// Log and forward an event. A fatal violation stops the runtime once
    /// observers have seen it.
    fn emit(&mut self, event: Event) -> Result<(), RuntimeError> {
        let node = self.engine.node_id();
        match &event {
            Event::RequestQueued { message } => {
                tracing::debug!(%node, %message, "request queued");
            }
            Event::AckObserved {
                from,
                timestamp,
                stable_bound,
            } => {
                tracing::debug!(%node, %from, %timestamp, %stable_bound, "ack observed");
            }
            Event::ReleaseStabilized { message, permits } => {
                tracing::info!(%node, %message, permits, "release stabilized");
            }
            Event::AcquireStabilized { message, permits } => {
                tracing::info!(%node, %message, permits, "acquire stabilized");
            }
            Event::InvariantViolation(violation) if violation.is_fatal() => {
                tracing::error!(%node, %violation, "protocol order broken");
            }
            Event::InvariantViolation(violation) => {
                tracing::warn!(%node, %violation, "protocol invariant violated");
            }
        }

        let fatal = match &event {
            Event::InvariantViolation(violation) if violation.is_fatal() => {
                Some(violation.clone())
            }
            _ => None,
        };
        if let Some(observer) = &self.observer {
            if observer.send(event).is_err() {
                self.observer = None;
            }
        }
        match fatal {
            Some(violation) => Err(RuntimeError::Diverged(violation)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
