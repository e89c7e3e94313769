// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node lifecycle management: configuration, startup, shutdown.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use dsem_core::{ConfigError, NodeId, SemaphoreConfig};
use dsem_engine::{Runtime, RuntimeError, Semaphore};
use dsem_transport::{MeshConfig, MeshHandle, RetryPolicy, TcpMesh, TracedTransport, TransportError};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::rendezvous::{self, Registration, RendezvousError};

/// How long shutdown waits for queued outbound frames
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

fn default_permits() -> u32 {
    1
}

fn default_bootstrap_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Resolved node configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub node_id: NodeId,
    /// Address the peer listener binds
    pub listen: SocketAddr,
    /// Address announced to peers; defaults to the listen IP
    pub advertise: Option<IpAddr>,
    pub rendezvous: SocketAddr,
    pub peers: usize,
    pub permits: u32,
    pub bootstrap_timeout: Duration,
    pub retry: RetryPolicy,
}

/// Partially specified configuration, as read from a file or the command
/// line. Later layers override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSettings {
    pub node_id: Option<NodeId>,
    pub listen: Option<SocketAddr>,
    pub advertise: Option<IpAddr>,
    pub rendezvous: Option<SocketAddr>,
    pub peers: Option<usize>,
    pub permits: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    pub bootstrap_timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
}

impl NodeSettings {
    /// Read settings from a TOML file
    pub fn load(path: &Path) -> Result<Self, LifecycleError> {
        let text = std::fs::read_to_string(path).map_err(|source| LifecycleError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| LifecycleError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fields set in `top` win
    pub fn overlay(self, top: NodeSettings) -> Self {
        Self {
            node_id: top.node_id.or(self.node_id),
            listen: top.listen.or(self.listen),
            advertise: top.advertise.or(self.advertise),
            rendezvous: top.rendezvous.or(self.rendezvous),
            peers: top.peers.or(self.peers),
            permits: top.permits.or(self.permits),
            bootstrap_timeout: top.bootstrap_timeout.or(self.bootstrap_timeout),
            retry: top.retry.or(self.retry),
        }
    }

    /// Fill defaults and require the rest
    pub fn resolve(self) -> Result<NodeConfig, LifecycleError> {
        let config = NodeConfig {
            node_id: self.node_id.ok_or(LifecycleError::MissingSetting("node_id"))?,
            listen: self.listen.ok_or(LifecycleError::MissingSetting("listen"))?,
            advertise: self.advertise,
            rendezvous: self
                .rendezvous
                .ok_or(LifecycleError::MissingSetting("rendezvous"))?,
            peers: self.peers.ok_or(LifecycleError::MissingSetting("peers"))?,
            permits: self.permits.unwrap_or_else(default_permits),
            bootstrap_timeout: self
                .bootstrap_timeout
                .unwrap_or_else(default_bootstrap_timeout),
            retry: self.retry.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

impl NodeConfig {
    pub fn new(node_id: NodeId, listen: SocketAddr, rendezvous: SocketAddr, peers: usize) -> Self {
        Self {
            node_id,
            listen,
            advertise: None,
            rendezvous,
            peers,
            permits: default_permits(),
            bootstrap_timeout: default_bootstrap_timeout(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn semaphore_config(&self) -> SemaphoreConfig {
        SemaphoreConfig::new(self.node_id, self.peers).with_permits(self.permits)
    }

    /// Check everything that can be checked before touching the network
    pub fn validate(&self) -> Result<(), LifecycleError> {
        self.semaphore_config().validate()?;
        let announced = self.announced_ip();
        if announced.is_unspecified() {
            return Err(LifecycleError::Unroutable {
                listen: self.listen,
            });
        }
        Ok(())
    }

    /// IP peers should dial
    pub fn announced_ip(&self) -> IpAddr {
        self.advertise.unwrap_or(self.listen.ip())
    }
}

/// Errors during node startup and shutdown
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to read config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("missing setting: {0}")]
    MissingSetting(&'static str),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("listening on {listen} needs an advertise address peers can reach")]
    Unroutable { listen: SocketAddr },

    #[error("failed to bind peer listener at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("bootstrap failed: {0}")]
    Rendezvous(#[from] RendezvousError),

    #[error("mesh formation failed: {0}")]
    Mesh(#[from] TransportError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("runtime task ended abnormally: {0}")]
    RuntimeTask(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bootstrapped node: mesh formed, runtime running
pub struct Node {
    semaphore: Semaphore,
    runtime: JoinHandle<Result<(), RuntimeError>>,
    mesh: MeshHandle,
    local_addr: SocketAddr,
}

/// Bind, register with the rendezvous, form the mesh and start the runtime
pub async fn startup(config: &NodeConfig) -> Result<Node, LifecycleError> {
    config.validate()?;

    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|source| LifecycleError::Bind {
            addr: config.listen,
            source,
        })?;
    let local_addr = listener.local_addr()?;
    info!(node = %config.node_id, %local_addr, "peer listener bound");

    let registration = Registration {
        node_id: config.node_id,
        address: config.announced_ip().to_string(),
        port: local_addr.port(),
    };
    let table = rendezvous::register(
        config.rendezvous,
        registration,
        config.peers,
        &config.retry,
        config.bootstrap_timeout,
    )
    .await?;
    let peers = table.socket_addrs()?;
    if peers.get(config.node_id.index()).map(|a| a.port()) != Some(local_addr.port()) {
        warn!(node = %config.node_id, "peer table does not list this node's port");
    }

    let mesh_config = MeshConfig::new(config.node_id, peers)
        .with_retry(config.retry)
        .with_formation_timeout(config.bootstrap_timeout);
    let (mesh, mesh_handle, deliveries) = TcpMesh::establish(mesh_config, listener).await?;

    let runtime = match Runtime::new(config.semaphore_config(), TracedTransport::new(mesh)) {
        Ok(runtime) => runtime,
        Err(e) => {
            mesh_handle.abort();
            return Err(e.into());
        }
    };
    let (semaphore, runtime) = runtime.spawn(deliveries);
    info!(
        node = %config.node_id,
        peers = config.peers,
        permits = config.permits,
        "node started"
    );

    Ok(Node {
        semaphore,
        runtime,
        mesh: mesh_handle,
        local_addr,
    })
}

impl Node {
    pub fn semaphore(&self) -> &Semaphore {
        &self.semaphore
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the runtime and flush the mesh
    pub async fn shutdown(self) -> Result<(), LifecycleError> {
        info!(node = %self.semaphore.node_id(), "shutting down");
        self.semaphore.shutdown();
        self.join().await
    }

    /// Wait for the runtime to stop on its own, then flush the mesh
    pub async fn join(self) -> Result<(), LifecycleError> {
        let Node { runtime, mesh, .. } = self;
        let result = match runtime.await {
            Ok(result) => result.map_err(LifecycleError::from),
            Err(e) => Err(LifecycleError::RuntimeTask(e.to_string())),
        };
        mesh.close(FLUSH_TIMEOUT).await;
        result
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
