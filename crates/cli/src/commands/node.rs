// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dsem node`: join the network and run a critical-section workload

use anyhow::{Context, Result};
use dsem_core::NodeId;
use dsem_daemon::{startup, NodeSettings};
use dsem_engine::Semaphore;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[derive(clap::Args)]
pub struct NodeArgs {
    /// TOML settings file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// This node's id, in 0..peers
    #[arg(long)]
    id: Option<u32>,

    /// Peer listener address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// IP announced to peers when listening on a wildcard address
    #[arg(long)]
    advertise: Option<IpAddr>,

    /// Rendezvous service address
    #[arg(long)]
    rendezvous: Option<SocketAddr>,

    /// Number of nodes in the network
    #[arg(long)]
    peers: Option<usize>,

    /// Semaphore capacity
    #[arg(long)]
    permits: Option<u32>,

    /// Deadline for rendezvous and mesh formation
    #[arg(long, value_parser = humantime::parse_duration)]
    bootstrap_timeout: Option<Duration>,

    /// Critical sections to run before exiting. Without it the node only
    /// serves peers until interrupted.
    #[arg(long)]
    rounds: Option<u64>,

    /// Time spent inside each critical section
    #[arg(long, value_parser = humantime::parse_duration, default_value = "0ms")]
    hold: Duration,
}

impl NodeArgs {
    fn settings(&self) -> NodeSettings {
        NodeSettings {
            node_id: self.id.map(NodeId::new),
            listen: self.listen,
            advertise: self.advertise,
            rendezvous: self.rendezvous,
            peers: self.peers,
            permits: self.permits,
            bootstrap_timeout: self.bootstrap_timeout,
            retry: None,
        }
    }
}

/// Why the node is stopping
enum Exit {
    /// Workload finished or a signal arrived; ask the runtime to stop
    Requested,
    /// The runtime stopped by itself
    RuntimeEnded,
}

pub async fn handle(args: NodeArgs) -> Result<()> {
    let base = match &args.config {
        Some(path) => NodeSettings::load(path)?,
        None => NodeSettings::default(),
    };
    let config = base.overlay(args.settings()).resolve()?;

    let node = startup(&config).await.context("node failed to start")?;
    println!("READY {}", node.local_addr());

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let exit = {
        let semaphore = node.semaphore();
        let workload = async {
            let Some(rounds) = args.rounds else {
                return std::future::pending().await;
            };
            let total = rounds * config.peers as u64;
            run_rounds(semaphore, rounds, args.hold).await?;
            // Peers still need our ACKs until every round in the network is done
            semaphore
                .wait_until(|status| status.releases_stabilized >= total)
                .await?;
            anyhow::Ok(())
        };

        tokio::select! {
            result = workload => {
                if let Err(e) = &result {
                    error!(node = %config.node_id, error = %e, "workload failed");
                }
                match result {
                    Ok(()) => Exit::Requested,
                    Err(_) => Exit::RuntimeEnded,
                }
            }
            _ = semaphore.stopped() => Exit::RuntimeEnded,
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                Exit::Requested
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                Exit::Requested
            }
        }
    };

    match exit {
        Exit::Requested => node.shutdown().await?,
        Exit::RuntimeEnded => node.join().await?,
    }
    info!(node = %config.node_id, "node exited");
    Ok(())
}

async fn run_rounds(semaphore: &Semaphore, rounds: u64, hold: Duration) -> Result<()> {
    for round in 1..=rounds {
        semaphore.acquire().await?;
        let enter = now_us();
        if !hold.is_zero() {
            tokio::time::sleep(hold).await;
        }
        let exit = now_us();
        println!(
            "node={} round={round} enter_us={enter} exit_us={exit}",
            semaphore.node_id()
        );
        semaphore.release().await?;
    }
    Ok(())
}

/// Wall-clock microseconds, comparable across processes on one host
fn now_us() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros()
}
