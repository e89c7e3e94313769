// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dsem rendezvous`: serve one bootstrap round, then exit

use anyhow::{Context, Result};
use dsem_daemon::RendezvousService;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

#[derive(clap::Args)]
pub struct RendezvousArgs {
    /// Address to listen on (port 0 picks a free port)
    #[arg(long)]
    listen: SocketAddr,

    /// Number of nodes in the network
    #[arg(long)]
    peers: usize,

    /// How long a connected node may take to register
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    registration_timeout: Duration,

    /// How long to wait for every node before abandoning the round
    #[arg(long, value_parser = humantime::parse_duration, default_value = "60s")]
    round_timeout: Duration,
}

pub async fn handle(args: RendezvousArgs) -> Result<()> {
    let service = RendezvousService::bind(args.listen, args.peers)
        .await?
        .with_registration_timeout(args.registration_timeout)
        .with_round_timeout(args.round_timeout);
    let addr = service.local_addr()?;

    info!(%addr, peers = args.peers, "rendezvous listening");
    // Signal ready for the parent process, with the bound address
    println!("READY {addr}");

    let table = service.serve().await.context("rendezvous failed")?;
    info!(peers = table.len(), "bootstrap complete");
    Ok(())
}
