// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dsem - distributed counting semaphore node and rendezvous

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod commands;
mod logging;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{node, rendezvous};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "dsem",
    version,
    about = "Distributed semaphore over Lamport clocks and a TCP full mesh"
)]
struct Cli {
    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the one-shot bootstrap service
    Rendezvous(rendezvous::RendezvousArgs),
    /// Run a semaphore node
    Node(node::NodeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Held for the life of main so buffered log lines reach the file
    let _log_guard = logging::init(cli.log_file.as_deref())?;

    match cli.command {
        Commands::Rendezvous(args) => rendezvous::handle(args).await,
        Commands::Node(args) => node::handle(args).await,
    }
}
