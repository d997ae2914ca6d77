// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `lr-agent` — the worker process command.
//!
//! Batch mode additionally manages a pid file: on restart it kills the
//! previous instance recorded there, so a resubmitted batch job never
//! leaves an orphaned agent competing for the same supervisor link.

use anyhow::Context;
use clap::Parser;
use lr_core::AgentId;
use lr_agent::AgentConfig;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lr-agent", about = "longrun worker agent", version)]
struct Cli {
    /// Agent id assigned by the supervisor's driver
    #[arg(long)]
    agent_id: String,

    /// Supervisor WebSocket URL to dial back to
    #[arg(long)]
    supervisor: String,

    /// Batch mode: record this instance's pid and kill a previous one
    #[arg(long)]
    batch: bool,

    /// Pid file for batch mode
    #[arg(long, requires = "batch")]
    pid_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LR_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let pid_file = if cli.batch {
        let path = cli
            .pid_file
            .unwrap_or_else(|| PathBuf::from("lr-agent.pid"));
        replace_previous_instance(&path)?;
        Some(path)
    } else {
        None
    };

    let cfg = AgentConfig::new(AgentId::from_string(cli.agent_id), cli.supervisor);
    info!(agent_id = %cfg.agent_id, "agent starting");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let result = lr_agent::run(cfg, shutdown).await;

    if let Some(path) = pid_file {
        let _ = std::fs::remove_file(path);
    }
    result.map_err(Into::into)
}

/// Kill the pid a previous batch instance recorded, then record our own.
fn replace_previous_instance(path: &PathBuf) -> anyhow::Result<()> {
    if let Ok(contents) = std::fs::read_to_string(path) {
        if let Ok(old_pid) = contents.trim().parse::<i32>() {
            warn!(old_pid, "killing previous batch agent instance");
            if let Err(e) = kill(Pid::from_raw(old_pid), Signal::SIGKILL) {
                // Stale pid file; nothing was running
                info!(old_pid, error = %e, "previous instance already gone");
            }
        }
    }
    std::fs::write(path, std::process::id().to_string())
        .with_context(|| format!("writing pid file {}", path.display()))?;
    Ok(())
}
