// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `lrd` — the longrun supervisor daemon.

use anyhow::Context;
use clap::Parser;
use lr_core::SystemClock;
use lr_supervisor::{
    build_supervisor, AgentLinks, DockerDriver, DriverSet, LocalDriver, NullAuth, PurgeSweep,
    RecordStore, SbatchDriver, SupervisorConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lrd", about = "longrun simulation job supervisor", version)]
struct Cli {
    /// Address the agent WebSocket listener binds
    #[arg(long, default_value = "127.0.0.1:8102")]
    listen: String,

    /// Directory for durable state (records, logs)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Root of per-user run directories
    #[arg(long)]
    run_dir_root: Option<PathBuf>,

    /// Agent program drivers launch locally
    #[arg(long)]
    agent_command: Option<String>,

    /// Run compute agents in docker containers instead of local processes
    #[arg(long)]
    docker: bool,

    /// Remote cluster host for the sbatch driver
    #[arg(long)]
    sbatch_host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = SupervisorConfig::default();
    cfg.listen_addr = cli.listen.clone();
    cfg.supervisor_url = format!("ws://{}", cli.listen);
    if let Some(dir) = cli.state_dir {
        cfg.state_dir = dir;
    }
    if let Some(dir) = cli.run_dir_root {
        cfg.run_dir_root = dir;
    }
    if let Some(command) = cli.agent_command {
        cfg.agent_command = command;
    }
    if cli.sbatch_host.is_some() {
        cfg.sbatch_host = cli.sbatch_host;
    }
    let cfg = Arc::new(cfg);

    std::fs::create_dir_all(&cfg.state_dir)
        .with_context(|| format!("creating state dir {}", cfg.state_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(cfg.state_dir.join("logs"), "lrd.log");
    let (writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LR_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();

    let links = AgentLinks::new();
    let compute: Arc<dyn lr_supervisor::Driver> = if cli.docker {
        Arc::new(DockerDriver::new(Arc::clone(&cfg), links.clone()))
    } else {
        Arc::new(LocalDriver::new(Arc::clone(&cfg), links.clone()))
    };
    let sbatch: Option<Arc<dyn lr_supervisor::Driver>> = cfg.sbatch_host.clone().map(|host| {
        Arc::new(SbatchDriver::new(Arc::clone(&cfg), links.clone(), host))
            as Arc<dyn lr_supervisor::Driver>
    });
    let drivers = DriverSet::new(compute, sbatch);

    let store = RecordStore::new(cfg.records_dir())?;
    let supervisor = build_supervisor(
        Arc::clone(&cfg),
        store.clone(),
        drivers,
        links.clone(),
        SystemClock,
        Arc::new(NullAuth),
    );

    let shutdown = CancellationToken::new();
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    tokio::spawn(lr_supervisor::run_listener(
        listener,
        links,
        shutdown.clone(),
    ));

    let purge = Arc::new(PurgeSweep::new(Arc::clone(&cfg), store, SystemClock));
    tokio::spawn(purge.run_forever(shutdown.clone()));
    tokio::spawn(
        Arc::clone(supervisor.registry()).run_eviction(shutdown.clone()),
    );

    info!(listen = %cfg.listen_addr, state_dir = %cfg.state_dir.display(), "supervisor ready");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();
    Ok(())
}
