// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent's connection loop.
//!
//! Connect to the supervisor, announce liveness, then serve op messages
//! until shutdown. A dropped connection is retried with fixed backoff up
//! to a bounded attempt count — the supervisor has already failed the ops
//! addressed to the old link, so reconnecting only restores availability.

use crate::process::OpRunner;
use futures_util::{SinkExt, StreamExt};
use lr_core::AgentId;
use lr_wire::{AgentToSupervisor, SupervisorToAgent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] lr_wire::ProtocolError),
    #[error("supervisor closed the connection")]
    ConnectionClosed,
    #[error("gave up reconnecting after {0} attempts")]
    ReconnectExhausted(u32),
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: AgentId,
    pub supervisor_url: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub term_grace: Duration,
    pub fast_call_timeout: Duration,
}

impl AgentConfig {
    pub fn new(agent_id: AgentId, supervisor_url: impl Into<String>) -> Self {
        Self {
            agent_id,
            supervisor_url: supervisor_url.into(),
            reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(2),
            term_grace: Duration::from_secs(2),
            fast_call_timeout: Duration::from_secs(60),
        }
    }
}

/// Run the agent until shutdown or reconnect exhaustion.
pub async fn run(cfg: AgentConfig, shutdown: CancellationToken) -> Result<(), AgentError> {
    let runner = OpRunner::new(cfg.term_grace, cfg.fast_call_timeout);
    let mut attempts = 0;
    loop {
        match serve(&cfg, &runner, &shutdown).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                attempts += 1;
                if attempts > cfg.reconnect_attempts {
                    return Err(AgentError::ReconnectExhausted(cfg.reconnect_attempts));
                }
                warn!(
                    agent_id = %cfg.agent_id,
                    error = %e,
                    attempts,
                    "connection lost, retrying"
                );
                tokio::time::sleep(cfg.reconnect_delay).await;
            }
        }
    }
}

/// One connection: announce, then pump frames until it ends.
async fn serve(
    cfg: &AgentConfig,
    runner: &Arc<OpRunner>,
    shutdown: &CancellationToken,
) -> Result<(), AgentError> {
    let (ws, _) = tokio_tungstenite::connect_async(cfg.supervisor_url.as_str()).await?;
    let (mut sink, mut read) = ws.split();
    info!(agent_id = %cfg.agent_id, url = %cfg.supervisor_url, "connected to supervisor");

    // Handlers stream replies through this channel; the loop owns the sink
    let (tx, mut rx) = mpsc::channel::<AgentToSupervisor>(64);

    let hello = lr_wire::encode(&AgentToSupervisor::Alive {
        agent_id: cfg.agent_id.clone(),
    })?;
    sink.send(Message::text(hello)).await?;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(frame) = outbound else {
                    return Err(AgentError::ConnectionClosed);
                };
                let text = lr_wire::encode(&frame)?;
                sink.send(Message::text(text)).await?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match lr_wire::decode::<SupervisorToAgent>(&text) {
                            Ok(msg) => dispatch(msg, runner, &tx),
                            Err(e) => {
                                warn!(agent_id = %cfg.agent_id, error = %e, "malformed op message ignored");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(AgentError::ConnectionClosed);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(_)) => {} // Ping/Pong/Binary — ignore
                }
            }
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                info!(agent_id = %cfg.agent_id, "agent shutting down");
                return Ok(());
            }
        }
    }
}

/// Route one op message to its handler. Handlers run as tasks so the
/// connection loop never blocks behind a long command.
fn dispatch(msg: SupervisorToAgent, runner: &Arc<OpRunner>, tx: &mpsc::Sender<AgentToSupervisor>) {
    match msg {
        SupervisorToAgent::Run {
            op_id,
            run_dir,
            command,
        } => {
            let runner = Arc::clone(runner);
            let tx = tx.clone();
            tokio::spawn(runner.run_job(op_id, run_dir, command, tx));
        }
        SupervisorToAgent::Analysis {
            op_id,
            run_dir,
            command,
            fastpath,
            request,
        } => {
            let runner = Arc::clone(runner);
            let tx = tx.clone();
            tokio::spawn(runner.run_analysis(op_id, run_dir, command, fastpath, request, tx));
        }
        SupervisorToAgent::Cancel { op_id, targets } => {
            runner.cancel(&targets);
            let tx = tx.clone();
            tokio::spawn(async move {
                let frame = AgentToSupervisor::Reply {
                    op_id,
                    reply: lr_wire::OpReply::Canceled,
                };
                let _ = tx.send(frame).await;
            });
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
