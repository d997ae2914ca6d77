// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent connections and reply routing.
//!
//! Agents dial the supervisor's TCP WebSocket listener and must announce
//! `alive` (with the agent id the driver assigned them) as their first
//! frame. After that the connection task pumps outbound op messages from a
//! channel and routes inbound reply frames to the channel of the op they
//! name. A dropped connection fails every op still addressed to that agent
//! with "agent lost" — nothing waits forever on a dead link.

use futures_util::{SinkExt, StreamExt};
use lr_core::{AgentId, OpId};
use lr_wire::{AgentToSupervisor, OpReply, SupervisorToAgent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("agent {0} is not connected")]
    NotConnected(AgentId),
    #[error("agent {0} send failed: connection closing")]
    SendFailed(AgentId),
    #[error("agent {0} did not announce within {1:?}")]
    AnnounceTimeout(AgentId, Duration),
}

struct AgentLink {
    tx: mpsc::Sender<SupervisorToAgent>,
}

struct PendingOp {
    agent: AgentId,
    tx: mpsc::Sender<OpReply>,
}

#[derive(Default)]
struct LinksInner {
    agents: HashMap<AgentId, AgentLink>,
    pending: HashMap<OpId, PendingOp>,
}

/// Shared registry of live agent connections and outstanding ops.
#[derive(Clone, Default)]
pub struct AgentLinks {
    inner: Arc<Mutex<LinksInner>>,
}

impl AgentLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self, agent: &AgentId) -> bool {
        self.inner.lock().agents.contains_key(agent)
    }

    pub fn connected_count(&self) -> usize {
        self.inner.lock().agents.len()
    }

    /// Register a newly announced agent. A reconnect replaces the old link;
    /// ops addressed to the agent keep their channels and simply resume on
    /// the new connection.
    fn register_agent(&self, agent: AgentId, tx: mpsc::Sender<SupervisorToAgent>) {
        let replaced = self
            .inner
            .lock()
            .agents
            .insert(agent.clone(), AgentLink { tx })
            .is_some();
        if replaced {
            info!(%agent, "agent reconnected, replacing link");
        } else {
            info!(%agent, "agent announced");
        }
    }

    /// Remove the agent and fail every op still addressed to it.
    pub fn agent_gone(&self, agent: &AgentId) {
        let failed: Vec<(OpId, mpsc::Sender<OpReply>)> = {
            let mut inner = self.inner.lock();
            inner.agents.remove(agent);
            let op_ids: Vec<OpId> = inner
                .pending
                .iter()
                .filter(|(_, p)| p.agent == *agent)
                .map(|(id, _)| id.clone())
                .collect();
            op_ids
                .into_iter()
                .filter_map(|id| inner.pending.remove(&id).map(|p| (id, p.tx)))
                .collect()
        };
        for (op_id, tx) in failed {
            warn!(%agent, %op_id, "failing op: agent lost");
            let _ = tx.try_send(OpReply::Error {
                message: "agent lost".into(),
            });
        }
    }

    /// Like [`Self::agent_gone`], but only when `tx` is still the agent's
    /// registered link. A connection already replaced by a reconnect must
    /// not tear down its successor.
    fn agent_gone_link(&self, agent: &AgentId, tx: &mpsc::Sender<SupervisorToAgent>) {
        let current = self
            .inner
            .lock()
            .agents
            .get(agent)
            .is_some_and(|link| link.tx.same_channel(tx));
        if current {
            self.agent_gone(agent);
        }
    }

    /// Wait for an agent the driver just launched to announce itself.
    pub async fn wait_for_agent(&self, agent: &AgentId, timeout: Duration) -> Result<(), LinkError> {
        let poll = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        while waited < timeout {
            if self.is_connected(agent) {
                return Ok(());
            }
            tokio::time::sleep(poll).await;
            waited += poll;
        }
        Err(LinkError::AnnounceTimeout(agent.clone(), timeout))
    }

    /// Number of ops still addressed to an agent. Zero means idle.
    pub fn pending_for(&self, agent: &AgentId) -> usize {
        self.inner
            .lock()
            .pending
            .values()
            .filter(|p| p.agent == *agent)
            .count()
    }

    /// Open a reply channel for an op addressed to `agent`.
    pub fn register_op(&self, agent: &AgentId, op_id: &OpId) -> mpsc::Receiver<OpReply> {
        let (tx, rx) = mpsc::channel(16);
        self.inner.lock().pending.insert(
            op_id.clone(),
            PendingOp {
                agent: agent.clone(),
                tx,
            },
        );
        rx
    }

    /// Close an op's reply channel. Safe to call more than once.
    pub fn unregister_op(&self, op_id: &OpId) {
        self.inner.lock().pending.remove(op_id);
    }

    /// Route one inbound reply to its op's channel.
    ///
    /// A reply for an unknown op is an invariant violation (duplicate
    /// terminal, or a frame for a destroyed op) — logged loudly, never
    /// allowed to take down the connection.
    pub fn deliver(&self, op_id: &OpId, reply: OpReply) {
        let entry = {
            let mut inner = self.inner.lock();
            if reply.is_terminal() {
                inner.pending.remove(op_id)
            } else {
                inner.pending.get(op_id).map(|p| PendingOp {
                    agent: p.agent.clone(),
                    tx: p.tx.clone(),
                })
            }
        };
        match entry {
            Some(p) => {
                if p.tx.try_send(reply).is_err() {
                    warn!(%op_id, "op reply dropped: receiver full or gone");
                }
            }
            None => {
                warn!(%op_id, ?reply, "reply for unknown op (already destroyed?)");
            }
        }
    }

    /// Send one op message to a connected agent.
    pub async fn send_to(&self, agent: &AgentId, msg: SupervisorToAgent) -> Result<(), LinkError> {
        let tx = {
            let inner = self.inner.lock();
            inner
                .agents
                .get(agent)
                .map(|l| l.tx.clone())
                .ok_or_else(|| LinkError::NotConnected(agent.clone()))?
        };
        tx.send(msg)
            .await
            .map_err(|_| LinkError::SendFailed(agent.clone()))
    }
}

/// Accept agent connections until shutdown.
pub async fn run_listener(listener: TcpListener, links: AgentLinks, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "agent connection accepted");
                        let links = links.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(serve_connection(stream, links, shutdown));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Handle one agent connection: handshake, then pump frames both ways.
async fn serve_connection(stream: TcpStream, links: AgentLinks, shutdown: CancellationToken) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut read) = ws.split();

    // First frame must be the liveness announcement
    let announce = tokio::time::timeout(Duration::from_secs(10), read.next()).await;
    let agent_id = match announce {
        Ok(Some(Ok(Message::Text(text)))) => {
            match lr_wire::decode::<AgentToSupervisor>(&text) {
                Ok(AgentToSupervisor::Alive { agent_id }) => agent_id,
                Ok(other) => {
                    warn!(?other, "expected alive announcement, closing");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "malformed announcement, closing");
                    return;
                }
            }
        }
        _ => {
            warn!("no announcement before timeout, closing");
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel::<SupervisorToAgent>(64);
    links.register_agent(agent_id.clone(), tx.clone());

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(msg) = outbound else { break };
                let text = match lr_wire::encode(&msg) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(%agent_id, error = %e, "failed to encode op message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(text)).await {
                    warn!(%agent_id, error = %e, "send failed, dropping link");
                    break;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match lr_wire::decode::<AgentToSupervisor>(&text) {
                            Ok(AgentToSupervisor::Reply { op_id, reply }) => {
                                links.deliver(&op_id, reply);
                            }
                            Ok(AgentToSupervisor::Alive { .. }) => {
                                debug!(%agent_id, "duplicate alive ignored");
                            }
                            Err(e) => {
                                warn!(%agent_id, error = %e, "malformed frame ignored");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(%agent_id, "agent connection closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%agent_id, error = %e, "connection error");
                        break;
                    }
                    Some(Ok(_)) => {} // Ping/Pong/Binary — ignore
                }
            }
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    links.agent_gone_link(&agent_id, &tx);
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
