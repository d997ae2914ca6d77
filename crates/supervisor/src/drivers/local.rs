// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local driver — agents as direct child processes.

use super::{AgentRoster, Claim, Driver, DriverError, RosterEntry};
use crate::config::SupervisorConfig;
use crate::connection::AgentLinks;
use async_trait::async_trait;
use lr_core::{AgentId, JobIdentity, ResourceKind, SlotQueue};
use lr_wire::SupervisorToAgent;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

struct LocalMeta {
    pid: Option<u32>,
}

/// Spawns `lr-agent` children directly, bounded by small fixed pools of
/// sequential and parallel slots.
pub struct LocalDriver {
    cfg: Arc<SupervisorConfig>,
    links: AgentLinks,
    sequential_slots: SlotQueue,
    parallel_slots: SlotQueue,
    roster: Arc<AgentRoster<LocalMeta>>,
}

impl LocalDriver {
    pub fn new(cfg: Arc<SupervisorConfig>, links: AgentLinks) -> Self {
        Self {
            sequential_slots: SlotQueue::new(cfg.sequential_slots),
            parallel_slots: SlotQueue::new(cfg.parallel_slots),
            cfg,
            links,
            roster: Arc::new(AgentRoster::new()),
        }
    }

    fn slots(&self, kind: ResourceKind) -> &SlotQueue {
        match kind {
            ResourceKind::Sequential => &self.sequential_slots,
            ResourceKind::Parallel => &self.parallel_slots,
        }
    }

    async fn start_agent(&self, agent_id: &AgentId) -> Result<Option<u32>, DriverError> {
        let mut cmd = tokio::process::Command::new(&self.cfg.agent_command);
        cmd.arg("--agent-id")
            .arg(agent_id.as_str())
            .arg("--supervisor")
            .arg(&self.cfg.supervisor_url)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| DriverError::SpawnFailed(format!("failed to spawn agent: {e}")))?;
        let pid = child.id();
        info!(%agent_id, ?pid, "local agent spawned");

        // Reaper: log the exit, then fail anything still addressed to the
        // agent and free its roster entry (and slot).
        let reaper_id = agent_id.clone();
        let roster = Arc::clone(&self.roster);
        let links = self.links.clone();
        tokio::spawn(async move {
            match child.wait_with_output().await {
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    info!(
                        agent_id = %reaper_id,
                        exit_status = %output.status,
                        stderr = %stderr,
                        "local agent exited"
                    );
                }
                Err(e) => {
                    warn!(agent_id = %reaper_id, error = %e, "failed to wait on agent process");
                }
            }
            roster.remove(&reaper_id);
            links.agent_gone(&reaper_id);
        });

        Ok(pid)
    }

    fn signal(&self, pid: u32, sig: Signal) {
        if let Err(e) = kill(Pid::from_raw(pid as i32), sig) {
            // Process already gone — the reaper beat us to it
            warn!(pid, signal = %sig, error = %e, "signal delivery failed");
        }
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn assign(
        &self,
        identity: &JobIdentity,
        kind: ResourceKind,
    ) -> Result<AgentId, DriverError> {
        let key = (identity.uid.clone(), kind);
        loop {
            match self.roster.claim(&key).await {
                Claim::Existing(id) => {
                    if self.links.is_connected(&id) {
                        return Ok(id);
                    }
                    // Dead entry (agent exited without the reaper having
                    // cleaned up yet) — drop it and retry
                    self.roster.remove(&id);
                }
                Claim::Create(guard) => {
                    let slot = self.slots(kind).acquire().await?;
                    let agent_id = AgentId::new();
                    let pid = self.start_agent(&agent_id).await?;
                    match self
                        .links
                        .wait_for_agent(
                            &agent_id,
                            Duration::from_secs(self.cfg.agent_start_secs),
                        )
                        .await
                    {
                        Ok(()) => {
                            guard.fulfill(RosterEntry {
                                id: agent_id.clone(),
                                slot: Some(slot),
                                meta: LocalMeta { pid },
                            });
                            return Ok(agent_id);
                        }
                        Err(e) => {
                            warn!(%agent_id, error = %e, "agent never announced, killing");
                            if let Some(pid) = pid {
                                self.signal(pid, Signal::SIGKILL);
                            }
                            return Err(DriverError::SpawnFailed(e.to_string()));
                        }
                    }
                }
            }
        }
    }

    async fn send(&self, agent: &AgentId, msg: SupervisorToAgent) -> Result<(), DriverError> {
        Ok(self.links.send_to(agent, msg).await?)
    }

    async fn terminate(&self, agent: &AgentId) -> Result<(), DriverError> {
        let Some((_, entry)) = self.roster.remove(agent) else {
            return Ok(());
        };
        if let Some(pid) = entry.meta.pid {
            self.signal(pid, Signal::SIGTERM);
            tokio::time::sleep(Duration::from_millis(self.cfg.term_grace_ms)).await;
            // Escalate if the process ignored SIGTERM. The kill is harmless
            // when it already exited.
            self.signal(pid, Signal::SIGKILL);
        }
        self.links.agent_gone(agent);
        Ok(())
    }
}
