// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker driver — agents in resource-limited containers.
//!
//! The docker CLI is used for container lifecycle. Each container gets
//! explicit cpu/memory/open-file caps and mounts only the owner's run
//! subtree. Container capacity is one shared slot pool; when it runs dry
//! the driver preempts an idle agent (no outstanding ops) before queueing,
//! scanning from a rotating cursor so no single owner's agents are always
//! the preemption victim.

use super::{AgentRoster, Claim, Driver, DriverError, RosterEntry};
use crate::config::SupervisorConfig;
use crate::connection::AgentLinks;
use async_trait::async_trait;
use lr_core::{AgentId, JobIdentity, ResourceKind, SlotQueue};
use lr_wire::SupervisorToAgent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

struct DockerMeta {
    container: String,
}

pub struct DockerDriver {
    cfg: Arc<SupervisorConfig>,
    links: AgentLinks,
    slots: SlotQueue,
    roster: Arc<AgentRoster<DockerMeta>>,
    preempt_cursor: AtomicUsize,
}

impl DockerDriver {
    pub fn new(cfg: Arc<SupervisorConfig>, links: AgentLinks) -> Self {
        Self {
            slots: SlotQueue::new(cfg.docker_slots),
            cfg,
            links,
            roster: Arc::new(AgentRoster::new()),
            preempt_cursor: AtomicUsize::new(0),
        }
    }

    /// Terminate one idle agent to free capacity, if any agent is idle.
    async fn preempt_idle(&self) {
        let agents = self.roster.agent_ids();
        if agents.is_empty() {
            return;
        }
        let start = self.preempt_cursor.fetch_add(1, Ordering::Relaxed) % agents.len();
        for offset in 0..agents.len() {
            let candidate = &agents[(start + offset) % agents.len()];
            if self.links.pending_for(candidate) == 0 {
                info!(agent_id = %candidate, "preempting idle agent for capacity");
                if let Err(e) = self.terminate(candidate).await {
                    warn!(agent_id = %candidate, error = %e, "idle preemption failed");
                }
                return;
            }
        }
    }

    async fn start_container(&self, agent_id: &AgentId, uid: &str) -> Result<String, DriverError> {
        let container = format!("lr-{}", agent_id.as_str());
        let user_dir = self.cfg.user_dir(uid);
        let mount = format!("{}:{}", user_dir.display(), user_dir.display());

        run_docker(&[
            "run",
            "-d",
            "--rm",
            "--name",
            &container,
            "--network",
            "host",
            "--cpus",
            &self.cfg.docker_cpus.to_string(),
            "--memory",
            &format!("{}g", self.cfg.docker_memory_gb),
            "--ulimit",
            &format!("nofile={}", self.cfg.docker_ulimit_nofile),
            "-v",
            &mount,
            &self.cfg.docker_image,
            "lr-agent",
            "--agent-id",
            agent_id.as_str(),
            "--supervisor",
            &self.cfg.supervisor_url,
        ])
        .await?;

        info!(%agent_id, container, "container started");
        Ok(container)
    }
}

#[async_trait]
impl Driver for DockerDriver {
    fn kind(&self) -> &'static str {
        "docker"
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
                    self.roster.remove(&id);
                }
                Claim::Create(guard) => {
                    let slot = match self.slots.try_acquire() {
                        Some(slot) => slot,
                        None => {
                            self.preempt_idle().await;
                            self.slots.acquire().await?
                        }
                    };
                    let agent_id = AgentId::new();
                    let container = self.start_container(&agent_id, &identity.uid).await?;
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
                                meta: DockerMeta { container },
                            });
                            return Ok(agent_id);
                        }
                        Err(e) => {
                            warn!(%agent_id, error = %e, "container never announced, removing");
                            let _ = run_docker(&["rm", "-f", &container]).await;
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
        if let Err(e) = run_docker(&["rm", "-f", &entry.meta.container]).await {
            // Container may already be gone (--rm after exit)
            warn!(agent_id = %agent, error = %e, "container removal failed");
        }
        self.links.agent_gone(agent);
        Ok(())
    }
}

/// Run one docker CLI command, failing on a non-zero exit.
async fn run_docker(args: &[&str]) -> Result<String, DriverError> {
    let output = tokio::process::Command::new("docker")
        .args(args)
        .output()
        .await
        .map_err(|e| DriverError::Remote(format!("docker: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DriverError::Remote(format!(
            "docker {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
