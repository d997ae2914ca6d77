// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sbatch driver — agents on a remote batch cluster.
//!
//! The driver talks to the cluster over ssh. Starting an agent is a
//! three-step exchange: a short-lived prepare command that must succeed
//! first, an `sbatch` submission whose script launches `lr-agent --batch`
//! inside the allocation, then fixed-interval `squeue` polling until the
//! external job leaves PENDING (bounded by a ceiling) and the agent dials
//! back. Run-time budgets are not armed for sbatch ops — the external
//! scheduler owns their wall clock.

use super::{AgentRoster, Claim, Driver, DriverError, RosterEntry};
use crate::config::SupervisorConfig;
use crate::connection::AgentLinks;
use async_trait::async_trait;
use lr_core::{AgentId, JobIdentity, ResourceKind, SlotQueue};
use lr_wire::SupervisorToAgent;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

struct SbatchMeta {
    remote_job: String,
}

pub struct SbatchDriver {
    cfg: Arc<SupervisorConfig>,
    links: AgentLinks,
    host: String,
    slots: SlotQueue,
    roster: Arc<AgentRoster<SbatchMeta>>,
}

impl SbatchDriver {
    pub fn new(cfg: Arc<SupervisorConfig>, links: AgentLinks, host: String) -> Self {
        Self {
            slots: SlotQueue::new(cfg.sbatch_slots),
            cfg,
            links,
            host,
            roster: Arc::new(AgentRoster::new()),
        }
    }

    fn remote_dir(&self, uid: &str) -> String {
        format!("longrun/{uid}")
    }

    /// The prepare sub-operation: create the remote run tree. Submission
    /// only proceeds once this has succeeded.
    async fn prepare_remote(&self, uid: &str) -> Result<(), DriverError> {
        let dir = self.remote_dir(uid);
        run_remote(&self.host, &format!("mkdir -p {dir}"), None).await?;
        Ok(())
    }

    async fn submit(&self, agent_id: &AgentId, uid: &str) -> Result<String, DriverError> {
        let dir = self.remote_dir(uid);
        let script = format!(
            "#!/bin/bash\n\
             #SBATCH --job-name=lr-{id}\n\
             #SBATCH --chdir={dir}\n\
             #SBATCH --output=lr-{id}.log\n\
             exec lr-agent --agent-id {id} --supervisor {url} --batch --pid-file lr-{id}.pid\n",
            id = agent_id.as_str(),
            url = self.cfg.supervisor_url,
        );
        let stdout = run_remote(&self.host, "sbatch", Some(&script)).await?;

        // "Submitted batch job 12345"
        let remote_job = stdout
            .rsplit(' ')
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| DriverError::Remote(format!("unparseable sbatch output: {stdout}")))?
            .to_string();
        info!(%agent_id, remote_job, "batch job submitted");
        Ok(remote_job)
    }

    async fn queue_state(&self, remote_job: &str) -> Result<String, DriverError> {
        let out = run_remote(
            &self.host,
            &format!("squeue --noheader --format=%T --job={remote_job}"),
            None,
        )
        .await?;
        Ok(out.trim().to_string())
    }

    async fn scancel(&self, remote_job: &str) {
        if let Err(e) = run_remote(&self.host, &format!("scancel {remote_job}"), None).await {
            warn!(remote_job, error = %e, "scancel failed");
        }
    }

    /// Poll the external queue until the job leaves PENDING and the agent
    /// announces, or fail and tear down.
    async fn await_agent(&self, agent_id: &AgentId, remote_job: &str) -> Result<(), DriverError> {
        let mut pending_polls: u32 = 0;
        loop {
            if self.links.is_connected(agent_id) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(self.cfg.sbatch_poll_secs)).await;
            if self.links.is_connected(agent_id) {
                return Ok(());
            }
            let state = self.queue_state(remote_job).await?;
            match state.as_str() {
                "PENDING" | "CONFIGURING" => {
                    pending_polls += 1;
                    if pending_polls > self.cfg.sbatch_pending_ceiling {
                        warn!(%agent_id, remote_job, pending_polls, "pending ceiling exceeded");
                        self.scancel(remote_job).await;
                        return Err(DriverError::PendingCeiling);
                    }
                }
                "RUNNING" | "COMPLETING" => {
                    // Allocation granted; give the agent its normal start
                    // window to dial back
                    self.links
                        .wait_for_agent(
                            agent_id,
                            Duration::from_secs(self.cfg.agent_start_secs),
                        )
                        .await?;
                    return Ok(());
                }
                other => {
                    warn!(%agent_id, remote_job, state = other, "unexpected queue state");
                    self.scancel(remote_job).await;
                    return Err(DriverError::QueueState(if other.is_empty() {
                        "job vanished from queue".into()
                    } else {
                        other.to_string()
                    }));
                }
            }
        }
    }
}

#[async_trait]
impl Driver for SbatchDriver {
    fn kind(&self) -> &'static str {
        "sbatch"
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
                    let slot = self.slots.acquire().await?;
                    self.prepare_remote(&identity.uid).await?;
                    let agent_id = AgentId::new();
                    let remote_job = self.submit(&agent_id, &identity.uid).await?;
                    match self.await_agent(&agent_id, &remote_job).await {
                        Ok(()) => {
                            guard.fulfill(RosterEntry {
                                id: agent_id.clone(),
                                slot: Some(slot),
                                meta: SbatchMeta { remote_job },
                            });
                            return Ok(agent_id);
                        }
                        Err(e) => return Err(e),
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
        self.scancel(&entry.meta.remote_job).await;
        self.links.agent_gone(agent);
        Ok(())
    }
}

/// Run one command on the cluster over ssh, optionally feeding stdin.
async fn run_remote(host: &str, cmd: &str, stdin: Option<&str>) -> Result<String, DriverError> {
    let mut command = tokio::process::Command::new("ssh");
    command
        .arg("-o")
        .arg("BatchMode=yes")
        .arg(host)
        .arg(cmd)
        .stdin(if stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        })
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| DriverError::Remote(format!("ssh: {e}")))?;
    if let (Some(input), Some(mut handle)) = (stdin, child.stdin.take()) {
        handle
            .write_all(input.as_bytes())
            .await
            .map_err(|e| DriverError::Remote(format!("ssh stdin: {e}")))?;
        drop(handle);
    }
    let output = child
        .wait_with_output()
        .await
        .map_err(|e| DriverError::Remote(format!("ssh: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DriverError::Remote(format!(
            "`{cmd}` on {host} failed: {}",
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
