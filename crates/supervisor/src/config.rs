// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor configuration.
//!
//! Built from CLI flags in `lrd`, with `LR_*` environment overrides for the
//! knobs tests and deployments tune without a flag change.

use std::path::PathBuf;

/// All tunables for one supervisor instance.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// TCP address the agent WebSocket listener binds
    pub listen_addr: String,
    /// WebSocket URL agents are told to dial back to
    pub supervisor_url: String,
    /// Directory holding durable job records (one file per identity)
    pub state_dir: PathBuf,
    /// Root of per-user run directories; drivers mount only the owner's
    /// subtree into containers
    pub run_dir_root: PathBuf,
    /// Program drivers launch for local agents
    pub agent_command: String,

    // Local driver capacity
    pub sequential_slots: usize,
    pub parallel_slots: usize,

    // Docker driver
    pub docker_image: String,
    pub docker_slots: usize,
    pub docker_cpus: u32,
    pub docker_memory_gb: u32,
    pub docker_ulimit_nofile: u32,

    // Sbatch driver
    pub sbatch_host: Option<String>,
    pub sbatch_slots: usize,
    pub sbatch_poll_secs: u64,
    /// Consecutive PENDING polls tolerated before the run is failed
    pub sbatch_pending_ceiling: u32,

    // Run-time budgets (seconds)
    pub run_secs_sequential: u64,
    pub run_secs_parallel: u64,
    pub analysis_secs: u64,

    // Lifecycle timing
    pub agent_start_secs: u64,
    pub cancel_ack_secs: u64,
    pub term_grace_ms: u64,
    pub purge_retention_secs: u64,
    pub purge_sweep_secs: u64,
    pub idle_evict_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8102".into(),
            supervisor_url: "ws://127.0.0.1:8102".into(),
            state_dir: default_state_dir(),
            run_dir_root: default_state_dir().join("runs"),
            agent_command: "lr-agent".into(),
            sequential_slots: env_or("LR_SEQUENTIAL_SLOTS", 4),
            parallel_slots: env_or("LR_PARALLEL_SLOTS", 2),
            docker_image: std::env::var("LR_DOCKER_IMAGE")
                .unwrap_or_else(|_| "longrun/agent:latest".into()),
            docker_slots: env_or("LR_DOCKER_SLOTS", 4),
            docker_cpus: env_or("LR_DOCKER_CPUS", 2),
            docker_memory_gb: env_or("LR_DOCKER_MEMORY_GB", 4),
            docker_ulimit_nofile: env_or("LR_DOCKER_ULIMIT_NOFILE", 1024),
            sbatch_host: std::env::var("LR_SBATCH_HOST").ok(),
            sbatch_slots: env_or("LR_SBATCH_SLOTS", 8),
            sbatch_poll_secs: env_or("LR_SBATCH_POLL_SECS", 15),
            sbatch_pending_ceiling: env_or("LR_SBATCH_PENDING_CEILING", 240),
            run_secs_sequential: env_or("LR_RUN_SECS_SEQUENTIAL", 3_600),
            run_secs_parallel: env_or("LR_RUN_SECS_PARALLEL", 7_200),
            analysis_secs: env_or("LR_ANALYSIS_SECS", 60),
            agent_start_secs: env_or("LR_AGENT_START_SECS", 30),
            cancel_ack_secs: env_or("LR_CANCEL_ACK_SECS", 10),
            term_grace_ms: env_or("LR_TERM_GRACE_MS", 2_000),
            purge_retention_secs: env_or("LR_PURGE_RETENTION_SECS", 7 * 24 * 3_600),
            purge_sweep_secs: env_or("LR_PURGE_SWEEP_SECS", 600),
            idle_evict_secs: env_or("LR_IDLE_EVICT_SECS", 1_800),
        }
    }
}

impl SupervisorConfig {
    /// Budget for a compute op, by run mode. Premium callers get double on
    /// parallel runs; sbatch runs are untimed (the external scheduler owns
    /// their wall clock).
    pub fn run_budget(&self, mode: lr_core::RunMode, premium: bool) -> Option<std::time::Duration> {
        use lr_core::RunMode;
        let secs = match mode {
            RunMode::Sequential => self.run_secs_sequential,
            RunMode::Parallel => {
                if premium {
                    self.run_secs_parallel * 2
                } else {
                    self.run_secs_parallel
                }
            }
            RunMode::Sbatch => return None,
        };
        Some(std::time::Duration::from_secs(secs))
    }

    /// Directory holding the durable job records.
    pub fn records_dir(&self) -> PathBuf {
        self.state_dir.join("records")
    }

    /// One user's run-directory subtree.
    pub fn user_dir(&self, uid: &str) -> PathBuf {
        self.run_dir_root.join(uid)
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("longrun")
}

fn env_or<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
