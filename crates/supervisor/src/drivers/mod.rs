// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend drivers.
//!
//! A driver owns agent lifecycle (start, health, termination) and the slot
//! accounting for its backend. All drivers converge on the same observable
//! contract: slots are never over-subscribed, terminating an agent releases
//! its slot exactly once, and an agent that disappears fails every op still
//! addressed to it instead of hanging.

mod docker;
mod local;
mod sbatch;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use docker::DockerDriver;
pub use local::LocalDriver;
pub use sbatch::SbatchDriver;

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeDriver, FakeOutcome};

use crate::connection::LinkError;
use async_trait::async_trait;
use lr_core::{AgentId, JobIdentity, ResourceKind, RunMode, Slot, SlotError};
use lr_wire::SupervisorToAgent;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("agent spawn failed: {0}")]
    SpawnFailed(String),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error("remote command failed: {0}")]
    Remote(String),
    #[error("batch job stuck in pending past the configured ceiling")]
    PendingCeiling,
    #[error("unexpected external queue state: {0}")]
    QueueState(String),
    #[error("no {0} driver configured")]
    Unconfigured(&'static str),
}

/// Backend-specific agent manager. One instance per backend kind.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Backend name for logs.
    fn kind(&self) -> &'static str;

    /// Resolve the agent for `(identity.uid, kind)`, creating and starting
    /// one if needed. May suspend waiting on a capacity slot.
    async fn assign(
        &self,
        identity: &JobIdentity,
        kind: ResourceKind,
    ) -> Result<AgentId, DriverError>;

    /// Deliver one op message to an agent.
    async fn send(&self, agent: &AgentId, msg: SupervisorToAgent) -> Result<(), DriverError>;

    /// Terminate an agent. Idempotent: terminating an unknown or already
    /// dead agent is a no-op.
    async fn terminate(&self, agent: &AgentId) -> Result<(), DriverError>;
}

/// The drivers one supervisor routes between.
#[derive(Clone)]
pub struct DriverSet {
    compute: Arc<dyn Driver>,
    sbatch: Option<Arc<dyn Driver>>,
}

impl DriverSet {
    pub fn new(compute: Arc<dyn Driver>, sbatch: Option<Arc<dyn Driver>>) -> Self {
        Self { compute, sbatch }
    }

    pub fn for_mode(&self, mode: RunMode) -> Result<Arc<dyn Driver>, DriverError> {
        match mode {
            RunMode::Sbatch => self
                .sbatch
                .clone()
                .ok_or(DriverError::Unconfigured("sbatch")),
            RunMode::Sequential | RunMode::Parallel => Ok(self.compute.clone()),
        }
    }
}

/// Roster key: jobs of one owner and resource kind share one agent, so
/// same-owner work colocates on one execution host.
pub(crate) type RosterKey = (String, ResourceKind);

/// One live agent tracked by a driver.
pub(crate) struct RosterEntry<M> {
    pub id: AgentId,
    /// Capacity slot held for the agent's whole lifetime; released exactly
    /// once when the entry is removed
    pub slot: Option<Slot>,
    pub meta: M,
}

/// Claim on a roster key: either an agent already exists, or the caller
/// won the right to create one.
pub(crate) enum Claim<'a, M> {
    Existing(AgentId),
    Create(ClaimGuard<'a, M>),
}

struct RosterInner<M> {
    agents: HashMap<RosterKey, RosterEntry<M>>,
    inflight: HashSet<RosterKey>,
}

/// Shared agent bookkeeping for the process-spawning drivers.
///
/// Serializes agent creation per key without holding a lock across the
/// spawn: the winner marks the key in-flight, losers poll until the agent
/// appears (or the winner gives up and the key frees).
pub(crate) struct AgentRoster<M> {
    inner: Mutex<RosterInner<M>>,
}

impl<M> AgentRoster<M> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RosterInner {
                agents: HashMap::new(),
                inflight: HashSet::new(),
            }),
        }
    }

    pub async fn claim(&self, key: &RosterKey) -> Claim<'_, M> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(entry) = inner.agents.get(key) {
                    return Claim::Existing(entry.id.clone());
                }
                if !inner.inflight.contains(key) {
                    inner.inflight.insert(key.clone());
                    return Claim::Create(ClaimGuard {
                        roster: self,
                        key: key.clone(),
                        done: false,
                    });
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Remove an agent by id, dropping (and thereby releasing) its slot.
    pub fn remove(&self, agent: &AgentId) -> Option<(RosterKey, RosterEntry<M>)> {
        let mut inner = self.inner.lock();
        let key = inner
            .agents
            .iter()
            .find(|(_, e)| e.id == *agent)
            .map(|(k, _)| k.clone())?;
        inner.agents.remove(&key).map(|e| (key, e))
    }

    pub fn contains(&self, agent: &AgentId) -> bool {
        self.inner.lock().agents.values().any(|e| e.id == *agent)
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.inner.lock().agents.values().map(|e| e.id.clone()).collect()
    }
}

/// In-flight creation marker. Dropping without `fulfill` frees the key so
/// a waiting claimant can retry.
pub(crate) struct ClaimGuard<'a, M> {
    roster: &'a AgentRoster<M>,
    key: RosterKey,
    done: bool,
}

impl<M> ClaimGuard<'_, M> {
    pub fn fulfill(mut self, entry: RosterEntry<M>) {
        let mut inner = self.roster.inner.lock();
        inner.inflight.remove(&self.key);
        inner.agents.insert(self.key.clone(), entry);
        self.done = true;
    }
}

impl<M> Drop for ClaimGuard<'_, M> {
    fn drop(&mut self) {
        if !self.done {
            self.roster.inner.lock().inflight.remove(&self.key);
        }
    }
}
