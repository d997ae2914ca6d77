// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One outstanding request/response unit addressed to a driver/agent.
//!
//! An op owns its reply channel, an optional run-time deadline, and any
//! slot it acquired. Cleanup runs exactly once no matter which path ends
//! the op — normal completion, deadline, explicit cancel, or task abort —
//! because `destroy()` is idempotent and also wired into `Drop`.

use crate::connection::AgentLinks;
use crate::drivers::{Driver, DriverError};
use lr_core::{JobIdentity, OpId, ResourceKind, Slot};
use lr_wire::{OpReply, SupervisorToAgent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum OpError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("op run-time budget exceeded")]
    DeadlineExceeded,
    #[error("op reply channel closed")]
    ChannelClosed,
    #[error("op used before prepare()")]
    NotPrepared,
}

/// One op. Created per run/analysis/cancel request, destroyed exactly once.
pub struct Op {
    id: OpId,
    driver: Arc<dyn Driver>,
    links: AgentLinks,
    agent: Option<lr_core::AgentId>,
    slot: Option<Slot>,
    budget: Option<Duration>,
    deadline: Option<tokio::time::Instant>,
    rx: Option<mpsc::Receiver<OpReply>>,
    destroyed: bool,
}

impl Op {
    pub fn new(driver: Arc<dyn Driver>, links: AgentLinks, budget: Option<Duration>) -> Self {
        Self {
            id: OpId::new(),
            driver,
            links,
            agent: None,
            slot: None,
            budget,
            deadline: None,
            rx: None,
            destroyed: false,
        }
    }

    pub fn id(&self) -> &OpId {
        &self.id
    }

    pub fn agent(&self) -> Option<&lr_core::AgentId> {
        self.agent.as_ref()
    }

    /// Attach a slot this op is responsible for releasing (the per-job
    /// run-directory slot). Released exactly once, by `destroy()`.
    pub fn hold_slot(&mut self, slot: Slot) {
        self.slot = Some(slot);
    }

    /// Acquire an agent assignment, creating/starting one if necessary.
    /// May suspend while the driver waits on capacity.
    pub async fn prepare(
        &mut self,
        identity: &JobIdentity,
        kind: ResourceKind,
    ) -> Result<(), OpError> {
        let agent = self.driver.assign(identity, kind).await?;
        self.rx = Some(self.links.register_op(&agent, &self.id));
        self.agent = Some(agent);
        Ok(())
    }

    /// Address an agent that already exists, without driver assignment.
    /// Used for cancel ops, which must never wait on capacity.
    pub fn attach(&mut self, agent: &lr_core::AgentId) {
        self.rx = Some(self.links.register_op(agent, &self.id));
        self.agent = Some(agent.clone());
    }

    /// Write the message to the agent connection and arm the deadline.
    pub async fn send(&mut self, msg: SupervisorToAgent) -> Result<(), OpError> {
        let agent = self.agent.clone().ok_or(OpError::NotPrepared)?;
        self.driver.send(&agent, msg).await?;
        if let Some(budget) = self.budget {
            self.deadline
                .get_or_insert_with(|| tokio::time::Instant::now() + budget);
        }
        Ok(())
    }

    /// Wait for the next reply on this op's private channel.
    ///
    /// The deadline covers the whole exchange from `send()`, not each
    /// individual frame; a run that streams progress for longer than its
    /// budget still times out.
    pub async fn recv(&mut self) -> Result<OpReply, OpError> {
        let rx = self.rx.as_mut().ok_or(OpError::NotPrepared)?;
        match self.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(reply)) => Ok(reply),
                Ok(None) => Err(OpError::ChannelClosed),
                Err(_) => Err(OpError::DeadlineExceeded),
            },
            None => rx.recv().await.ok_or(OpError::ChannelClosed),
        }
    }

    /// Idempotent cleanup: release the slot, disarm the deadline, detach
    /// from the reply registry. Safe from any completion path.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.slot.take();
        self.deadline.take();
        self.rx.take();
        self.links.unregister_op(&self.id);
    }
}

impl Drop for Op {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
#[path = "op_tests.rs"]
mod tests;
