// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted in-process driver for tests.
//!
//! Delivers replies straight into the op registry without any process or
//! socket, so job-machine and supervisor tests run hermetically. Each run
//! op consumes the next scripted [`FakeOutcome`]; the default outcome is a
//! clean exit.

use super::{Driver, DriverError, RosterKey};
use crate::connection::AgentLinks;
use async_trait::async_trait;
use lr_core::{AgentId, JobIdentity, ParallelStatus, ResourceKind};
use lr_wire::{OpReply, SupervisorToAgent};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the next run op should do.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    /// Ack running, then exit with this code
    Complete { exit_code: i32 },
    /// Ack running, stream `frames` progress updates, then exit 0
    Progress { frames: u32 },
    /// Fail the op at the driver/agent level
    Fail { message: String },
    /// Ack running, then never reply again (for cancel/deadline tests)
    Hang,
}

pub struct FakeDriver {
    links: AgentLinks,
    outcomes: Mutex<VecDeque<FakeOutcome>>,
    assigned: Mutex<HashMap<RosterKey, AgentId>>,
    sent: Mutex<Vec<SupervisorToAgent>>,
    fail_assign: Mutex<Option<DriverError>>,
    analysis_data: Mutex<serde_json::Value>,
    run_ops: AtomicUsize,
    delay: Duration,
}

impl FakeDriver {
    pub fn new(links: AgentLinks) -> Arc<Self> {
        Arc::new(Self {
            links,
            outcomes: Mutex::new(VecDeque::new()),
            assigned: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            fail_assign: Mutex::new(None),
            analysis_data: Mutex::new(serde_json::json!({ "ok": true })),
            run_ops: AtomicUsize::new(0),
            delay: Duration::from_millis(10),
        })
    }

    /// Queue the outcome for the next run op.
    pub fn push_outcome(&self, outcome: FakeOutcome) {
        self.outcomes.lock().push_back(outcome);
    }

    pub fn set_analysis_data(&self, data: serde_json::Value) {
        *self.analysis_data.lock() = data;
    }

    /// Make the next `assign` fail with this error (e.g. a batch queue
    /// stuck past its pending ceiling).
    pub fn fail_next_assign(&self, error: DriverError) {
        *self.fail_assign.lock() = Some(error);
    }

    /// Number of run ops dispatched so far.
    pub fn run_ops(&self) -> usize {
        self.run_ops.load(Ordering::SeqCst)
    }

    /// Every message sent through the driver, in order.
    pub fn sent(&self) -> Vec<SupervisorToAgent> {
        self.sent.lock().clone()
    }

    /// Agents handed out by `assign` so far.
    pub fn assigned_agents(&self) -> Vec<AgentId> {
        self.assigned.lock().values().cloned().collect()
    }
}

#[async_trait]
impl Driver for FakeDriver {
    fn kind(&self) -> &'static str {
        "fake"
    }

    async fn assign(
        &self,
        identity: &JobIdentity,
        kind: ResourceKind,
    ) -> Result<AgentId, DriverError> {
        if let Some(error) = self.fail_assign.lock().take() {
            return Err(error);
        }
        let key = (identity.uid.clone(), kind);
        Ok(self
            .assigned
            .lock()
            .entry(key)
            .or_insert_with(AgentId::new)
            .clone())
    }

    async fn send(&self, _agent: &AgentId, msg: SupervisorToAgent) -> Result<(), DriverError> {
        self.sent.lock().push(msg.clone());
        let links = self.links.clone();
        let delay = self.delay;
        match msg {
            SupervisorToAgent::Run { op_id, .. } => {
                self.run_ops.fetch_add(1, Ordering::SeqCst);
                let outcome = self
                    .outcomes
                    .lock()
                    .pop_front()
                    .unwrap_or(FakeOutcome::Complete { exit_code: 0 });
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    links.deliver(&op_id, OpReply::Running);
                    match outcome {
                        FakeOutcome::Complete { exit_code } => {
                            tokio::time::sleep(delay).await;
                            links.deliver(
                                &op_id,
                                OpReply::Exited {
                                    exit_code,
                                    message: (exit_code != 0)
                                        .then(|| format!("command exited {exit_code}")),
                                },
                            );
                        }
                        FakeOutcome::Progress { frames } => {
                            for frame in 1..=frames {
                                tokio::time::sleep(delay).await;
                                links.deliver(
                                    &op_id,
                                    OpReply::Progress {
                                        parallel: Some(ParallelStatus {
                                            frame_count: frame,
                                            percent_complete: f64::from(frame) * 100.0
                                                / f64::from(frames),
                                            elapsed_secs: u64::from(frame),
                                        }),
                                        message: None,
                                    },
                                );
                            }
                            tokio::time::sleep(delay).await;
                            links.deliver(
                                &op_id,
                                OpReply::Exited {
                                    exit_code: 0,
                                    message: None,
                                },
                            );
                        }
                        FakeOutcome::Fail { message } => {
                            tokio::time::sleep(delay).await;
                            links.deliver(&op_id, OpReply::Error { message });
                        }
                        FakeOutcome::Hang => {}
                    }
                });
            }
            SupervisorToAgent::Analysis { op_id, .. } => {
                let data = self.analysis_data.lock().clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    links.deliver(&op_id, OpReply::Data { data });
                });
            }
            SupervisorToAgent::Cancel { op_id, .. } => {
                tokio::spawn(async move {
                    links.deliver(&op_id, OpReply::Canceled);
                });
            }
        }
        Ok(())
    }

    async fn terminate(&self, agent: &AgentId) -> Result<(), DriverError> {
        self.assigned.lock().retain(|_, id| id != agent);
        self.links.agent_gone(agent);
        Ok(())
    }
}
