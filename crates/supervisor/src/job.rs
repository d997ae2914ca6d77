// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-identity compute-job state machine.
//!
//! One `ComputeJob` exists in memory per [`JobIdentity`]; its async mutex
//! is the serialization boundary for everything that touches the record.
//! Every mutating path ends with a durable write before returning, so the
//! on-disk record always reflects the last completed transition.
//!
//! Cancellation ordering: the cancel path marks and persists the record
//! *first*, then signals the run task and awaits its acknowledgement under
//! a bounded timeout. The `canceled_serial` marker set by that first step
//! is what makes cancel win every race against a late terminal reply — see
//! `ComputeJobRecord::finish_run`.

use crate::config::SupervisorConfig;
use crate::connection::AgentLinks;
use crate::drivers::{Driver, DriverError, DriverSet};
use crate::op::{Op, OpError};
use crate::storage::{RecordStore, StorageError};
use lr_core::{
    Clock, ComputeJobRecord, JobIdentity, JobStatus, RunDescriptor, SlotError, SlotQueue,
};
use lr_wire::{AnalysisKind, JobRef, JobState, OpReply, Reply, SupervisorToAgent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Op(#[from] OpError),
    #[error(transparent)]
    Slot(#[from] SlotError),
}

/// The in-flight run, if any.
struct ActiveRun {
    serial: u64,
    token: CancellationToken,
    done: Arc<Notify>,
}

struct JobInner {
    record: ComputeJobRecord,
    active: Option<ActiveRun>,
}

/// How one run task ended.
enum RunOutcome {
    Completed,
    /// The job command itself failed; its message is user-visible
    JobFailed { message: String },
    /// Infrastructure fault; user text and internal diagnostic kept apart
    Infra { user: String, internal: String },
    TimedOut,
    Canceled,
}

/// One compute job. Shared as `Arc`; resolve through the registry so at
/// most one instance exists per identity.
pub struct ComputeJob<C: Clock> {
    identity: JobIdentity,
    cfg: Arc<SupervisorConfig>,
    store: RecordStore,
    drivers: DriverSet,
    links: AgentLinks,
    clock: C,
    state: tokio::sync::Mutex<JobInner>,
    /// At most one filesystem-mutating op per run directory at a time
    dir_slots: SlotQueue,
    last_access: parking_lot::Mutex<Instant>,
}

impl<C: Clock + 'static> ComputeJob<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        identity: JobIdentity,
        record: ComputeJobRecord,
        cfg: Arc<SupervisorConfig>,
        store: RecordStore,
        drivers: DriverSet,
        links: AgentLinks,
        clock: C,
    ) -> Arc<Self> {
        let created = clock.now();
        Arc::new(Self {
            identity,
            cfg,
            store,
            drivers,
            links,
            clock,
            state: tokio::sync::Mutex::new(JobInner {
                record,
                active: None,
            }),
            dir_slots: SlotQueue::new(1),
            last_access: parking_lot::Mutex::new(created),
        })
    }

    pub fn identity(&self) -> &JobIdentity {
        &self.identity
    }

    fn touch(&self) {
        *self.last_access.lock() = self.clock.now();
    }

    pub(crate) fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    /// True when no run task is attached and nobody holds the state lock.
    /// Used by the registry's idle-eviction sweep.
    pub(crate) fn is_idle(&self) -> bool {
        match self.state.try_lock() {
            Ok(inner) => inner.active.is_none(),
            Err(_) => false,
        }
    }

    /// Current record, cloned under the job lock.
    pub async fn snapshot(&self) -> ComputeJobRecord {
        self.state.lock().await.record.clone()
    }

    /// Handle a run request.
    ///
    /// Identical-hash dedup: a request matching the in-flight or most
    /// recently completed run (and not forced) attaches to it instead of
    /// starting a second one. Otherwise the serial is bumped, the record
    /// persisted as pending, and the run scheduled as a deferred task so
    /// the reply returns immediately with the poll-again envelope.
    pub async fn run(self: &Arc<Self>, desc: RunDescriptor, force: bool) -> Result<Reply, JobError> {
        self.touch();
        let mut inner = self.state.lock().await;

        if !force && inner.record.hash == desc.hash {
            let status = inner.record.status;
            if status.is_active() || status == JobStatus::Completed {
                return Ok(Reply::state(&inner.record));
            }
        }

        // A forced or different submission supersedes any active run: its
        // task sees the canceled token, and its late writes carry a stale
        // serial the record rejects.
        if let Some(active) = inner.active.take() {
            info!(identity = %self.identity, superseded = active.serial, "superseding active run");
            active.token.cancel();
        }

        let now = self.clock.epoch_ms();
        let serial = inner.record.begin_run(&desc, now);
        self.store.save(&inner.record)?;
        info!(identity = %self.identity, serial, hash = %desc.hash, "run accepted");

        let token = CancellationToken::new();
        let done = Arc::new(Notify::new());
        let job = Arc::clone(self);
        let task_token = token.clone();
        let task_done = Arc::clone(&done);
        tokio::spawn(async move {
            job.execute_run(desc, serial, task_token, task_done).await;
        });
        inner.active = Some(ActiveRun {
            serial,
            token,
            done,
        });

        Ok(Reply::state(&inner.record))
    }

    /// Handle a status poll. A hash/serial mismatch yields `missing` so the
    /// caller starts fresh instead of attaching to a dead run.
    pub async fn status(&self, job: &JobRef) -> Reply {
        self.touch();
        let inner = self.state.lock().await;
        if inner.record.serial > 0 && inner.record.matches(&job.hash, job.serial) {
            Reply::state(&inner.record)
        } else {
            Reply::missing()
        }
    }

    /// Handle a cancel.
    ///
    /// The record is marked canceled and persisted before the run task is
    /// signalled, so concurrent pollers see the new truth immediately. The
    /// driver teardown is awaited under its own timeout; if it wedges we
    /// log and still report canceled — the job is no longer the caller's
    /// concern either way.
    pub async fn cancel(&self, job: &JobRef) -> Result<Reply, JobError> {
        self.touch();
        let waiter = {
            let mut inner = self.state.lock().await;
            if !inner.record.matches(&job.hash, job.serial) {
                // Stale cancel: the run it refers to no longer exists
                return Ok(Reply::State {
                    state: JobState {
                        status: JobStatus::Canceled,
                        serial: job.serial.unwrap_or(0),
                        hash: job.hash.clone(),
                        next_request_seconds: None,
                        parallel_status: None,
                        error: None,
                        alert: None,
                        status_message: None,
                    },
                });
            }
            if !inner.record.status.is_active() {
                return Ok(Reply::state(&inner.record));
            }
            let now = self.clock.epoch_ms();
            inner.record.mark_canceled(now);
            self.store.save(&inner.record)?;
            info!(identity = %self.identity, serial = inner.record.serial, "run canceled");
            inner.active.take().map(|active| {
                active.token.cancel();
                active.done
            })
        };

        if let Some(done) = waiter {
            let ack = tokio::time::timeout(
                Duration::from_secs(self.cfg.cancel_ack_secs),
                done.notified(),
            )
            .await;
            if ack.is_err() {
                warn!(identity = %self.identity, "cancel acknowledgement timed out");
            }
        }

        let inner = self.state.lock().await;
        Ok(Reply::state(&inner.record))
    }

    /// Handle an analysis call against the job's output.
    ///
    /// Deliberately tolerant of a canceled parallel run: late frame and
    /// file requests still succeed against whatever output exists, so only
    /// the hash (not the serial) gates the request.
    pub async fn analysis(
        &self,
        job: &JobRef,
        kind: AnalysisKind,
        command: Vec<String>,
        frame_index: Option<u32>,
        filename: Option<String>,
    ) -> Result<Reply, JobError> {
        self.touch();
        let (run_mode, run_dir) = {
            let inner = self.state.lock().await;
            if inner.record.serial == 0 || !inner.record.matches(&job.hash, None) {
                return Ok(Reply::missing());
            }
            (inner.record.run_mode, inner.record.run_dir.clone())
        };

        let driver = self.drivers.for_mode(run_mode)?;
        let mut op = Op::new(
            driver,
            self.links.clone(),
            Some(Duration::from_secs(self.cfg.analysis_secs)),
        );
        if kind == AnalysisKind::StatefulCompute {
            // Stateful compute mutates the run directory; serialize it
            // against the run itself
            op.hold_slot(self.dir_slots.acquire().await?);
        }
        op.prepare(&self.identity, run_mode.resource_kind()).await?;

        let request = serde_json::json!({
            "kind": kind,
            "frame_index": frame_index,
            "filename": filename,
        });
        op.send(SupervisorToAgent::Analysis {
            op_id: op.id().clone(),
            run_dir,
            command,
            fastpath: kind != AnalysisKind::DownloadDataFile,
            request: Some(request),
        })
        .await?;

        loop {
            match op.recv().await {
                Ok(OpReply::Data { data }) => return Ok(Reply::Data { data }),
                Ok(OpReply::Error { message }) => {
                    warn!(identity = %self.identity, %kind, internal = %message, "analysis failed");
                    return Ok(Reply::server_error());
                }
                Ok(OpReply::Running | OpReply::Progress { .. }) => continue,
                Ok(other) => {
                    error!(identity = %self.identity, ?other, "protocol violation: unexpected analysis reply");
                    return Ok(Reply::server_error());
                }
                Err(OpError::DeadlineExceeded) => {
                    warn!(identity = %self.identity, %kind, "analysis timed out");
                    return Ok(Reply::server_error());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// The deferred run task: drive the op, then apply the terminal state.
    async fn execute_run(
        self: Arc<Self>,
        desc: RunDescriptor,
        serial: u64,
        token: CancellationToken,
        done: Arc<Notify>,
    ) {
        let outcome = self.drive_run(&desc, serial, &token).await;

        let mut inner = self.state.lock().await;
        let now = self.clock.epoch_ms();
        let applied = match outcome {
            RunOutcome::Completed => {
                inner
                    .record
                    .finish_run(serial, JobStatus::Completed, None, None, now)
            }
            RunOutcome::JobFailed { message } => {
                inner
                    .record
                    .finish_run(serial, JobStatus::Error, Some(message), None, now)
            }
            RunOutcome::Infra { user, internal } => {
                error!(identity = %self.identity, serial, internal = %internal, "run failed");
                inner
                    .record
                    .finish_run(serial, JobStatus::Error, Some(user), Some(internal), now)
            }
            RunOutcome::TimedOut => inner.record.finish_run(
                serial,
                JobStatus::Error,
                Some("run exceeded its time limit".into()),
                None,
                now,
            ),
            // The cancel path already wrote the terminal record
            RunOutcome::Canceled => false,
        };
        if applied {
            if let Err(e) = self.store.save(&inner.record) {
                error!(identity = %self.identity, serial, error = %e, "failed to persist terminal record");
            }
        }
        if inner.active.as_ref().map(|a| a.serial) == Some(serial) {
            inner.active = None;
        }
        drop(inner);
        done.notify_one();
    }

    async fn drive_run(
        &self,
        desc: &RunDescriptor,
        serial: u64,
        token: &CancellationToken,
    ) -> RunOutcome {
        let driver = match self.drivers.for_mode(desc.run_mode) {
            Ok(driver) => driver,
            Err(e) => {
                return RunOutcome::Infra {
                    user: "no backend available for this run mode".into(),
                    internal: e.to_string(),
                }
            }
        };
        let budget = self.cfg.run_budget(desc.run_mode, desc.premium);
        let mut op = Op::new(Arc::clone(&driver), self.links.clone(), budget);

        let slot = tokio::select! {
            _ = token.cancelled() => return RunOutcome::Canceled,
            slot = self.dir_slots.acquire() => match slot {
                Ok(slot) => slot,
                Err(e) => {
                    return RunOutcome::Infra {
                        user: "could not schedule the run".into(),
                        internal: e.to_string(),
                    }
                }
            },
        };
        op.hold_slot(slot);

        // prepare() may suspend waiting on backend capacity; stay cancelable
        tokio::select! {
            _ = token.cancelled() => return RunOutcome::Canceled,
            prepared = op.prepare(&self.identity, desc.resource_kind()) => {
                if let Err(e) = prepared {
                    return RunOutcome::Infra {
                        user: "could not start the compute backend".into(),
                        internal: e.to_string(),
                    };
                }
            }
        }

        if let Err(e) = op
            .send(SupervisorToAgent::Run {
                op_id: op.id().clone(),
                run_dir: desc.run_dir.clone(),
                command: desc.command.clone(),
            })
            .await
        {
            return RunOutcome::Infra {
                user: "could not reach the compute backend".into(),
                internal: e.to_string(),
            };
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    self.cancel_agent_op(&driver, &op).await;
                    return RunOutcome::Canceled;
                }
                reply = op.recv() => match reply {
                    Ok(OpReply::Running) => self.persist_running(serial).await,
                    Ok(OpReply::Progress { parallel, message }) => {
                        self.persist_progress(serial, parallel, message).await;
                    }
                    Ok(OpReply::Exited { exit_code, message }) => {
                        return if exit_code == 0 {
                            RunOutcome::Completed
                        } else {
                            RunOutcome::JobFailed {
                                message: message
                                    .unwrap_or_else(|| format!("command exited with {exit_code}")),
                            }
                        };
                    }
                    Ok(OpReply::Error { message }) => {
                        return RunOutcome::Infra {
                            user: "the compute backend failed".into(),
                            internal: message,
                        };
                    }
                    Ok(other) => {
                        // Invariant violation, not fatal to the run
                        error!(identity = %self.identity, serial, ?other, "protocol violation: unexpected run reply");
                    }
                    Err(OpError::DeadlineExceeded) => {
                        self.cancel_agent_op(&driver, &op).await;
                        return RunOutcome::TimedOut;
                    }
                    Err(e) => {
                        return RunOutcome::Infra {
                            user: "lost contact with the compute backend".into(),
                            internal: e.to_string(),
                        };
                    }
                }
            }
        }
    }

    /// Best-effort cancel of the run op at its agent, awaited briefly.
    /// Analysis ops addressed to the same agent are deliberately left
    /// untouched.
    async fn cancel_agent_op(&self, driver: &Arc<dyn Driver>, run_op: &Op) {
        let Some(agent) = run_op.agent().cloned() else {
            return;
        };
        let mut cancel_op = Op::new(
            Arc::clone(driver),
            self.links.clone(),
            Some(Duration::from_secs(self.cfg.cancel_ack_secs)),
        );
        cancel_op.attach(&agent);
        let msg = SupervisorToAgent::Cancel {
            op_id: cancel_op.id().clone(),
            targets: vec![run_op.id().clone()],
        };
        if let Err(e) = cancel_op.send(msg).await {
            warn!(identity = %self.identity, error = %e, "cancel delivery failed");
            return;
        }
        match cancel_op.recv().await {
            Ok(OpReply::Canceled) => {}
            Ok(other) => {
                warn!(identity = %self.identity, ?other, "unexpected cancel acknowledgement");
            }
            Err(e) => {
                warn!(identity = %self.identity, error = %e, "cancel not acknowledged");
            }
        }
    }

    async fn persist_running(&self, serial: u64) {
        let mut inner = self.state.lock().await;
        let now = self.clock.epoch_ms();
        if inner.record.note_running(serial, now) {
            if let Err(e) = self.store.save(&inner.record) {
                error!(identity = %self.identity, serial, error = %e, "failed to persist running state");
            }
        }
    }

    async fn persist_progress(
        &self,
        serial: u64,
        parallel: Option<lr_core::ParallelStatus>,
        message: Option<String>,
    ) {
        let mut inner = self.state.lock().await;
        let now = self.clock.epoch_ms();
        if inner.record.note_progress(serial, parallel, message, now) {
            if let Err(e) = self.store.save(&inner.record) {
                error!(identity = %self.identity, serial, error = %e, "failed to persist progress");
            }
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
