// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable compute-job record and status machine.
//!
//! One record exists per [`JobIdentity`], persisted as one JSON file. The
//! record is the sole source of truth across supervisor restarts, so every
//! transition helper here is written to be safe against stale writers: a
//! caller passes the serial of the run it thinks it is finishing, and the
//! record drops anything that no longer refers to the current run.

use crate::descriptor::{RunDescriptor, RunMode};
use crate::identity::JobIdentity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle status of a compute job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Record exists but no run was ever started
    Missing,
    /// Run accepted, not yet acknowledged by an agent
    Pending,
    /// Agent acknowledged the job command started
    Running,
    Completed,
    Canceled,
    Error,
    /// Terminal record whose run directory was reclaimed
    Purged,
}

crate::simple_display! {
    JobStatus {
        Missing => "missing",
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Canceled => "canceled",
        Error => "error",
        Purged => "purged",
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Canceled | JobStatus::Error | JobStatus::Purged
        )
    }

    /// Pending or running — a run is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// Progress of a parallel run, reported frame by frame by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelStatus {
    pub frame_count: u32,
    pub percent_complete: f64,
    pub elapsed_secs: u64,
}

/// Prior terminal state kept for audit, trimmed of volatile fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub serial: u64,
    pub hash: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_ms: u64,
    pub finished_ms: u64,
}

/// Durable record for one compute job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeJobRecord {
    pub identity: JobIdentity,
    pub status: JobStatus,
    /// Monotonic run counter; bumped each time a new run starts
    pub serial: u64,
    /// Content fingerprint of the current run's input parameters
    pub hash: String,
    pub is_parallel: bool,
    pub run_mode: RunMode,
    /// Poll cadence hint handed back to the front end
    pub next_request_seconds: u32,
    /// Directory the run executes in; reclaimed by the purge sweep
    #[serde(default)]
    pub run_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_status: Option<ParallelStatus>,
    #[serde(default)]
    pub history: Vec<HistorySnapshot>,
    /// User-visible error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Internal diagnostic, logged but never sent to callers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Serial of the run a caller canceled; terminal writes for that serial
    /// are dropped so cancel always wins over a late fault or completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled_serial: Option<u64>,
    /// Premium callers are exempt from the purge sweep
    #[serde(default)]
    pub premium: bool,
    #[serde(default)]
    pub started_ms: u64,
    #[serde(default)]
    pub last_update_ms: u64,
}

impl ComputeJobRecord {
    pub fn new(identity: JobIdentity) -> Self {
        Self {
            identity,
            status: JobStatus::Missing,
            serial: 0,
            hash: String::new(),
            is_parallel: false,
            run_mode: RunMode::Sequential,
            next_request_seconds: 1,
            run_dir: PathBuf::new(),
            parallel_status: None,
            history: Vec::new(),
            error: None,
            internal_error: None,
            alert: None,
            status_message: None,
            canceled_serial: None,
            premium: false,
            started_ms: 0,
            last_update_ms: 0,
        }
    }

    /// Does a caller-supplied (hash, serial) still refer to the current run?
    ///
    /// A `None` serial checks the hash only — used by the first poll after
    /// submit, before the caller has seen a serial echo.
    pub fn matches(&self, hash: &str, serial: Option<u64>) -> bool {
        self.hash == hash && serial.map_or(true, |s| s == self.serial)
    }

    /// Start a new run: snapshot the previous terminal state into history,
    /// bump the serial, and reset all per-run fields. Returns the new serial.
    pub fn begin_run(&mut self, desc: &RunDescriptor, now_ms: u64) -> u64 {
        if self.serial > 0 && self.status.is_terminal() {
            self.history.push(HistorySnapshot {
                serial: self.serial,
                hash: std::mem::take(&mut self.hash),
                status: self.status,
                error: self.error.take(),
                started_ms: self.started_ms,
                finished_ms: self.last_update_ms,
            });
        }
        self.serial += 1;
        self.status = JobStatus::Pending;
        self.hash = desc.hash.clone();
        self.is_parallel = desc.is_parallel;
        self.run_mode = desc.run_mode;
        self.next_request_seconds = desc.run_mode.next_request_seconds();
        self.run_dir = desc.run_dir.clone();
        self.premium = desc.premium;
        self.parallel_status = None;
        self.error = None;
        self.internal_error = None;
        self.alert = None;
        self.status_message = None;
        self.canceled_serial = None;
        self.started_ms = now_ms;
        self.last_update_ms = now_ms;
        self.serial
    }

    /// Agent acknowledged the command started. No-op for a stale serial or
    /// an already-terminal record.
    pub fn note_running(&mut self, serial: u64, now_ms: u64) -> bool {
        if serial != self.serial || self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Running;
        self.last_update_ms = now_ms;
        true
    }

    /// Inbound progress for the current run.
    pub fn note_progress(
        &mut self,
        serial: u64,
        parallel: Option<ParallelStatus>,
        message: Option<String>,
        now_ms: u64,
    ) -> bool {
        if serial != self.serial || self.status.is_terminal() {
            return false;
        }
        if parallel.is_some() {
            self.parallel_status = parallel;
        }
        if message.is_some() {
            self.status_message = message;
        }
        self.last_update_ms = now_ms;
        true
    }

    /// Mark the current run canceled. Sets the who-canceled marker so a
    /// late terminal for the same serial cannot overwrite the cancel.
    pub fn mark_canceled(&mut self, now_ms: u64) {
        self.canceled_serial = Some(self.serial);
        self.status = JobStatus::Canceled;
        self.last_update_ms = now_ms;
    }

    /// Terminal transition for run `serial`. Returns false (record
    /// untouched) when the write is stale or the run was canceled.
    pub fn finish_run(
        &mut self,
        serial: u64,
        status: JobStatus,
        error: Option<String>,
        internal_error: Option<String>,
        now_ms: u64,
    ) -> bool {
        if serial != self.serial {
            return false;
        }
        if self.canceled_serial == Some(serial) {
            return false;
        }
        self.status = status;
        self.error = error;
        self.internal_error = internal_error;
        self.last_update_ms = now_ms;
        true
    }

    /// Rewrite a terminal record after its run directory was reclaimed.
    pub fn purge(&mut self, now_ms: u64) {
        self.status = JobStatus::Purged;
        self.parallel_status = None;
        self.error = None;
        self.internal_error = None;
        self.alert = None;
        self.status_message = None;
        self.last_update_ms = now_ms;
    }
}

crate::builder! {
    pub struct RecordBuilder => ComputeJobRecord {
        into {
            hash: String = "h1",
            run_dir: PathBuf = PathBuf::new(),
        }
        set {
            identity: JobIdentity = JobIdentity::new("usr1", "srw", "sim1", "model"),
            status: JobStatus = JobStatus::Missing,
            serial: u64 = 0,
            is_parallel: bool = false,
            run_mode: RunMode = RunMode::Sequential,
            next_request_seconds: u32 = 1,
            history: Vec<HistorySnapshot> = Vec::new(),
            premium: bool = false,
            started_ms: u64 = 0,
            last_update_ms: u64 = 0,
        }
        option {
            parallel_status: ParallelStatus = None,
            error: String = None,
            internal_error: String = None,
            alert: String = None,
            status_message: String = None,
            canceled_serial: u64 = None,
        }
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
