// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replies returned to the front end.

use lr_core::{ComputeJobRecord, JobStatus, ParallelStatus};
use serde::{Deserialize, Serialize};

/// Caller-visible error categories.
///
/// Everything else — internal faults, lost agents, invariant violations —
/// is logged with full context and surfaced as [`ErrorKind::ServerError`]
/// with a generic message, never with internal detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    Forbidden,
    LoginRequired,
    ServerError,
}

lr_core::simple_display! {
    ErrorKind {
        BadRequest => "bad_request",
        Forbidden => "forbidden",
        LoginRequired => "login_required",
        ServerError => "server_error",
    }
}

/// Caller-visible view of a compute job record.
///
/// The hash and serial are the echo token: the front end sends them back
/// verbatim on its next poll so the supervisor can detect staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    pub serial: u64,
    pub hash: String,
    /// Present while a run is active: poll again after this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_request_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_status: Option<ParallelStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl JobState {
    /// Project the durable record into its caller-visible form.
    ///
    /// Internal diagnostics stay behind: only the user-facing `error` text
    /// crosses this boundary.
    pub fn from_record(record: &ComputeJobRecord) -> Self {
        Self {
            status: record.status,
            serial: record.serial,
            hash: record.hash.clone(),
            next_request_seconds: record
                .status
                .is_active()
                .then_some(record.next_request_seconds),
            parallel_status: record.parallel_status.clone(),
            error: record.error.clone(),
            alert: record.alert.clone(),
            status_message: record.status_message.clone(),
        }
    }

    /// The fresh-start signal for stale polls and unknown jobs.
    pub fn missing() -> Self {
        Self {
            status: JobStatus::Missing,
            serial: 0,
            hash: String::new(),
            next_request_seconds: None,
            parallel_status: None,
            error: None,
            alert: None,
            status_message: None,
        }
    }
}

/// One row of the operator running-jobs listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningJobEntry {
    pub uid: String,
    /// Display name joined from the auth collaborator, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub sim_type: String,
    pub sim_id: String,
    pub compute_model: String,
    pub status: JobStatus,
    pub is_parallel: bool,
    pub started_ms: u64,
    pub last_update_ms: u64,
}

/// One reply to the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Reply {
    /// Generic success (ping, begin-session)
    Ok,

    /// Job state, for run/poll/cancel. While the run is active the state
    /// carries `next_request_seconds` — the "poll again" envelope.
    State { state: JobState },

    /// Analysis result payload, passed through from the agent verbatim
    Data { data: serde_json::Value },

    /// Operator running-jobs listing
    RunningJobs { jobs: Vec<RunningJobEntry> },

    /// Typed caller-visible error
    Error { kind: ErrorKind, message: String },
}

impl Reply {
    pub fn state(record: &ComputeJobRecord) -> Self {
        Reply::State {
            state: JobState::from_record(record),
        }
    }

    pub fn missing() -> Self {
        Reply::State {
            state: JobState::missing(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Reply::Error {
            kind: ErrorKind::BadRequest,
            message: message.into(),
        }
    }

    pub fn login_required() -> Self {
        Reply::Error {
            kind: ErrorKind::LoginRequired,
            message: "please log in".into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Reply::Error {
            kind: ErrorKind::Forbidden,
            message: message.into(),
        }
    }

    /// Generic internal-fault reply. The diagnostic goes to the log at the
    /// failure site, not to the caller.
    pub fn server_error() -> Self {
        Reply::Error {
            kind: ErrorKind::ServerError,
            message: "server error".into(),
        }
    }
}
