// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Front-end API requests.

use lr_core::{JobIdentity, RunDescriptor};
use serde::{Deserialize, Serialize};

/// Reference to an existing compute job, as echoed back by a caller.
///
/// The hash (and, once known, the serial) guard against a poll or cancel
/// attaching to a run the caller never started: a mismatch is answered with
/// `missing` so the front end starts fresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRef {
    pub uid: String,
    pub sim_type: String,
    pub sim_id: String,
    pub compute_model: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<u64>,
}

impl JobRef {
    pub fn identity(&self) -> JobIdentity {
        JobIdentity::new(
            self.uid.clone(),
            self.sim_type.clone(),
            self.sim_id.clone(),
            self.compute_model.clone(),
        )
    }
}

/// Auxiliary read-only operations against a job's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// One-shot computation with no per-job state
    StatelessCompute,
    /// Computation reading the job's accumulated output
    StatefulCompute,
    /// Extract one animation frame from a parallel run's output
    SimulationFrame,
    /// Stream a named output file back to the caller
    DownloadDataFile,
}

lr_core::simple_display! {
    AnalysisKind {
        StatelessCompute => "stateless_compute",
        StatefulCompute => "stateful_compute",
        SimulationFrame => "simulation_frame",
        DownloadDataFile => "download_data_file",
    }
}

/// One request from the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ApiRequest {
    /// Health check; touches no job state
    Ping,

    /// Session establishment for a caller; touches no job state
    BeginSession { uid: String },

    /// Start (or attach to) a compute run
    Run {
        descriptor: RunDescriptor,
        /// Re-execute even when an identical completed run exists
        #[serde(default)]
        force: bool,
    },

    /// Poll the current run
    RunStatus { job: JobRef },

    /// Cancel the current run
    RunCancel { job: JobRef },

    /// Read-only analysis against the job's output
    Analysis {
        job: JobRef,
        kind: AnalysisKind,
        /// Argv of the analysis command, resolved by the collaborator
        command: Vec<String>,
        /// Frame index for `simulation_frame`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_index: Option<u32>,
        /// Relative output filename for `download_data_file`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    /// Operator query: jobs currently pending or running
    ListRunningJobs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uid: Option<String>,
    },
}

impl ApiRequest {
    /// Identity of the job this request addresses, if it addresses one.
    pub fn job_identity(&self) -> Option<JobIdentity> {
        match self {
            ApiRequest::Run { descriptor, .. } => Some(descriptor.identity()),
            ApiRequest::RunStatus { job }
            | ApiRequest::RunCancel { job }
            | ApiRequest::Analysis { job, .. } => Some(job.identity()),
            ApiRequest::Ping
            | ApiRequest::BeginSession { .. }
            | ApiRequest::ListRunningJobs { .. } => None,
        }
    }
}
