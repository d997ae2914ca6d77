// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run descriptor supplied by the simulation-template collaborator.
//!
//! The descriptor arrives fully resolved: the supervisor never generates or
//! parses simulation input files, it only carries the command and run
//! directory through to an agent.

use crate::identity::JobIdentity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a run executes on its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Single-core run on a local or container backend
    Sequential,
    /// Multi-core run reporting frame-by-frame progress
    Parallel,
    /// Run submitted to a remote batch scheduler
    Sbatch,
}

crate::simple_display! {
    RunMode {
        Sequential => "sequential",
        Parallel => "parallel",
        Sbatch => "sbatch",
    }
}

impl RunMode {
    /// Resource class this mode draws slots from.
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            RunMode::Sequential => ResourceKind::Sequential,
            RunMode::Parallel | RunMode::Sbatch => ResourceKind::Parallel,
        }
    }

    /// Poll cadence hint returned to the front end while a run is active.
    pub fn next_request_seconds(&self) -> u32 {
        match self {
            RunMode::Sequential => 1,
            RunMode::Parallel | RunMode::Sbatch => 2,
        }
    }
}

/// A unit of bounded concurrency capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Sequential,
    Parallel,
}

crate::simple_display! {
    ResourceKind {
        Sequential => "sequential",
        Parallel => "parallel",
    }
}

/// Fully-resolved description of one compute run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub uid: String,
    pub sim_type: String,
    pub sim_id: String,
    pub compute_model: String,
    /// Content fingerprint of the job's input parameters
    pub hash: String,
    pub is_parallel: bool,
    pub run_mode: RunMode,
    /// Directory the job command executes in; also where output lands
    pub run_dir: PathBuf,
    /// Argv of the job command, executed verbatim by the agent
    pub command: Vec<String>,
    /// Premium callers get longer run-time budgets and purge exemption
    #[serde(default)]
    pub premium: bool,
}

impl RunDescriptor {
    pub fn builder(
        uid: impl Into<String>,
        sim_type: impl Into<String>,
        sim_id: impl Into<String>,
        compute_model: impl Into<String>,
    ) -> RunDescriptorBuilder {
        RunDescriptorBuilder {
            uid: uid.into(),
            sim_type: sim_type.into(),
            sim_id: sim_id.into(),
            compute_model: compute_model.into(),
            hash: String::new(),
            is_parallel: false,
            run_mode: RunMode::Sequential,
            run_dir: PathBuf::new(),
            command: Vec::new(),
            premium: false,
        }
    }

    /// Identity of the compute job this descriptor belongs to.
    pub fn identity(&self) -> JobIdentity {
        JobIdentity::new(
            self.uid.clone(),
            self.sim_type.clone(),
            self.sim_id.clone(),
            self.compute_model.clone(),
        )
    }

    pub fn resource_kind(&self) -> ResourceKind {
        self.run_mode.resource_kind()
    }
}

pub struct RunDescriptorBuilder {
    uid: String,
    sim_type: String,
    sim_id: String,
    compute_model: String,
    hash: String,
    is_parallel: bool,
    run_mode: RunMode,
    run_dir: PathBuf,
    command: Vec<String>,
    premium: bool,
}

impl RunDescriptorBuilder {
    crate::setters! {
        into {
            hash: String,
            run_dir: PathBuf,
        }
        set {
            is_parallel: bool,
            run_mode: RunMode,
            command: Vec<String>,
            premium: bool,
        }
    }

    pub fn build(self) -> RunDescriptor {
        let is_parallel = self.is_parallel || self.run_mode != RunMode::Sequential;
        RunDescriptor {
            uid: self.uid,
            sim_type: self.sim_type,
            sim_id: self.sim_id,
            compute_model: self.compute_model,
            hash: self.hash,
            is_parallel,
            run_mode: self.run_mode,
            run_dir: self.run_dir,
            command: self.command,
            premium: self.premium,
        }
    }
}

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod tests;
