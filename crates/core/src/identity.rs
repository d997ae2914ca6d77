// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job identity and runtime IDs.
//!
//! A [`JobIdentity`] names "this user's this compute model of this
//! simulation". It is the lookup key for in-memory job state and, through
//! its digest, the durable-record filename. Agent and op IDs are random
//! prefixed IDs in the [`crate::define_id!`] format.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

crate::define_id! {
    /// Unique identifier for one agent process.
    ///
    /// Assigned by the driver at spawn time and passed to the agent on its
    /// command line; the agent echoes it in its liveness announcement so the
    /// supervisor can associate the inbound connection.
    pub struct AgentId("agt-");
}

crate::define_id! {
    /// Unique identifier for one outstanding request/response unit.
    ///
    /// Reply frames from an agent carry the op ID so the connection read
    /// loop can route them to the waiting op's channel.
    pub struct OpId("op-");
}

/// Deterministic key identifying one user's compute job.
///
/// Stable across retries: the same (uid, simulation type, simulation id,
/// compute model) always maps to the same identity, so a re-submitted run
/// finds the existing record rather than creating a parallel one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentity {
    pub uid: String,
    pub sim_type: String,
    pub sim_id: String,
    pub compute_model: String,
}

impl JobIdentity {
    pub fn new(
        uid: impl Into<String>,
        sim_type: impl Into<String>,
        sim_id: impl Into<String>,
        compute_model: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            sim_type: sim_type.into(),
            sim_id: sim_id.into(),
            compute_model: compute_model.into(),
        }
    }

    /// Canonical human-readable form, used in logs and admin listings.
    pub fn canonical(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.uid, self.sim_type, self.sim_id, self.compute_model
        )
    }

    /// Hex sha256 of the canonical form. Filesystem-safe regardless of what
    /// the collaborator put in the component fields; used as the durable
    /// record filename.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        let out = hasher.finalize();
        out.iter().fold(String::with_capacity(64), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
    }
}

impl std::fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
