// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for the longrun supervisor.
//!
//! Two surfaces share this crate:
//! - the front-end API ([`ApiRequest`] / [`Reply`]), request/reply records
//!   routed by a tagged enum instead of string-dispatched method names
//! - the agent link ([`SupervisorToAgent`] / [`AgentToSupervisor`]), JSON
//!   frames over one persistent WebSocket per agent, correlated by op id
//!
//! Both surfaces are line-oriented JSON; [`encode`] / [`decode`] are the
//! only (de)serialization entry points so framing stays in one place.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod agent;
mod api;
mod reply;

pub use agent::{AgentToSupervisor, OpReply, SupervisorToAgent};
pub use api::{AnalysisKind, ApiRequest, JobRef};
pub use reply::{ErrorKind, JobState, Reply, RunningJobEntry};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors from message encode/decode.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a message to its single-frame JSON form.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

/// Parse a single JSON frame.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
