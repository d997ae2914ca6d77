// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent link protocol.
//!
//! One persistent WebSocket per agent. The agent's first frame must be
//! `alive` (the liveness announcement carrying its assigned id); only then
//! does the supervisor dispatch operations to it. Every later frame in
//! either direction carries an op id for correlation.

use lr_core::{AgentId, OpId, ParallelStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Operation messages sent supervisor → agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorToAgent {
    /// Execute the job command in the run directory. The agent must send
    /// [`OpReply::Running`] as soon as the child process starts, then a
    /// terminal frame on exit.
    Run {
        op_id: OpId,
        run_dir: PathBuf,
        command: Vec<String>,
    },

    /// Short read-only query against existing output. With `fastpath` set
    /// the request is multiplexed through the agent's long-lived command
    /// subprocess instead of spawning a child per call.
    Analysis {
        op_id: OpId,
        run_dir: PathBuf,
        command: Vec<String>,
        #[serde(default)]
        fastpath: bool,
        /// Request payload written to the fastpath subprocess as one line
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<serde_json::Value>,
    },

    /// Terminate the named in-flight ops. The agent acknowledges with
    /// [`OpReply::Canceled`] on `op_id` without waiting for the children
    /// to finish dying.
    Cancel {
        op_id: OpId,
        targets: Vec<OpId>,
    },
}

impl SupervisorToAgent {
    pub fn op_id(&self) -> &OpId {
        match self {
            SupervisorToAgent::Run { op_id, .. }
            | SupervisorToAgent::Analysis { op_id, .. }
            | SupervisorToAgent::Cancel { op_id, .. } => op_id,
        }
    }
}

/// One frame streamed back for an op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpReply {
    /// The job command process started
    Running,

    /// Non-terminal progress (parallel frame counts, status text)
    Progress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel: Option<ParallelStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Terminal: the job command exited
    Exited {
        exit_code: i32,
        /// The command's own error text, when it reported one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Terminal: analysis result payload
    Data { data: serde_json::Value },

    /// Terminal: cancel acknowledged
    Canceled,

    /// Terminal: the op failed at the agent or driver level
    Error { message: String },
}

impl OpReply {
    /// Terminal replies resolve the op; non-terminal ones keep it open.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpReply::Exited { .. } | OpReply::Data { .. } | OpReply::Canceled | OpReply::Error { .. }
        )
    }
}

/// Frames sent agent → supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentToSupervisor {
    /// Liveness announcement; must be the first frame on a new connection
    Alive { agent_id: AgentId },

    /// Reply frame for one op
    Reply { op_id: OpId, reply: OpReply },
}
