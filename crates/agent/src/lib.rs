// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lr-agent: the worker process.
//!
//! An agent runs detached from the supervisor — as a local child, inside a
//! container, or on a batch allocation — and holds one persistent WebSocket
//! back to it. It announces liveness, then executes op messages: job
//! commands as child processes, analysis calls through the line-multiplexed
//! fast path, and cancels against in-flight children.

pub mod client;
pub mod fastline;
pub mod process;

pub use client::{run, AgentConfig, AgentError};
pub use fastline::FastLine;
pub use process::OpRunner;
