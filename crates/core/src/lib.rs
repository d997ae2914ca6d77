// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lr-core: core types for the longrun job supervisor.
//!
//! Everything here is synchronous data plumbing — identities, durable
//! record types, the slot semaphore, and the clock abstraction. Async
//! orchestration lives in `lr-supervisor`.

pub mod macros;

pub mod clock;
pub mod descriptor;
pub mod identity;
pub mod record;
pub mod slot;

pub use clock::{Clock, FakeClock, SystemClock};
pub use descriptor::{ResourceKind, RunDescriptor, RunDescriptorBuilder, RunMode};
pub use identity::{AgentId, JobIdentity, OpId};
#[cfg(any(test, feature = "test-support"))]
pub use record::RecordBuilder;
pub use record::{ComputeJobRecord, HistorySnapshot, JobStatus, ParallelStatus};
pub use slot::{Slot, SlotError, SlotQueue};
