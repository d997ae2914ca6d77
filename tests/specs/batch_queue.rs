// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::specs::support::*;
use lr_core::{JobStatus, RunMode};
use lr_supervisor::DriverError;
use lr_wire::ApiRequest;

#[tokio::test]
async fn batch_job_stuck_pending_surfaces_as_error() {
    let fixture = fixture();
    // The sbatch driver gave up after the external queue never left PENDING
    fixture
        .driver
        .fail_next_assign(DriverError::PendingCeiling);

    fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Sbatch),
            force: false,
        })
        .await;

    // The record converges to error — never left running forever
    let state = poll_until(&fixture, "h1", JobStatus::Error).await;
    assert!(state.error.is_some());

    let identity = descriptor("h1", RunMode::Sbatch).identity();
    let record = fixture.store.load(&identity).unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert!(record
        .internal_error
        .as_deref()
        .unwrap_or_default()
        .contains("pending"));
}

#[tokio::test]
async fn unexpected_queue_state_fails_the_run() {
    let fixture = fixture();
    fixture
        .driver
        .fail_next_assign(DriverError::QueueState("NODE_FAIL".into()));

    fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h2", RunMode::Sbatch),
            force: false,
        })
        .await;

    let state = poll_until(&fixture, "h2", JobStatus::Error).await;
    // Internal queue detail never leaks into the user-visible error
    assert!(!state.error.clone().unwrap_or_default().contains("NODE_FAIL"));
}
