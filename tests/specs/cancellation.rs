// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::specs::support::*;
use lr_core::{JobStatus, RunMode};
use lr_wire::{ApiRequest, SupervisorToAgent};
use std::time::{Duration, Instant};

#[tokio::test]
async fn cancel_before_completion_lands_canceled() {
    let fixture = fixture();
    fixture
        .driver
        .push_outcome(lr_supervisor::FakeOutcome::Hang);

    fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Sequential),
            force: false,
        })
        .await;
    poll_until(&fixture, "h1", JobStatus::Running).await;

    // Cancel resolves within its own timeout, not the run's
    let started = Instant::now();
    let reply = fixture
        .supervisor
        .receive(ApiRequest::RunCancel {
            job: job_ref("h1", Some(1)),
        })
        .await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(state_of(&reply).status, JobStatus::Canceled);

    // A subsequent poll with the same hash/serial reads canceled
    let state = poll(&fixture, "h1", Some(1)).await;
    assert_eq!(state.status, JobStatus::Canceled);

    // The driver was asked to kill the op
    assert!(fixture
        .driver
        .sent()
        .iter()
        .any(|m| matches!(m, SupervisorToAgent::Cancel { .. })));
}

#[tokio::test]
async fn canceled_status_survives_a_late_completion() {
    let fixture = fixture();
    fixture
        .driver
        .push_outcome(lr_supervisor::FakeOutcome::Hang);

    fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Parallel),
            force: false,
        })
        .await;
    poll_until(&fixture, "h1", JobStatus::Running).await;
    fixture
        .supervisor
        .receive(ApiRequest::RunCancel {
            job: job_ref("h1", Some(1)),
        })
        .await;

    // Give any straggling terminal reply time to race the cancel
    tokio::time::sleep(Duration::from_millis(100)).await;
    let state = poll(&fixture, "h1", Some(1)).await;
    assert_eq!(state.status, JobStatus::Canceled);

    let identity = descriptor("h1", RunMode::Parallel).identity();
    let record = fixture.store.load(&identity).unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Canceled);
    assert_eq!(record.canceled_serial, Some(1));
}

#[tokio::test]
async fn cancel_then_resubmit_starts_a_fresh_run() {
    let fixture = fixture();
    fixture
        .driver
        .push_outcome(lr_supervisor::FakeOutcome::Hang);

    fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Sequential),
            force: false,
        })
        .await;
    poll_until(&fixture, "h1", JobStatus::Running).await;
    fixture
        .supervisor
        .receive(ApiRequest::RunCancel {
            job: job_ref("h1", Some(1)),
        })
        .await;

    // Same hash resubmitted after cancel: a new run, serial 2
    let reply = fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Sequential),
            force: false,
        })
        .await;
    assert_eq!(state_of(&reply).serial, 2);
    let done = poll_until(&fixture, "h1", JobStatus::Completed).await;
    assert_eq!(done.serial, 2);
}
