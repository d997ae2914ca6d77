// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::specs::support::*;
use lr_core::{JobStatus, RunMode};
use lr_wire::{ApiRequest, Reply};

#[tokio::test]
async fn submit_poll_complete() {
    let fixture = fixture();

    // Before any run, the job is missing
    let state = poll(&fixture, "h1", None).await;
    assert_eq!(state.status, JobStatus::Missing);

    // Submit: the reply is the pending envelope with a poll hint
    let reply = fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Parallel),
            force: false,
        })
        .await;
    let submitted = state_of(&reply).clone();
    assert_eq!(submitted.status, JobStatus::Pending);
    assert_eq!(submitted.serial, 1);
    assert_eq!(submitted.next_request_seconds, Some(2));

    // On command exit 0 the record lands completed
    let done = poll_until(&fixture, "h1", JobStatus::Completed).await;
    assert_eq!(done.serial, 1);
    assert!(done.error.is_none());
    assert_eq!(done.next_request_seconds, None);

    // And the durable record agrees after reload
    let identity = descriptor("h1", RunMode::Parallel).identity();
    let record = fixture.store.load(&identity).unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.hash, "h1");
    assert_eq!(record.serial, 1);
}

#[tokio::test]
async fn running_state_is_observable_for_parallel_runs() {
    let fixture = fixture();
    fixture
        .driver
        .push_outcome(lr_supervisor::FakeOutcome::Progress { frames: 20 });

    fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Parallel),
            force: false,
        })
        .await;

    let running = poll_until(&fixture, "h1", JobStatus::Running).await;
    assert_eq!(running.next_request_seconds, Some(2));

    let done = poll_until(&fixture, "h1", JobStatus::Completed).await;
    let parallel = done.parallel_status.expect("frame progress recorded");
    assert_eq!(parallel.frame_count, 20);
    assert!((parallel.percent_complete - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn duplicate_submit_does_not_start_a_second_op() {
    let fixture = fixture();
    fixture
        .driver
        .push_outcome(lr_supervisor::FakeOutcome::Progress { frames: 50 });

    let first = fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Parallel),
            force: false,
        })
        .await;
    poll_until(&fixture, "h1", JobStatus::Running).await;

    // Same hash, no force: the second submit attaches to the live run
    let second = fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Parallel),
            force: false,
        })
        .await;

    assert_eq!(state_of(&first).serial, 1);
    assert_eq!(state_of(&second).serial, 1);
    assert!(state_of(&second).status.is_active());
    assert_eq!(fixture.driver.run_ops(), 1);
}

#[tokio::test]
async fn completed_run_is_idempotent_without_force() {
    let fixture = fixture();
    fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Sequential),
            force: false,
        })
        .await;
    poll_until(&fixture, "h1", JobStatus::Completed).await;

    let reply = fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Sequential),
            force: false,
        })
        .await;
    assert_eq!(state_of(&reply).status, JobStatus::Completed);
    assert_eq!(fixture.driver.run_ops(), 1);
}

#[tokio::test]
async fn stale_serial_poll_returns_missing() {
    let fixture = fixture();
    fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Sequential),
            force: false,
        })
        .await;
    poll_until(&fixture, "h1", JobStatus::Completed).await;

    // Force a second run: serial moves to 2
    fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Sequential),
            force: true,
        })
        .await;
    poll_until(&fixture, "h1", JobStatus::Completed).await;

    // A poll still carrying serial 1 gets the fresh-start signal
    let state = poll(&fixture, "h1", Some(1)).await;
    assert_eq!(state.status, JobStatus::Missing);
    let state = poll(&fixture, "h1", Some(2)).await;
    assert_eq!(state.status, JobStatus::Completed);
}

#[tokio::test]
async fn analysis_runs_against_completed_output() {
    let fixture = fixture();
    fixture
        .supervisor
        .receive(ApiRequest::Run {
            descriptor: descriptor("h1", RunMode::Sequential),
            force: false,
        })
        .await;
    poll_until(&fixture, "h1", JobStatus::Completed).await;

    fixture
        .driver
        .set_analysis_data(serde_json::json!({ "summary": { "flux": 3.5e14 } }));
    let reply = fixture
        .supervisor
        .receive(ApiRequest::Analysis {
            job: job_ref("h1", None),
            kind: lr_wire::AnalysisKind::StatelessCompute,
            command: vec!["srw_report".into()],
            frame_index: None,
            filename: None,
        })
        .await;
    let Reply::Data { data } = reply else {
        panic!("expected analysis data, got {reply:?}");
    };
    assert_eq!(data["summary"]["flux"], 3.5e14);
}
