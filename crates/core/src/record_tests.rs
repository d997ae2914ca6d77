// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;
use yare::parameterized;

fn descriptor(hash: &str) -> RunDescriptor {
    RunDescriptor::builder("usr1", "srw", "sim1", "model")
        .hash(hash)
        .run_dir("/tmp/run")
        .command(vec!["srw_run".into()])
        .build()
}

#[parameterized(
    missing = { JobStatus::Missing, false, false },
    pending = { JobStatus::Pending, false, true },
    running = { JobStatus::Running, false, true },
    completed = { JobStatus::Completed, true, false },
    canceled = { JobStatus::Canceled, true, false },
    error = { JobStatus::Error, true, false },
    purged = { JobStatus::Purged, true, false },
)]
fn status_classification(status: JobStatus, terminal: bool, active: bool) {
    assert_eq!(status.is_terminal(), terminal);
    assert_eq!(status.is_active(), active);
}

#[test]
fn new_record_is_missing() {
    let record = ComputeJobRecord::new(JobIdentity::new("u", "t", "s", "m"));
    assert_eq!(record.status, JobStatus::Missing);
    assert_eq!(record.serial, 0);
    assert!(record.history.is_empty());
}

#[test]
fn begin_run_bumps_serial_and_resets() {
    let mut record = ComputeJobRecord::new(JobIdentity::new("u", "t", "s", "m"));
    record.error = Some("old".into());

    let serial = record.begin_run(&descriptor("h1"), 1_000);

    assert_eq!(serial, 1);
    assert_eq!(record.status, JobStatus::Pending);
    assert_eq!(record.hash, "h1");
    assert!(record.error.is_none());
    assert!(record.canceled_serial.is_none());
    assert_eq!(record.started_ms, 1_000);
}

#[test]
fn begin_run_snapshots_prior_terminal() {
    let mut record = ComputeJobRecord::new(JobIdentity::new("u", "t", "s", "m"));
    record.begin_run(&descriptor("h1"), 1_000);
    assert!(record.finish_run(1, JobStatus::Completed, None, None, 2_000));

    record.begin_run(&descriptor("h2"), 3_000);

    assert_eq!(record.serial, 2);
    assert_eq!(record.history.len(), 1);
    let snap = &record.history[0];
    assert_eq!(snap.serial, 1);
    assert_eq!(snap.hash, "h1");
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.finished_ms, 2_000);
}

#[test]
fn begin_run_does_not_snapshot_unstarted_record() {
    let mut record = ComputeJobRecord::new(JobIdentity::new("u", "t", "s", "m"));
    record.begin_run(&descriptor("h1"), 1_000);
    assert!(record.history.is_empty());
}

#[test]
fn matches_checks_hash_and_serial() {
    let mut record = ComputeJobRecord::new(JobIdentity::new("u", "t", "s", "m"));
    record.begin_run(&descriptor("h1"), 1_000);

    assert!(record.matches("h1", None));
    assert!(record.matches("h1", Some(1)));
    assert!(!record.matches("h2", None));
    assert!(!record.matches("h1", Some(0)));
}

#[test]
fn note_running_rejects_stale_serial() {
    let mut record = ComputeJobRecord::new(JobIdentity::new("u", "t", "s", "m"));
    record.begin_run(&descriptor("h1"), 1_000);

    assert!(record.note_running(1, 1_100));
    assert_eq!(record.status, JobStatus::Running);
    assert!(!record.note_running(0, 1_200));
}

#[test]
fn progress_updates_parallel_status() {
    let mut record = ComputeJobRecord::new(JobIdentity::new("u", "t", "s", "m"));
    record.begin_run(&descriptor("h1"), 1_000);
    record.note_running(1, 1_100);

    let parallel = ParallelStatus {
        frame_count: 3,
        percent_complete: 30.0,
        elapsed_secs: 12,
    };
    assert!(record.note_progress(1, Some(parallel.clone()), None, 1_200));
    assert_eq!(record.parallel_status, Some(parallel));
    assert_eq!(record.last_update_ms, 1_200);
}

#[test]
fn cancel_wins_over_late_completion() {
    let mut record = ComputeJobRecord::new(JobIdentity::new("u", "t", "s", "m"));
    record.begin_run(&descriptor("h1"), 1_000);
    record.note_running(1, 1_100);

    record.mark_canceled(1_200);
    assert_eq!(record.status, JobStatus::Canceled);

    // Late terminal replies for the canceled serial are dropped
    assert!(!record.finish_run(1, JobStatus::Completed, None, None, 1_300));
    assert!(!record.finish_run(1, JobStatus::Error, Some("boom".into()), None, 1_300));
    assert_eq!(record.status, JobStatus::Canceled);
}

#[test]
fn finish_run_rejects_stale_serial() {
    let mut record = ComputeJobRecord::new(JobIdentity::new("u", "t", "s", "m"));
    record.begin_run(&descriptor("h1"), 1_000);
    record.finish_run(1, JobStatus::Completed, None, None, 2_000);
    record.begin_run(&descriptor("h2"), 3_000);

    // A reply addressed to run 1 arrives after run 2 started
    assert!(!record.finish_run(1, JobStatus::Error, Some("late".into()), None, 3_100));
    assert_eq!(record.status, JobStatus::Pending);
}

#[test]
fn finish_run_keeps_internal_error_separate() {
    let mut record = ComputeJobRecord::new(JobIdentity::new("u", "t", "s", "m"));
    record.begin_run(&descriptor("h1"), 1_000);
    record.finish_run(
        1,
        JobStatus::Error,
        Some("simulation failed".into()),
        Some("agent agt-x lost: connection reset".into()),
        2_000,
    );
    assert_eq!(record.error.as_deref(), Some("simulation failed"));
    assert_eq!(
        record.internal_error.as_deref(),
        Some("agent agt-x lost: connection reset")
    );
}

#[test]
fn purge_rewrites_terminal_record() {
    let mut record = ComputeJobRecord::new(JobIdentity::new("u", "t", "s", "m"));
    record.begin_run(&descriptor("h1"), 1_000);
    record.finish_run(1, JobStatus::Error, Some("boom".into()), None, 2_000);

    record.purge(9_000);

    assert_eq!(record.status, JobStatus::Purged);
    assert!(record.error.is_none());
    assert_eq!(record.hash, "h1");
    assert_eq!(record.serial, 1);
}

proptest! {
    // Disk round-trip: status, hash, and serial survive serialization.
    #[test]
    fn record_round_trips_through_json(
        serial in 0u64..10_000,
        hash in "[a-f0-9]{8}",
        status_idx in 0usize..7,
    ) {
        let statuses = [
            JobStatus::Missing,
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Canceled,
            JobStatus::Error,
            JobStatus::Purged,
        ];
        let record = ComputeJobRecord::builder()
            .serial(serial)
            .hash(hash)
            .status(statuses[status_idx])
            .build();

        let json = serde_json::to_string(&record).unwrap();
        let parsed: ComputeJobRecord = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(parsed.status, record.status);
        prop_assert_eq!(parsed.hash, record.hash);
        prop_assert_eq!(parsed.serial, record.serial);
    }

    // Serial strictly increases across successive runs.
    #[test]
    fn serial_strictly_increases(runs in 1usize..20) {
        let mut record = ComputeJobRecord::new(JobIdentity::new("u", "t", "s", "m"));
        let mut last = 0;
        for i in 0..runs {
            let serial = record.begin_run(&descriptor(&format!("h{i}")), i as u64);
            prop_assert!(serial > last);
            last = serial;
            record.finish_run(serial, JobStatus::Completed, None, None, i as u64 + 1);
        }
    }
}
