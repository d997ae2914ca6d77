// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use lr_core::{ComputeJobRecord, FakeClock, JobIdentity, RunDescriptor};
use std::path::Path;

struct Fixture {
    sweep: PurgeSweep<FakeClock>,
    store: RecordStore,
    clock: FakeClock,
    tmp: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = SupervisorConfig::default();
    cfg.state_dir = tmp.path().to_path_buf();
    cfg.purge_retention_secs = 100;
    let cfg = Arc::new(cfg);
    let store = RecordStore::new(cfg.records_dir()).unwrap();
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_000_000);
    Fixture {
        sweep: PurgeSweep::new(cfg, store.clone(), clock.clone()),
        store,
        clock,
        tmp,
    }
}

fn terminal_record(
    fixture: &Fixture,
    uid: &str,
    status: JobStatus,
    premium: bool,
    run_dir: &Path,
) -> ComputeJobRecord {
    let identity = JobIdentity::new(uid, "srw", "sim1", "model");
    let mut record = ComputeJobRecord::new(identity);
    let desc = RunDescriptor::builder(uid, "srw", "sim1", "model")
        .hash("h1")
        .run_dir(run_dir)
        .premium(premium)
        .build();
    record.begin_run(&desc, fixture.clock.epoch_ms());
    record.finish_run(1, status, None, None, fixture.clock.epoch_ms());
    fixture.store.save(&record).unwrap();
    record
}

#[test]
fn purges_expired_terminal_records_and_run_dirs() {
    let fixture = fixture();
    let run_dir = fixture.tmp.path().join("run1");
    std::fs::create_dir_all(&run_dir).unwrap();
    std::fs::write(run_dir.join("out.dat"), b"data").unwrap();
    let record = terminal_record(&fixture, "usr1", JobStatus::Completed, false, &run_dir);

    // Inside retention: untouched
    assert_eq!(fixture.sweep.run_once(), 0);

    fixture.clock.set_epoch_ms(fixture.clock.epoch_ms() + 101_000);
    assert_eq!(fixture.sweep.run_once(), 1);

    assert!(!run_dir.exists());
    let purged = fixture.store.load(&record.identity).unwrap().unwrap();
    assert_eq!(purged.status, JobStatus::Purged);
    assert!(purged.error.is_none());
}

#[test]
fn premium_records_are_exempt() {
    let fixture = fixture();
    let run_dir = fixture.tmp.path().join("run-premium");
    std::fs::create_dir_all(&run_dir).unwrap();
    let record = terminal_record(&fixture, "usr2", JobStatus::Completed, true, &run_dir);

    fixture.clock.set_epoch_ms(fixture.clock.epoch_ms() + 500_000);
    assert_eq!(fixture.sweep.run_once(), 0);
    assert!(run_dir.exists());
    let untouched = fixture.store.load(&record.identity).unwrap().unwrap();
    assert_eq!(untouched.status, JobStatus::Completed);
}

#[test]
fn active_records_are_never_purged() {
    let fixture = fixture();
    let identity = JobIdentity::new("usr3", "srw", "sim1", "model");
    let mut record = ComputeJobRecord::new(identity);
    let desc = RunDescriptor::builder("usr3", "srw", "sim1", "model")
        .hash("h1")
        .build();
    record.begin_run(&desc, fixture.clock.epoch_ms());
    fixture.store.save(&record).unwrap();

    fixture.clock.set_epoch_ms(fixture.clock.epoch_ms() + 500_000);
    assert_eq!(fixture.sweep.run_once(), 0);
}

#[test]
fn purged_cache_skips_repeat_work() {
    let fixture = fixture();
    let run_dir = fixture.tmp.path().join("run4");
    std::fs::create_dir_all(&run_dir).unwrap();
    terminal_record(&fixture, "usr4", JobStatus::Error, false, &run_dir);

    fixture.clock.set_epoch_ms(fixture.clock.epoch_ms() + 200_000);
    assert_eq!(fixture.sweep.run_once(), 1);
    // The record is purged on disk AND cached, so the next sweep is a no-op
    assert_eq!(fixture.sweep.run_once(), 0);
}
