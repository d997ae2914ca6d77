// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::drivers::FakeDriver;
use lr_core::{FakeClock, JobStatus, RunDescriptor};
use std::time::Duration;

fn registry(tmp: &tempfile::TempDir, clock: FakeClock) -> JobRegistry<FakeClock> {
    let mut cfg = SupervisorConfig::default();
    cfg.state_dir = tmp.path().to_path_buf();
    cfg.idle_evict_secs = 60;
    let cfg = Arc::new(cfg);
    let links = AgentLinks::new();
    let driver = FakeDriver::new(links.clone());
    let drivers = DriverSet::new(driver, None);
    let store = RecordStore::new(cfg.records_dir()).unwrap();
    JobRegistry::new(cfg, store, drivers, links, clock)
}

fn identity() -> JobIdentity {
    JobIdentity::new("usr1", "madx", "sim1", "twissReport")
}

#[tokio::test]
async fn resolve_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = registry(&tmp, FakeClock::new());

    let first = registry.resolve(&identity()).unwrap();
    let second = registry.resolve(&identity()).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.resident_count(), 1);
}

#[tokio::test]
async fn resolve_loads_the_durable_record() {
    let tmp = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let registry = registry(&tmp, clock.clone());

    // Seed a completed record on disk
    let mut record = ComputeJobRecord::new(identity());
    let desc = RunDescriptor::builder("usr1", "madx", "sim1", "twissReport")
        .hash("h1")
        .build();
    record.begin_run(&desc, 1_000);
    record.finish_run(1, JobStatus::Completed, None, None, 2_000);
    registry.store().save(&record).unwrap();

    let job = registry.resolve(&identity()).unwrap();
    let loaded = job.snapshot().await;
    assert_eq!(loaded.status, JobStatus::Completed);
    assert_eq!(loaded.serial, 1);
}

#[tokio::test]
async fn interrupted_run_resolves_to_error_on_reload() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = registry(&tmp, FakeClock::new());

    // A record left active by a crashed supervisor
    let mut record = ComputeJobRecord::new(identity());
    let desc = RunDescriptor::builder("usr1", "madx", "sim1", "twissReport")
        .hash("h1")
        .build();
    record.begin_run(&desc, 1_000);
    record.note_running(1, 1_100);
    registry.store().save(&record).unwrap();

    let job = registry.resolve(&identity()).unwrap();
    let loaded = job.snapshot().await;
    assert_eq!(loaded.status, JobStatus::Error);
    assert_eq!(
        loaded.error.as_deref(),
        Some("run interrupted by a supervisor restart")
    );
    // Durable too, not just in memory
    let on_disk = registry.store().load(&identity()).unwrap().unwrap();
    assert_eq!(on_disk.status, JobStatus::Error);
}

#[tokio::test]
async fn unknown_identity_starts_missing() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = registry(&tmp, FakeClock::new());
    let job = registry.resolve(&identity()).unwrap();
    assert_eq!(job.snapshot().await.status, JobStatus::Missing);
}

#[tokio::test]
async fn idle_jobs_are_evicted_after_the_window() {
    let tmp = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let registry = registry(&tmp, clock.clone());

    registry.resolve(&identity()).unwrap();
    assert_eq!(registry.resident_count(), 1);

    // Not yet idle long enough
    assert_eq!(registry.evict_idle(), 0);

    clock.advance(Duration::from_secs(120));
    assert_eq!(registry.evict_idle(), 1);
    assert_eq!(registry.resident_count(), 0);
}
