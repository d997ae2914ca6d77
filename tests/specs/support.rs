// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture: a supervisor wired to the scripted fake driver.

use lr_core::{JobStatus, RunDescriptor, RunMode, SystemClock};
use lr_supervisor::{
    build_supervisor, AgentLinks, DriverSet, FakeDriver, NullAuth, RecordStore, Supervisor,
    SupervisorConfig,
};
use lr_wire::{ApiRequest, JobRef, JobState, Reply};
use std::sync::Arc;
use std::time::Duration;

pub struct Fixture {
    pub supervisor: Supervisor<SystemClock>,
    pub driver: Arc<FakeDriver>,
    pub store: RecordStore,
    pub _tmp: tempfile::TempDir,
}

pub fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut cfg = SupervisorConfig::default();
    cfg.state_dir = tmp.path().to_path_buf();
    cfg.cancel_ack_secs = 2;
    let cfg = Arc::new(cfg);

    let links = AgentLinks::new();
    let driver = FakeDriver::new(links.clone());
    let drivers = DriverSet::new(driver.clone(), Some(driver.clone()));
    let store = RecordStore::new(cfg.records_dir()).expect("record store");
    let supervisor = build_supervisor(
        cfg,
        store.clone(),
        drivers,
        links,
        SystemClock,
        Arc::new(NullAuth),
    );
    Fixture {
        supervisor,
        driver,
        store,
        _tmp: tmp,
    }
}

pub fn descriptor(hash: &str, mode: RunMode) -> RunDescriptor {
    RunDescriptor::builder("usr1", "srw", "sim1", "fluxAnimation")
        .hash(hash)
        .run_mode(mode)
        .run_dir("/tmp/lr-spec-run")
        .command(vec!["srw_run".into(), "in.json".into()])
        .build()
}

pub fn job_ref(hash: &str, serial: Option<u64>) -> JobRef {
    JobRef {
        uid: "usr1".into(),
        sim_type: "srw".into(),
        sim_id: "sim1".into(),
        compute_model: "fluxAnimation".into(),
        hash: hash.into(),
        serial,
    }
}

pub fn state_of(reply: &Reply) -> &JobState {
    match reply {
        Reply::State { state } => state,
        other => panic!("expected a state reply, got {other:?}"),
    }
}

pub async fn poll(fixture: &Fixture, hash: &str, serial: Option<u64>) -> JobState {
    let reply = fixture
        .supervisor
        .receive(ApiRequest::RunStatus {
            job: job_ref(hash, serial),
        })
        .await;
    state_of(&reply).clone()
}

/// Poll until the job reaches `status`, honoring the reply's poll hints.
pub async fn poll_until(fixture: &Fixture, hash: &str, status: JobStatus) -> JobState {
    for _ in 0..500 {
        let state = poll(fixture, hash, None).await;
        if state.status == status {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job never reached {status}");
}
