// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory job registry.
//!
//! Maps [`JobIdentity`] to its single resident [`ComputeJob`], loading the
//! durable record lazily on first resolve and evicting idle entries after
//! a configured window. The registry is constructor-injected everywhere it
//! is used — no process-wide globals — so test instances stay isolated.

use crate::config::SupervisorConfig;
use crate::connection::AgentLinks;
use crate::drivers::DriverSet;
use crate::job::ComputeJob;
use crate::storage::{RecordStore, StorageError};
use lr_core::{Clock, ComputeJobRecord, JobIdentity, JobStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct JobRegistry<C: Clock> {
    jobs: Mutex<HashMap<JobIdentity, Arc<ComputeJob<C>>>>,
    cfg: Arc<SupervisorConfig>,
    store: RecordStore,
    drivers: DriverSet,
    links: AgentLinks,
    clock: C,
}

impl<C: Clock + 'static> JobRegistry<C> {
    pub fn new(
        cfg: Arc<SupervisorConfig>,
        store: RecordStore,
        drivers: DriverSet,
        links: AgentLinks,
        clock: C,
    ) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            cfg,
            store,
            drivers,
            links,
            clock,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Resolve or create the single resident job for an identity.
    ///
    /// Idempotent: concurrent resolves for the same identity always get
    /// the same `Arc`. The durable record (when one exists) seeds a fresh
    /// instance; otherwise the job starts from a `missing` record.
    pub fn resolve(&self, identity: &JobIdentity) -> Result<Arc<ComputeJob<C>>, StorageError> {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.get(identity) {
            return Ok(Arc::clone(job));
        }
        let mut record = self
            .store
            .load(identity)?
            .unwrap_or_else(|| ComputeJobRecord::new(identity.clone()));
        // An active record with no resident job means its run task did not
        // survive a supervisor restart; resolve it so pollers are not left
        // attached to a run nobody is driving.
        if record.status.is_active() {
            let serial = record.serial;
            record.finish_run(
                serial,
                JobStatus::Error,
                Some("run interrupted by a supervisor restart".into()),
                None,
                self.clock.epoch_ms(),
            );
            self.store.save(&record)?;
        }
        let job = ComputeJob::new(
            identity.clone(),
            record,
            Arc::clone(&self.cfg),
            self.store.clone(),
            self.drivers.clone(),
            self.links.clone(),
            self.clock.clone(),
        );
        jobs.insert(identity.clone(), Arc::clone(&job));
        Ok(job)
    }

    /// All resident jobs, for the admin listing.
    pub fn resident(&self) -> Vec<Arc<ComputeJob<C>>> {
        self.jobs.lock().values().map(Arc::clone).collect()
    }

    pub fn resident_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Drop resident jobs with no active run that have not been touched
    /// within the idle window. Their durable records remain, so the next
    /// request reloads them.
    pub fn evict_idle(&self) -> usize {
        let idle_after = Duration::from_secs(self.cfg.idle_evict_secs);
        let now = self.clock.now();
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|identity, job| {
            let idle = job.is_idle()
                && now.saturating_duration_since(job.last_access()) >= idle_after;
            if idle {
                debug!(%identity, "evicting idle job");
            }
            !idle
        });
        before - jobs.len()
    }

    /// Periodic eviction sweep, until shutdown.
    pub async fn run_eviction(self: Arc<Self>, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.cfg.idle_evict_secs.max(60) / 2);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.evict_idle();
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
