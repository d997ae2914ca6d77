// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run-directory retention sweep.
//!
//! Terminal jobs owned by non-premium users are purged after the retention
//! window: the run directory is deleted and the record rewritten with
//! status `purged`. A per-process cache of already-purged identities keeps
//! repeat sweeps from re-reading the same records.

use crate::config::SupervisorConfig;
use crate::storage::RecordStore;
use lr_core::{Clock, JobStatus};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct PurgeSweep<C: Clock> {
    cfg: Arc<SupervisorConfig>,
    store: RecordStore,
    clock: C,
    /// Identity digests already purged by this process
    purged: Mutex<HashSet<String>>,
}

impl<C: Clock + 'static> PurgeSweep<C> {
    pub fn new(cfg: Arc<SupervisorConfig>, store: RecordStore, clock: C) -> Self {
        Self {
            cfg,
            store,
            clock,
            purged: Mutex::new(HashSet::new()),
        }
    }

    /// One pass over the durable records. Returns how many were purged.
    pub fn run_once(&self) -> usize {
        let records = match self.store.scan() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "purge sweep could not scan records");
                return 0;
            }
        };
        let now = self.clock.epoch_ms();
        let retention_ms = self.cfg.purge_retention_secs * 1_000;
        let mut count = 0;

        for mut record in records {
            if record.premium
                || !record.status.is_terminal()
                || record.status == JobStatus::Purged
            {
                continue;
            }
            let digest = record.identity.digest();
            if self.purged.lock().contains(&digest) {
                continue;
            }
            if now.saturating_sub(record.last_update_ms) < retention_ms {
                continue;
            }

            if !record.run_dir.as_os_str().is_empty() && record.run_dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&record.run_dir) {
                    warn!(
                        identity = %record.identity,
                        run_dir = %record.run_dir.display(),
                        error = %e,
                        "purge could not remove run directory"
                    );
                    continue;
                }
            }
            record.purge(now);
            if let Err(e) = self.store.save(&record) {
                warn!(identity = %record.identity, error = %e, "purge could not rewrite record");
                continue;
            }
            info!(identity = %record.identity, "job purged");
            self.purged.lock().insert(digest);
            count += 1;
        }
        count
    }

    /// Periodic sweep, until shutdown.
    pub async fn run_forever(self: Arc<Self>, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.cfg.purge_sweep_secs);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.run_once();
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }
}

#[cfg(test)]
#[path = "purge_tests.rs"]
mod tests;
