// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable job-record storage.
//!
//! One JSON file per [`JobIdentity`] under the supervisor's records
//! directory, named by the identity digest. Writes go to a temp file and
//! rename into place, so a reader (or a supervisor restarting mid-write)
//! never observes a half-written record. These files are the sole source of
//! truth across restarts.

use lr_core::{ComputeJobRecord, JobIdentity};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Store for durable compute-job records.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, identity: &JobIdentity) -> PathBuf {
        self.dir.join(format!("{}.json", identity.digest()))
    }

    /// Load the record for an identity; `None` when no run was ever recorded.
    pub fn load(&self, identity: &JobIdentity) -> Result<Option<ComputeJobRecord>, StorageError> {
        let path = self.path_for(identity);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the record on disk.
    pub fn save(&self, record: &ComputeJobRecord) -> Result<(), StorageError> {
        let path = self.path_for(&record.identity);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// All records on disk. Unreadable files are skipped with a warning —
    /// one corrupt record must not take down a sweep.
    pub fn scan(&self) -> Result<Vec<ComputeJobRecord>, StorageError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
                    continue;
                }
            };
            match serde_json::from_slice::<ComputeJobRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed record");
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
