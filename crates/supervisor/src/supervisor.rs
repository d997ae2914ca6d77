// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor API surface.
//!
//! `receive` is the single entry point the front-end collaborator calls.
//! Routing is an exhaustive match on the request enum, so adding an API
//! without a handler is a compile error, not a runtime fault. Caller
//! faults come back as typed error replies; anything unexpected is logged
//! with full context and flattened to a generic server error.

use crate::config::SupervisorConfig;
use crate::job::JobError;
use crate::registry::JobRegistry;
use lr_core::Clock;
use lr_wire::{ApiRequest, Reply, RunningJobEntry};
use std::sync::Arc;
use tracing::error;

/// Display-name lookups from the auth collaborator. The supervisor never
/// owns user accounts; it only joins names into the admin listing.
pub trait AuthLookup: Send + Sync {
    fn display_name(&self, uid: &str) -> Option<String>;
}

/// Default lookup when no auth collaborator is wired in.
pub struct NullAuth;

impl AuthLookup for NullAuth {
    fn display_name(&self, _uid: &str) -> Option<String> {
        None
    }
}

pub struct Supervisor<C: Clock> {
    registry: Arc<JobRegistry<C>>,
    auth: Arc<dyn AuthLookup>,
}

impl<C: Clock + 'static> Supervisor<C> {
    pub fn new(registry: Arc<JobRegistry<C>>, auth: Arc<dyn AuthLookup>) -> Self {
        Self { registry, auth }
    }

    pub fn registry(&self) -> &Arc<JobRegistry<C>> {
        &self.registry
    }

    /// Handle one front-end request.
    pub async fn receive(&self, request: ApiRequest) -> Reply {
        match self.dispatch(request).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "request failed internally");
                Reply::server_error()
            }
        }
    }

    async fn dispatch(&self, request: ApiRequest) -> Result<Reply, JobError> {
        match request {
            ApiRequest::Ping => Ok(Reply::Ok),

            ApiRequest::BeginSession { uid } => {
                if uid.is_empty() {
                    return Ok(Reply::login_required());
                }
                Ok(Reply::Ok)
            }

            ApiRequest::Run { descriptor, force } => {
                if descriptor.uid.is_empty() {
                    return Ok(Reply::login_required());
                }
                if descriptor.hash.is_empty() {
                    return Ok(Reply::bad_request("missing compute job hash"));
                }
                if descriptor.command.is_empty() {
                    return Ok(Reply::bad_request("missing run command"));
                }
                let job = self.registry.resolve(&descriptor.identity())?;
                job.run(descriptor, force).await
            }

            ApiRequest::RunStatus { job } => {
                if job.uid.is_empty() {
                    return Ok(Reply::login_required());
                }
                let resolved = self.registry.resolve(&job.identity())?;
                Ok(resolved.status(&job).await)
            }

            ApiRequest::RunCancel { job } => {
                if job.uid.is_empty() {
                    return Ok(Reply::login_required());
                }
                let resolved = self.registry.resolve(&job.identity())?;
                resolved.cancel(&job).await
            }

            ApiRequest::Analysis {
                job,
                kind,
                command,
                frame_index,
                filename,
            } => {
                if job.uid.is_empty() {
                    return Ok(Reply::login_required());
                }
                if command.is_empty() {
                    return Ok(Reply::bad_request("missing analysis command"));
                }
                let resolved = self.registry.resolve(&job.identity())?;
                resolved
                    .analysis(&job, kind, command, frame_index, filename)
                    .await
            }

            ApiRequest::ListRunningJobs { uid } => Ok(self.list_running(uid.as_deref()).await),
        }
    }

    /// Jobs currently pending or running, joined with display names.
    /// Active jobs are always resident (their run task pins them), so the
    /// in-memory registry is the complete answer.
    async fn list_running(&self, uid: Option<&str>) -> Reply {
        let mut jobs = Vec::new();
        for job in self.registry.resident() {
            let record = job.snapshot().await;
            if !record.status.is_active() {
                continue;
            }
            if let Some(filter) = uid {
                if record.identity.uid != filter {
                    continue;
                }
            }
            jobs.push(RunningJobEntry {
                display_name: self.auth.display_name(&record.identity.uid),
                uid: record.identity.uid.clone(),
                sim_type: record.identity.sim_type.clone(),
                sim_id: record.identity.sim_id.clone(),
                compute_model: record.identity.compute_model.clone(),
                status: record.status,
                is_parallel: record.is_parallel,
                started_ms: record.started_ms,
                last_update_ms: record.last_update_ms,
            });
        }
        Reply::RunningJobs { jobs }
    }
}

/// Convenience constructor wiring a registry from parts.
pub fn build_supervisor<C: Clock + 'static>(
    cfg: Arc<SupervisorConfig>,
    store: crate::storage::RecordStore,
    drivers: crate::drivers::DriverSet,
    links: crate::connection::AgentLinks,
    clock: C,
    auth: Arc<dyn AuthLookup>,
) -> Supervisor<C> {
    let registry = Arc::new(JobRegistry::new(cfg, store, drivers, links, clock));
    Supervisor::new(registry, auth)
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
