// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded concurrency slots.
//!
//! A [`SlotQueue`] is a counting semaphore for one resource class. Drivers
//! hold one queue per kind (per-host capacity); a compute job holds one for
//! its run directory (at most one filesystem-mutating op at a time). A
//! [`Slot`] releases its unit of capacity exactly once, on drop, so no
//! completion path can double-free.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
pub enum SlotError {
    #[error("slot queue closed")]
    Closed,
}

/// Counting semaphore over a fixed pool of slots.
#[derive(Clone)]
pub struct SlotQueue {
    sem: Arc<Semaphore>,
    total: usize,
}

impl SlotQueue {
    pub fn new(total: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(total)),
            total,
        }
    }

    /// Acquire one slot, suspending until one is free.
    pub async fn acquire(&self) -> Result<Slot, SlotError> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SlotError::Closed)?;
        Ok(Slot { _permit: permit })
    }

    /// Acquire one slot without suspending; `None` when the pool is empty.
    pub fn try_acquire(&self) -> Option<Slot> {
        self.sem
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| Slot { _permit: permit })
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.total.saturating_sub(self.sem.available_permits())
    }
}

impl std::fmt::Debug for SlotQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotQueue")
            .field("total", &self.total)
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// One unit of capacity. Dropping the slot releases it back to its queue.
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Slot")
    }
}

#[cfg(test)]
#[path = "slot_tests.rs"]
mod tests;
