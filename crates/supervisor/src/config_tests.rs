// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use lr_core::RunMode;
use serial_test::serial;
use std::time::Duration;

#[test]
#[serial]
fn defaults_are_sane() {
    let cfg = SupervisorConfig::default();
    assert!(cfg.sequential_slots > 0);
    assert!(cfg.parallel_slots > 0);
    assert!(cfg.sbatch_pending_ceiling > 0);
}

#[test]
#[serial]
fn env_overrides_apply() {
    std::env::set_var("LR_SEQUENTIAL_SLOTS", "9");
    let cfg = SupervisorConfig::default();
    std::env::remove_var("LR_SEQUENTIAL_SLOTS");
    assert_eq!(cfg.sequential_slots, 9);
}

#[test]
#[serial]
fn run_budget_policy() {
    let cfg = SupervisorConfig::default();

    let sequential = cfg.run_budget(RunMode::Sequential, false);
    assert_eq!(sequential, Some(Duration::from_secs(cfg.run_secs_sequential)));

    let parallel = cfg.run_budget(RunMode::Parallel, false);
    let premium = cfg.run_budget(RunMode::Parallel, true);
    assert_eq!(parallel, Some(Duration::from_secs(cfg.run_secs_parallel)));
    assert_eq!(premium, Some(Duration::from_secs(cfg.run_secs_parallel * 2)));

    // The external scheduler owns sbatch wall clock
    assert_eq!(cfg.run_budget(RunMode::Sbatch, false), None);
}
