// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn identity() -> JobIdentity {
    JobIdentity::new("usr1", "srw", "sim42", "intensityReport")
}

#[test]
fn agent_id_has_prefix() {
    let id = AgentId::new();
    assert!(id.as_str().starts_with("agt-"));
    assert_eq!(id.suffix().len(), 19);
}

#[test]
fn op_id_serde_is_transparent() {
    let id = OpId::from_string("op-abc");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"op-abc\"");
    let parsed: OpId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn identity_is_deterministic() {
    assert_eq!(identity(), identity());
    assert_eq!(identity().digest(), identity().digest());
}

#[test]
fn identity_digest_is_hex_sha256() {
    let digest = identity().digest();
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn identity_components_distinguish() {
    let base = identity();
    let other_user = JobIdentity::new("usr2", "srw", "sim42", "intensityReport");
    let other_model = JobIdentity::new("usr1", "srw", "sim42", "fluxReport");
    assert_ne!(base.digest(), other_user.digest());
    assert_ne!(base.digest(), other_model.digest());
}

#[test]
fn identity_display_matches_canonical() {
    let id = identity();
    assert_eq!(id.to_string(), id.canonical());
    assert_eq!(id.to_string(), "usr1-srw-sim42-intensityReport");
}

#[test]
fn identity_round_trips_through_json() {
    let id = identity();
    let json = serde_json::to_string(&id).unwrap();
    let parsed: JobIdentity = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}
