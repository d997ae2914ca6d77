// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::path::PathBuf;

fn cat() -> Vec<String> {
    vec!["cat".into()]
}

#[tokio::test]
async fn call_round_trips_through_the_subprocess() {
    let fast = FastLine::new(Duration::from_secs(5));
    let run_dir = PathBuf::from("/tmp/run");

    // `cat` echoes the request envelope line back as the answer
    let answer = fast
        .call(&cat(), &run_dir, serde_json::json!({ "frame": 7 }))
        .await
        .unwrap();

    assert_eq!(answer["request"]["frame"], 7);
    assert_eq!(answer["run_dir"], "/tmp/run");
}

#[tokio::test]
async fn repeated_calls_reuse_one_subprocess() {
    let fast = FastLine::new(Duration::from_secs(5));
    let run_dir = PathBuf::from("/tmp/run");

    for i in 0..3 {
        let answer = fast
            .call(&cat(), &run_dir, serde_json::json!({ "i": i }))
            .await
            .unwrap();
        assert_eq!(answer["request"]["i"], i);
    }
}

#[tokio::test]
async fn crash_fails_the_call_then_restarts_cleanly() {
    let fast = FastLine::new(Duration::from_secs(5));
    let run_dir = PathBuf::from("/tmp/run");

    // Reads one line, answers nothing, dies
    let dying: Vec<String> = vec!["sh".into(), "-c".into(), "read line; exit 1".into()];
    let err = fast
        .call(&dying, &run_dir, serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, FastLineError::Io(_)));

    // Next use starts a fresh subprocess and works
    let answer = fast
        .call(&cat(), &run_dir, serde_json::json!({ "after": "restart" }))
        .await
        .unwrap();
    assert_eq!(answer["request"]["after"], "restart");
}

#[tokio::test]
async fn malformed_answer_is_a_protocol_error() {
    let fast = FastLine::new(Duration::from_secs(5));
    let run_dir = PathBuf::from("/tmp/run");

    // Answers every request with text that is not JSON
    let garbled: Vec<String> = vec![
        "sh".into(),
        "-c".into(),
        "while read line; do echo not-json; done".into(),
    ];
    let err = fast
        .call(&garbled, &run_dir, serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, FastLineError::Protocol(_)));
}

#[tokio::test]
async fn silent_subprocess_times_out() {
    let fast = FastLine::new(Duration::from_millis(200));
    let run_dir = PathBuf::from("/tmp/run");

    // Consumes input, never answers
    let silent: Vec<String> = vec!["sh".into(), "-c".into(), "while read line; do :; done".into()];
    let err = fast
        .call(&silent, &run_dir, serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, FastLineError::Timeout));
}
