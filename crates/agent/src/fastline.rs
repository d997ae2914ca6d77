// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-multiplexing fast path for analysis calls.
//!
//! One long-lived subprocess accepts newline-delimited JSON requests on
//! stdin and answers each with one JSON line on stdout, avoiding a process
//! spawn per analysis call. Exactly one request is in flight at a time;
//! callers queue on the call lock in arrival order.
//!
//! Failure containment: a protocol error, timeout, or subprocess crash
//! fails the in-flight request and every request queued behind it (they
//! were aimed at the dead incarnation), tears the subprocess down, and the
//! next call starts a fresh one.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum FastLineError {
    #[error("fast path spawn failed: {0}")]
    Spawn(String),
    #[error("fast path request failed: {0}")]
    Io(String),
    #[error("fast path returned malformed output: {0}")]
    Protocol(String),
    #[error("fast path timed out")]
    Timeout,
    #[error("fast path restarted while request was queued")]
    Restarted,
}

struct FastProc {
    command: Vec<String>,
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

/// The multiplexer. One per agent.
pub struct FastLine {
    state: tokio::sync::Mutex<Option<FastProc>>,
    /// Incarnation counter; bumped on every teardown so queued callers can
    /// tell they were aimed at a dead subprocess
    generation: AtomicU64,
    call_timeout: Duration,
}

impl FastLine {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            state: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            call_timeout,
        }
    }

    /// Send one request and wait for its one-line answer.
    pub async fn call(
        &self,
        command: &[String],
        run_dir: &Path,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, FastLineError> {
        let submitted_gen = self.generation.load(Ordering::SeqCst);
        let mut state = self.state.lock().await;

        // A teardown happened while this call was queued: its request was
        // aimed at the incarnation that died, so it fails with the rest.
        if self.generation.load(Ordering::SeqCst) != submitted_gen {
            return Err(FastLineError::Restarted);
        }

        // (Re)start the subprocess when absent or when the collaborator
        // switched multiplexer commands
        let needs_start = match state.as_ref() {
            None => true,
            Some(proc) => proc.command != command,
        };
        if needs_start {
            if let Some(proc) = state.take() {
                teardown(proc);
                self.generation.fetch_add(1, Ordering::SeqCst);
            }
            *state = Some(spawn(command)?);
            info!(?command, "fast path started");
        }

        let Some(proc) = state.as_mut() else {
            return Err(FastLineError::Io("fast path unavailable".into()));
        };

        let line = serde_json::json!({
            "run_dir": run_dir,
            "request": request,
        })
        .to_string();

        let result = self.exchange(proc, &line).await;
        if result.is_err() {
            // Fail everything queued behind the dead incarnation
            if let Some(proc) = state.take() {
                teardown(proc);
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn exchange(
        &self,
        proc: &mut FastProc,
        line: &str,
    ) -> Result<serde_json::Value, FastLineError> {
        proc.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| FastLineError::Io(e.to_string()))?;
        proc.stdin
            .write_all(b"\n")
            .await
            .map_err(|e| FastLineError::Io(e.to_string()))?;
        proc.stdin
            .flush()
            .await
            .map_err(|e| FastLineError::Io(e.to_string()))?;

        let answer = tokio::time::timeout(self.call_timeout, proc.lines.next_line())
            .await
            .map_err(|_| FastLineError::Timeout)?
            .map_err(|e| FastLineError::Io(e.to_string()))?
            .ok_or_else(|| FastLineError::Io("fast path closed stdout".into()))?;

        serde_json::from_str(&answer).map_err(|e| FastLineError::Protocol(e.to_string()))
    }
}

fn spawn(command: &[String]) -> Result<FastProc, FastLineError> {
    let Some((program, args)) = command.split_first() else {
        return Err(FastLineError::Spawn("empty fast path command".into()));
    };
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| FastLineError::Spawn(format!("{program}: {e}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| FastLineError::Spawn("no stdin handle".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| FastLineError::Spawn("no stdout handle".into()))?;

    Ok(FastProc {
        command: command.to_vec(),
        child,
        stdin,
        lines: BufReader::new(stdout).lines(),
    })
}

fn teardown(mut proc: FastProc) {
    warn!(command = ?proc.command, "fast path torn down");
    if let Err(e) = proc.child.start_kill() {
        warn!(error = %e, "fast path kill failed");
    }
    // The kernel reaps via tokio's orphan queue once the child exits
}

#[cfg(test)]
#[path = "fastline_tests.rs"]
mod tests;
