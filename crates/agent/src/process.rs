// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job-command execution and cancellation.
//!
//! One job-command subprocess runs at a time (the run lock serializes
//! them); the `running` acknowledgement is only sent once the child has
//! actually started. Kill is idempotent: a supervisor-initiated cancel and
//! a spontaneous exit can race freely — signals to a reaped pid are
//! ignored, and the pid table entry is removed exactly once.

use crate::fastline::FastLine;
use lr_core::OpId;
use lr_wire::{AgentToSupervisor, OpReply};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Executes ops on behalf of the connection loop.
pub struct OpRunner {
    /// In-flight child pids by op id
    children: Mutex<HashMap<OpId, u32>>,
    /// At most one job-command subprocess at a time
    run_lock: tokio::sync::Mutex<()>,
    fast: FastLine,
    term_grace: Duration,
}

impl OpRunner {
    pub fn new(term_grace: Duration, fast_call_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            children: Mutex::new(HashMap::new()),
            run_lock: tokio::sync::Mutex::new(()),
            fast: FastLine::new(fast_call_timeout),
            term_grace,
        })
    }

    /// Execute a job command, streaming the running ack and terminal frame.
    pub async fn run_job(
        self: Arc<Self>,
        op_id: OpId,
        run_dir: PathBuf,
        command: Vec<String>,
        tx: mpsc::Sender<AgentToSupervisor>,
    ) {
        let _serialized = self.run_lock.lock().await;

        let Some((program, args)) = command.split_first() else {
            send(&tx, &op_id, OpReply::Error {
                message: "empty run command".into(),
            })
            .await;
            return;
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(&run_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                send(&tx, &op_id, OpReply::Error {
                    message: format!("failed to start {program}: {e}"),
                })
                .await;
                return;
            }
        };
        if let Some(pid) = child.id() {
            self.children.lock().insert(op_id.clone(), pid);
        }
        info!(%op_id, program, "job command started");
        send(&tx, &op_id, OpReply::Running).await;

        let output = child.wait_with_output().await;
        self.children.lock().remove(&op_id);

        match output {
            Ok(output) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let message = if exit_code == 0 {
                    None
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let trimmed = stderr.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        // Last line tends to carry the code's own error
                        trimmed.lines().last().map(|l| l.to_string())
                    }
                };
                info!(%op_id, exit_code, "job command exited");
                send(&tx, &op_id, OpReply::Exited { exit_code, message }).await;
            }
            Err(e) => {
                send(&tx, &op_id, OpReply::Error {
                    message: format!("failed to wait on job command: {e}"),
                })
                .await;
            }
        }
    }

    /// Run an analysis op. Fast-path requests multiplex through the
    /// long-lived subprocess; everything else spawns a one-shot child and
    /// returns its stdout.
    pub async fn run_analysis(
        self: Arc<Self>,
        op_id: OpId,
        run_dir: PathBuf,
        command: Vec<String>,
        fastpath: bool,
        request: Option<serde_json::Value>,
        tx: mpsc::Sender<AgentToSupervisor>,
    ) {
        if fastpath {
            let request = request.unwrap_or(serde_json::Value::Null);
            match self.fast.call(&command, &run_dir, request).await {
                Ok(data) => send(&tx, &op_id, OpReply::Data { data }).await,
                Err(e) => {
                    send(&tx, &op_id, OpReply::Error {
                        message: e.to_string(),
                    })
                    .await;
                }
            }
            return;
        }

        let Some((program, args)) = command.split_first() else {
            send(&tx, &op_id, OpReply::Error {
                message: "empty analysis command".into(),
            })
            .await;
            return;
        };
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&run_dir)
            .stdin(std::process::Stdio::null())
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                // Pass structured output through untouched; wrap raw text
                let data = serde_json::from_str(&stdout)
                    .unwrap_or_else(|_| serde_json::json!({ "output": stdout.trim() }));
                send(&tx, &op_id, OpReply::Data { data }).await;
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                send(&tx, &op_id, OpReply::Error {
                    message: format!("analysis exited {}: {}", output.status, stderr.trim()),
                })
                .await;
            }
            Err(e) => {
                send(&tx, &op_id, OpReply::Error {
                    message: format!("failed to start analysis: {e}"),
                })
                .await;
            }
        }
    }

    /// Terminate the named in-flight ops. Non-blocking: the SIGTERM goes
    /// out now, the SIGKILL escalation runs in the background.
    pub fn cancel(self: &Arc<Self>, targets: &[OpId]) {
        for target in targets {
            let pid = self.children.lock().get(target).copied();
            let Some(pid) = pid else {
                // Already exited — cancel raced a spontaneous exit
                continue;
            };
            info!(op_id = %target, pid, "terminating job command");
            signal_quiet(pid, Signal::SIGTERM);

            let runner = Arc::clone(self);
            let target = target.clone();
            let grace = self.term_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if runner.children.lock().contains_key(&target) {
                    signal_quiet(pid, Signal::SIGKILL);
                }
            });
        }
    }
}

fn signal_quiet(pid: u32, sig: Signal) {
    if let Err(e) = kill(Pid::from_raw(pid as i32), sig) {
        // ESRCH means the child already exited; either way there is
        // nothing more to do
        warn!(pid, signal = %sig, error = %e, "signal not delivered");
    }
}

async fn send(tx: &mpsc::Sender<AgentToSupervisor>, op_id: &OpId, reply: OpReply) {
    let frame = AgentToSupervisor::Reply {
        op_id: op_id.clone(),
        reply,
    };
    if tx.send(frame).await.is_err() {
        warn!(%op_id, "reply dropped: connection gone");
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
