// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use loom_config::{AgentMode, SubprocessConfig};
use loom_model::error::InferenceError;
use loom_model::provider::{ClientOptions, EventStream, InferenceClient};
use loom_model::types::Message;

use crate::args::build_args;
use crate::wire::{parse_line, DONE_SENTINEL};

/// Grace period after SIGTERM before escalating to SIGKILL.
const SIGTERM_WAIT: Duration = Duration::from_secs(10);
/// Bound on draining stderr once the child has been signalled.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Sends SIGTERM and waits up to `SIGTERM_WAIT` for the child to exit on its
/// own, escalating to SIGKILL only if it's still running afterwards.
async fn terminate_gracefully(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    if tokio::time::timeout(SIGTERM_WAIT, child.wait()).await.is_ok() {
        return;
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// An `InferenceClient` that drives a child CLI process instead of talking
/// to a remote endpoint directly, translating its JSON-lines protocol into
/// the same `StreamEvent` sequence any other backend produces.
pub struct SubprocessAdapter {
    cfg: SubprocessConfig,
    model: String,
    mode: AgentMode,
    tool_set_nonempty: bool,
}

impl SubprocessAdapter {
    pub fn new(cfg: SubprocessConfig, model: impl Into<String>, mode: AgentMode, tool_set_nonempty: bool) -> Self {
        Self { cfg, model: model.into(), mode, tool_set_nonempty }
    }

    fn spawn_child(&self) -> std::io::Result<Child> {
        let args = build_args(&self.model, self.cfg.max_output_tokens, self.mode, self.tool_set_nonempty);
        let mut cmd = Command::new(&self.cfg.cli_path);
        cmd.args(&args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // setsid() detaches the child from any controlling terminal so a
        // spawned program cannot open /dev/tty and interfere with the host.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        for var in &self.cfg.stripped_env_vars {
            cmd.env_remove(var);
        }
        cmd.env("LOOM_MAX_OUTPUT_TOKENS", self.cfg.max_output_tokens.to_string());
        cmd.env("LOOM_DISABLE_NONESSENTIAL_TRAFFIC", "1");
        if let Some(budget) = self.cfg.thinking_budget {
            cmd.env("LOOM_THINKING_BUDGET", budget.to_string());
        }
        cmd.spawn()
    }
}

#[async_trait]
impl InferenceClient for SubprocessAdapter {
    fn name(&self) -> &str {
        "subprocess"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn configure(&self, options: ClientOptions) -> Box<dyn InferenceClient> {
        Box::new(Self {
            cfg: self.cfg.clone(),
            model: self.model.clone(),
            mode: self.mode,
            tool_set_nonempty: self.tool_set_nonempty || !options.tools.is_empty(),
        })
    }

    async fn generate_stream(&self, messages: Vec<Message>) -> Result<EventStream, InferenceError> {
        let mut child = self.spawn_child().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                InferenceError::Unreachable(format!(
                    "{} not found on PATH — install it and ensure it is reachable (install_hint: set subprocess.cli_path)",
                    self.cfg.cli_path
                ))
            } else {
                InferenceError::Unreachable(format!("spawning {}: {e}", self.cfg.cli_path))
            }
        })?;

        let payload = serde_json::to_vec(&messages).map_err(|e| InferenceError::Malformed(e.to_string()))?;
        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin.write_all(&payload).await.map_err(|e| InferenceError::Unreachable(e.to_string()))?;
        drop(stdin);

        let stdout = child.stdout.take().expect("stdout was piped");
        let mut stderr = child.stderr.take().expect("stderr was piped");

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut exited_cleanly = false;

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(l)) => l,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(InferenceError::Unreachable(e.to_string()))).await;
                        break;
                    }
                };
                if line.trim() == DONE_SENTINEL {
                    exited_cleanly = true;
                    break;
                }
                for event in parse_line(&line) {
                    if tx.send(event).await.is_err() {
                        // Receiver dropped: caller cancelled. Send a graceful
                        // termination signal first and only escalate to
                        // SIGKILL if the child ignores it, then drain stderr
                        // within a bounded window rather than blocking
                        // indefinitely on a process that may hold its pipes
                        // open after exit.
                        terminate_gracefully(&mut child).await;
                        let mut drained = String::new();
                        let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, stderr.read_to_string(&mut drained)).await;
                        return;
                    }
                }
            }

            let status = child.wait().await;
            let mut stderr_text = String::new();
            let _ = stderr.read_to_string(&mut stderr_text).await;

            match status {
                Ok(status) if !status.success() => {
                    let _ = tx
                        .send(Err(InferenceError::ProviderError {
                            payload: if stderr_text.trim().is_empty() {
                                format!("child exited with status {status}")
                            } else {
                                stderr_text.trim().to_string()
                            },
                        }))
                        .await;
                }
                Ok(_) if !exited_cleanly => {
                    debug!("subprocess stdout closed without a done sentinel");
                }
                Err(e) => {
                    warn!(error = %e, "failed to wait on subprocess adapter child");
                }
                _ => {}
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
