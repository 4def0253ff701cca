// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A small set of reference tool implementations. These exist to exercise
//! the registry and scheduler end to end (approval gating, mutation
//! denial in plan mode, output-category-aware truncation) — a real
//! deployment registers its own tool set via `ToolRegistry::register` /
//! `register_group`.
use async_trait::async_trait;
#[cfg(unix)]
use libc;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Hard byte ceiling for combined stdout + stderr returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 20_000;
const HEAD_LINES: usize = 100;
const TAIL_LINES: usize = 100;

/// Runs a shell command and returns captured stdout/stderr, head+tail
/// truncated when the combined output is large. Mutating by definition —
/// `plan` mode denies it outright regardless of the configured policy.
pub struct ShellTool {
    pub timeout_secs: u64,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr.\n\
         'shell_command' is required and can be any bash one-liner.\n\
         Output is capped at ~20 KB; when larger, the first 100 and last 100 lines are\n\
         preserved with an omission marker in the middle — errors at the end are never lost."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "shell_command": {
                    "type": "string",
                    "description": "The complete bash one liner shell command to execute."
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to cwd)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["shell_command"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }
    fn mutates(&self) -> bool {
        true
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let start = Instant::now();
        let command = match call.args.get("shell_command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => {
                return ToolOutput::err(&call.id, "missing required 'shell_command' parameter");
            }
        };
        let workdir = call.args.get("workdir").and_then(|v| v.as_str()).map(str::to_string);
        let timeout = call.args.get("timeout_secs").and_then(|v| v.as_u64()).unwrap_or(self.timeout_secs);

        debug!(cmd = %command, "executing shell tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        cmd.stdin(Stdio::null());
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
        if let Some(wd) = &workdir {
            cmd.current_dir(wd);
        }

        let result = tokio::time::timeout(Duration::from_secs(timeout), cmd.output()).await;

        match result {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.is_empty() {
                    content.push_str(&head_tail_truncate(&stdout));
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&head_tail_truncate(&stderr));
                }
                if content.is_empty() {
                    content = format!("[exit {}]", output.status.code().unwrap_or(-1));
                }

                let code = output.status.code().unwrap_or(-1);
                if code == 0 {
                    ToolOutput::ok(&call.id, content, start.elapsed())
                } else if code == 1 {
                    // Exit 1 is the Unix convention for "no matches" / "condition
                    // false" — not a hard failure; flagging it as an error would
                    // inflate the scheduler's consecutive-error tracking.
                    let out =
                        if content.is_empty() { "[exit 1]".to_string() } else { format!("[exit 1]\n{content}") };
                    ToolOutput::ok(&call.id, out, start.elapsed())
                } else {
                    ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"))
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("spawn error: {e}")),
            Err(_) => ToolOutput::err(&call.id, format!("timeout after {timeout}s")),
        }
    }
}

fn head_tail_truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }
    let lines: Vec<&str> = s.lines().collect();
    let total = lines.len();
    if total <= HEAD_LINES + TAIL_LINES {
        let tail_start = s.len().saturating_sub(OUTPUT_LIMIT_BYTES / 2);
        let tail_str = &s[tail_start..];
        let head_end = (OUTPUT_LIMIT_BYTES / 2).min(s.len());
        let head_str = &s[..head_end];
        let omitted_bytes = s.len() - head_str.len() - tail_str.len();
        return format!("{head_str}\n...[{omitted_bytes} bytes omitted]...\n{tail_str}");
    }
    let head: Vec<&str> = lines[..HEAD_LINES].to_vec();
    let tail: Vec<&str> = lines[total - TAIL_LINES..].to_vec();
    let omitted_lines = total - HEAD_LINES - TAIL_LINES;
    let shown_bytes = head.join("\n").len() + tail.join("\n").len();
    let omitted_bytes = s.len().saturating_sub(shown_bytes);
    format!(
        "{}\n...[{} lines / ~{} bytes omitted]...\n{}",
        head.join("\n"),
        omitted_lines,
        omitted_bytes,
        tail.join("\n")
    )
}

/// Reads a text file, optionally windowed by 1-indexed line offset/limit.
/// Lines are returned with an `L{n}:` prefix so the model can address
/// specific lines precisely in follow-up edit requests.
pub struct ReadFileTool {
    pub default_line_limit: usize,
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self { default_line_limit: 200 }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a text file. 'path' is required. Optional 'offset' (1-indexed) and 'limit'\n\
         restrict the returned window. Lines are prefixed L{n}: for precise addressing."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file to read" },
                "offset": { "type": "integer", "description": "1-indexed line to start at (optional)" },
                "limit": { "type": "integer", "description": "Maximum number of lines to return (optional)" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::FileContent
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let start = Instant::now();
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing required 'path' parameter");
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1).max(1) as usize;
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize).unwrap_or(self.default_line_limit);

        let text = match tokio::fs::read_to_string(path).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("reading {path}: {e}")),
        };

        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();
        let start_idx = (offset - 1).min(total);
        let end_idx = (start_idx + limit).min(total);

        let mut content = String::new();
        for (i, line) in lines[start_idx..end_idx].iter().enumerate() {
            content.push_str(&format!("L{}:{}\n", start_idx + i + 1, line));
        }
        if end_idx < total {
            content.push_str(&format!("\n[{} more lines — pass offset={} to continue]", total - end_idx, end_idx + 1));
        }

        ToolOutput::ok(&call.id, content, start.elapsed())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::{Tool, ToolCall};

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "shell".into(), args }
    }

    #[tokio::test]
    async fn shell_executes_echo_and_returns_stdout() {
        let t = ShellTool::default();
        let out = t.execute(&call(json!({"shell_command": "echo hello"}))).await;
        assert!(out.success, "{}", out.output);
        assert!(out.output.contains("hello"));
    }

    #[tokio::test]
    async fn shell_exit_1_is_not_error_but_includes_code() {
        let t = ShellTool::default();
        let out = t.execute(&call(json!({"shell_command": "exit 1"}))).await;
        assert!(out.success, "exit 1 should not be treated as an error");
        assert!(out.output.contains("[exit 1]"));
    }

    #[tokio::test]
    async fn shell_exit_2_is_error() {
        let t = ShellTool::default();
        let out = t.execute(&call(json!({"shell_command": "exit 2"}))).await;
        assert!(!out.success);
    }

    #[tokio::test]
    async fn shell_missing_command_is_error() {
        let t = ShellTool::default();
        let out = t.execute(&call(json!({}))).await;
        assert!(!out.success);
    }

    #[tokio::test]
    async fn shell_timeout_returns_error() {
        let t = ShellTool { timeout_secs: 1 };
        let out = t.execute(&call(json!({"shell_command": "sleep 60"}))).await;
        assert!(!out.success);
        assert!(out.output.contains("timeout"));
    }

    #[test]
    fn shell_is_mutating_and_asks_by_default() {
        let t = ShellTool::default();
        assert!(t.mutates());
        assert_eq!(t.default_policy(), ApprovalPolicy::Ask);
    }

    #[test]
    fn head_tail_truncate_passes_short_output_through() {
        let s = "hello\nworld\n";
        assert_eq!(head_tail_truncate(s), s);
    }

    #[test]
    fn head_tail_truncate_preserves_head_and_tail() {
        let mut lines: Vec<String> = vec!["BUILD START".to_string()];
        for i in 0..800 {
            lines.push(format!("middle line {i} padding padding padding padding"));
        }
        lines.push("BUILD ERROR".to_string());
        let content = lines.join("\n");
        let result = head_tail_truncate(&content);
        assert!(result.contains("BUILD START"));
        assert!(result.contains("BUILD ERROR"));
        assert!(result.contains("omitted"));
    }

    #[tokio::test]
    async fn read_file_returns_line_numbered_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        tokio::fs::write(&path, "a\nb\nc\n").await.unwrap();
        let t = ReadFileTool::default();
        let out = t
            .execute(&ToolCall { id: "1".into(), name: "read_file".into(), args: json!({"path": path.to_str()}) })
            .await;
        assert!(out.success);
        assert!(out.output.contains("L1:a"));
        assert!(out.output.contains("L3:c"));
    }

    #[tokio::test]
    async fn read_file_respects_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        tokio::fs::write(&path, "a\nb\nc\nd\ne\n").await.unwrap();
        let t = ReadFileTool::default();
        let out = t
            .execute(&ToolCall {
                id: "1".into(),
                name: "read_file".into(),
                args: json!({"path": path.to_str(), "offset": 2, "limit": 2}),
            })
            .await;
        assert!(out.output.contains("L2:b"));
        assert!(out.output.contains("L3:c"));
        assert!(!out.output.contains("L1:a"));
        assert!(out.output.contains("more lines"));
    }

    #[tokio::test]
    async fn read_file_missing_file_is_error() {
        let t = ReadFileTool::default();
        let out = t
            .execute(&ToolCall { id: "1".into(), name: "read_file".into(), args: json!({"path": "/no/such/file"}) })
            .await;
        assert!(!out.success);
    }

    #[test]
    fn read_file_is_non_mutating_and_auto_approved() {
        let t = ReadFileTool::default();
        assert!(!t.mutates());
        assert_eq!(t.default_policy(), ApprovalPolicy::Auto);
    }
}
