// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use loom_config::AgentMode;

use crate::policy::ApprovalPolicy;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// The result of executing a tool, matching the ToolRegistry `Execute`
/// contract: errors inside a tool surface as `success=false` with a
/// descriptive `error`, never as a propagated exception that would abort
/// the turn.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub success: bool,
    pub output: String,
    /// Set when the call was never executed because approval was denied or
    /// the request was cancelled while awaiting approval.
    pub rejected: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, output: impl Into<String>, duration: Duration) -> Self {
        Self { call_id: call_id.into(), success: true, output: output.into(), rejected: false, duration, error: None }
    }

    pub fn err(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            call_id: call_id.into(),
            success: false,
            output: message.clone(),
            rejected: false,
            duration: Duration::ZERO,
            error: Some(message),
        }
    }

    pub fn rejected(call_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            output: reason.into(),
            rejected: true,
            duration: Duration::ZERO,
            error: None,
        }
    }
}

/// Describes the shape of a tool's text output for context-aware
/// truncation. When a tool result exceeds the configured token cap, the
/// scheduler's compaction logic uses this category to pick the right
/// extraction strategy rather than hard-coding tool names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal / process output: keep the first and last lines so both the
    /// command preamble and the final result survive truncation.
    HeadTail,
    /// Ordered match list: keep the leading matches, the highest-relevance
    /// results first.
    MatchList,
    /// File content: keep a head and tail window with a separator.
    FileContent,
    /// Generic text: hard-truncate at the character boundary.
    #[default]
    Generic,
}

/// Trait that every tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters.
    fn parameters_schema(&self) -> Value;
    /// Default approval level for this tool when no configured glob pattern
    /// matches the call.
    fn default_policy(&self) -> ApprovalPolicy;
    /// The agent modes in which this tool is available at all. Default: all
    /// modes. Plan mode additionally denies mutating tools at execution
    /// time even when they are listed here (see `ToolRegistry::requires_approval`).
    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Standard, AgentMode::AutoAccept, AgentMode::Plan]
    }
    /// Whether a successful call performs a mutation (file write, process
    /// spawn, network send). `plan` mode denies these outright.
    fn mutates(&self) -> bool {
        false
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    /// Execute the tool. Errors should be wrapped in `ToolOutput::err`, not
    /// propagated — the turn loop never aborts because of a tool failure.
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}
