// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Errors surfaced by the tool registry itself, as opposed to failures
/// inside a tool's own execution (those are carried in `ToolOutput::error`
/// and never propagate as a `Result::Err`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool call denied: {0}")]
    Denied(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_message_includes_name() {
        let err = ToolError::UnknownTool("frobnicate".into());
        assert!(err.to_string().contains("frobnicate"));
    }

    #[test]
    fn denied_message_includes_reason() {
        let err = ToolError::Denied("write is forbidden in plan mode".into());
        assert!(err.to_string().contains("plan mode"));
    }
}
