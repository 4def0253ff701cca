// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Resolves `ApprovalOutcome::Required` tool calls and plan-ready checkpoints
//! for a host with no interactive operator attached. A real UI would prompt
//! a human and answer truthfully; a headless host must pick a policy up
//! front instead.

use async_trait::async_trait;

/// Decides pending approvals when no interactive operator is present.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    /// Whether a tool call gated `Required` by the registry may proceed.
    async fn request_tool_approval(&self, call_id: &str, tool_name: &str, command_repr: &str) -> bool;

    /// Whether a submitted plan may be acted upon.
    async fn request_plan_approval(&self, plan_text: &str) -> bool;
}

/// Denies every pending approval. The safe default: a headless run with no
/// operator should never silently perform a mutating action it couldn't
/// auto-approve through the configured policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDenyApproval;

#[async_trait]
impl ApprovalChannel for AutoDenyApproval {
    async fn request_tool_approval(&self, _call_id: &str, _tool_name: &str, _command_repr: &str) -> bool {
        false
    }

    async fn request_plan_approval(&self, _plan_text: &str) -> bool {
        false
    }
}

/// Approves every pending approval. Opt-in only, for hosts explicitly run
/// with an auto-accept flag; equivalent in effect to `AgentMode::AutoAccept`
/// but also covers the plan-approval checkpoint that mode gating doesn't
/// reach.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApproveApproval;

#[async_trait]
impl ApprovalChannel for AutoApproveApproval {
    async fn request_tool_approval(&self, _call_id: &str, _tool_name: &str, _command_repr: &str) -> bool {
        true
    }

    async fn request_plan_approval(&self, _plan_text: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_deny_refuses_both_kinds_of_approval() {
        let ch = AutoDenyApproval;
        assert!(!ch.request_tool_approval("c1", "shell", "rm -rf /").await);
        assert!(!ch.request_plan_approval("do the thing").await);
    }

    #[tokio::test]
    async fn auto_approve_grants_both_kinds_of_approval() {
        let ch = AutoApproveApproval;
        assert!(ch.request_tool_approval("c1", "shell", "ls").await);
        assert!(ch.request_plan_approval("do the thing").await);
    }
}
