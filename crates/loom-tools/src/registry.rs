// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use loom_config::AgentMode;

use crate::error::ToolError;
use crate::policy::{ApprovalPolicy, ToolPolicy};
use crate::{Tool, ToolCall, ToolOutput};

/// A tool schema — mirrors `loom_model::ToolSchema` but keeps this crate
/// independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// What a call needs before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    NotRequired,
    Required,
    /// The tool is forbidden in the current mode or by a deny pattern; no
    /// approval prompt is offered, the call is simply refused.
    Denied,
}

/// Central registry holding all available tools. Dynamically registered
/// tool groups (e.g. tools contributed by an external capability server)
/// are tracked by group name so the whole group can later be removed as a
/// unit.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    groups: HashMap<String, Vec<String>>,
}

// SAFETY: ToolRegistry is Sync because:
// - HashMap<String, Arc<dyn Tool>> is Sync (String is Sync, Arc<T: Send + Sync> is Sync)
// - Tools implement Send + Sync (required by the Tool trait)
// - No interior mutability exists after construction (all methods take &self
//   except registration, which requires &mut self)
unsafe impl Sync for ToolRegistry {}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new(), groups: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Registers a set of tools under `group_name`. Returns the count
    /// registered.
    pub fn register_group(&mut self, group_name: impl Into<String>, tools: Vec<Arc<dyn Tool>>) -> usize {
        let group_name = group_name.into();
        let mut names = Vec::with_capacity(tools.len());
        for tool in tools {
            names.push(tool.name().to_string());
            self.tools.insert(tool.name().to_string(), tool);
        }
        let count = names.len();
        self.groups.insert(group_name, names);
        count
    }

    /// Removes every tool registered under `group_name`. Returns the count
    /// removed (tools re-registered individually under the same name after
    /// group registration are left alone, since they are no longer part of
    /// the tracked group).
    pub fn remove_group(&mut self, group_name: &str) -> usize {
        let Some(names) = self.groups.remove(group_name) else { return 0 };
        let mut removed = 0;
        for name in names {
            if self.tools.remove(&name).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools.get(name).cloned().ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Produce schemas for ALL registered tools (mode-unfiltered).
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.schemas_matching(|_| true)
    }

    /// Produce schemas only for tools available in the given mode.
    pub fn schemas_for_mode(&self, mode: AgentMode) -> Vec<ToolSchema> {
        self.schemas_matching(|t| t.modes().contains(&mode))
    }

    fn schemas_matching(&self, pred: impl Fn(&Arc<dyn Tool>) -> bool) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| pred(t))
            .map(|t| ToolSchema { name: t.name().to_string(), description: t.description().to_string(), parameters: t.parameters_schema() })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Determines whether `call` needs approval before running, per the
    /// mode-gating contract: `auto_accept` suppresses approval entirely,
    /// `plan` denies mutating tools outright, `standard` defers to the
    /// compiled glob policy.
    pub fn requires_approval(&self, tool: &dyn Tool, mode: AgentMode, policy: &ToolPolicy, command_repr: &str) -> ApprovalOutcome {
        if mode == AgentMode::Plan && tool.mutates() {
            return ApprovalOutcome::Denied;
        }
        if mode == AgentMode::AutoAccept {
            return ApprovalOutcome::NotRequired;
        }
        match policy.decide(command_repr) {
            ApprovalPolicy::Auto => ApprovalOutcome::NotRequired,
            ApprovalPolicy::Ask => ApprovalOutcome::Required,
            ApprovalPolicy::Deny => ApprovalOutcome::Denied,
        }
    }

    /// Dispatches `call` to its handler. Errors inside a tool are captured
    /// as `success=false` — they never propagate and never end the turn.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let tool = match self.tools.get(&call.name) {
            Some(tool) => tool.clone(),
            None => return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        };
        let start = Instant::now();
        let mut output = tool.execute(call).await;
        output.duration = start.elapsed();
        output
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn names_for_mode(&self, mode: AgentMode) -> Vec<String> {
        let mut names: Vec<String> = self.tools.values().filter(|t| t.modes().contains(&mode)).map(|t| t.name().to_string()).collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
