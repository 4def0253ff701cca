// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use loom_config::AgentMode;

/// Maps the host agent's mode onto the child CLI's permission-mode flag
/// value. `Standard` is the catch-all default.
fn permission_mode_flag(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Standard => "default",
        AgentMode::AutoAccept => "bypassPermissions",
        AgentMode::Plan => "plan",
    }
}

/// Deterministic argument construction from the four inputs the spec names:
/// model, turn cap, permission mode, and whether the host supplies its own
/// tool set. When the host supplies tools, the child is told to disallow
/// all of its own — the host's ToolRegistry is the single source of truth.
pub fn build_args(model: &str, turn_cap: u32, mode: AgentMode, tool_set_nonempty: bool) -> Vec<String> {
    let mut args = vec![
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--input-format".to_string(),
        "stream-json".to_string(),
        "--model".to_string(),
        model.to_string(),
        "--max-turns".to_string(),
        turn_cap.to_string(),
        "--permission-mode".to_string(),
        permission_mode_flag(mode).to_string(),
    ];
    if tool_set_nonempty {
        args.push("--disallowed-tools".to_string());
        args.push("*".to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_mode_maps_to_default_permission() {
        let args = build_args("gpt-4o", 50, AgentMode::Standard, false);
        let idx = args.iter().position(|a| a == "--permission-mode").unwrap();
        assert_eq!(args[idx + 1], "default");
    }

    #[test]
    fn auto_accept_mode_maps_to_bypass_permissions() {
        let args = build_args("gpt-4o", 50, AgentMode::AutoAccept, false);
        let idx = args.iter().position(|a| a == "--permission-mode").unwrap();
        assert_eq!(args[idx + 1], "bypassPermissions");
    }

    #[test]
    fn plan_mode_maps_to_plan_permission() {
        let args = build_args("gpt-4o", 50, AgentMode::Plan, false);
        let idx = args.iter().position(|a| a == "--permission-mode").unwrap();
        assert_eq!(args[idx + 1], "plan");
    }

    #[test]
    fn nonempty_tool_set_disallows_child_tools() {
        let args = build_args("gpt-4o", 50, AgentMode::Standard, true);
        assert!(args.windows(2).any(|w| w[0] == "--disallowed-tools" && w[1] == "*"));
    }

    #[test]
    fn empty_tool_set_omits_disallow_flag() {
        let args = build_args("gpt-4o", 50, AgentMode::Standard, false);
        assert!(!args.iter().any(|a| a == "--disallowed-tools"));
    }

    #[test]
    fn turn_cap_and_model_are_passed_through() {
        let args = build_args("my-model", 123, AgentMode::Standard, false);
        let model_idx = args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(args[model_idx + 1], "my-model");
        let cap_idx = args.iter().position(|a| a == "--max-turns").unwrap();
        assert_eq!(args[cap_idx + 1], "123");
    }

    #[test]
    fn build_args_is_deterministic() {
        let a = build_args("m", 1, AgentMode::Plan, true);
        let b = build_args("m", 1, AgentMode::Plan, true);
        assert_eq!(a, b);
    }
}
