// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

/// Top-level configuration surface handed to constructors by the host
/// binary. Nothing under this type is re-parsed or re-validated once the
/// AgentScheduler, ToolRegistry, InferenceClient, and ConversationStore are
/// constructed from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub subprocess: SubprocessConfig,
    pub storage: StorageConfig,
}

/// Inference provider selection and connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: String,
    pub name: String,
    pub api_key_env: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Provider context window in tokens, used as the denominator for the
    /// scheduler's proactive compaction threshold. Not validated against
    /// the provider; an operator pointing at a different model updates
    /// this alongside `name`.
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    /// Opaque provider-specific body fields merged into every request —
    /// the `middleware`/`options` surface of the InferenceClient capability
    /// set (`Configure{options, tools, middleware}`).
    pub driver_options: serde_json::Value,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o".into(),
            api_key_env: Some("OPENAI_API_KEY".into()),
            api_key: None,
            base_url: Some("https://api.openai.com/v1".into()),
            max_tokens: 4096,
            temperature: 0.2,
            context_window: default_context_window(),
            driver_options: serde_json::Value::Null,
        }
    }
}

fn default_context_window() -> u32 {
    128_000
}

fn default_turn_cap() -> u32 {
    200
}

fn default_reminder_interval() -> u32 {
    4
}

fn default_system_prompt_standard() -> String {
    "You are an interactive coding agent. Use tools when they help; otherwise answer directly.".into()
}

fn default_system_prompt_plan() -> String {
    "You are in planning mode. Investigate freely but do not make mutating changes; present a plan for approval."
        .into()
}

fn default_compaction_threshold() -> f32 {
    0.85
}

fn default_compaction_keep_recent() -> usize {
    6
}

fn default_compaction_overhead_reserve() -> f32 {
    0.10
}

fn default_tool_result_token_cap() -> usize {
    4000
}

/// The agent mode the AgentScheduler and ToolRegistry gate tool approval
/// and availability against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    Standard,
    AutoAccept,
    Plan,
}

impl Default for AgentMode {
    fn default() -> Self {
        AgentMode::Standard
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentMode::Standard => "standard",
            AgentMode::AutoAccept => "auto_accept",
            AgentMode::Plan => "plan",
        };
        write!(f, "{s}")
    }
}

/// Periodic system-role reminder injection, per §4.6's reminder-cadence
/// contract (not counted as a turn, flagged `hidden=true`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemindersConfig {
    pub enabled: bool,
    #[serde(default = "default_reminder_interval")]
    pub interval: u32,
    pub text: String,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self { enabled: false, interval: default_reminder_interval(), text: String::new() }
    }
}

/// Compaction strategy used when the scheduler's proactive budget estimate
/// crosses the configured threshold. `Structured` drops whole entries;
/// `Narrative` replaces a dropped prefix with one LLM-generated summary
/// entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    Structured,
    Narrative,
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        CompactionStrategy::Structured
    }
}

impl std::fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionStrategy::Structured => write!(f, "structured"),
            CompactionStrategy::Narrative => write!(f, "narrative"),
        }
    }
}

/// Turn-loop and budget-management configuration consumed by the
/// AgentScheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub default_mode: AgentMode,
    #[serde(default = "default_turn_cap")]
    pub turn_cap: u32,
    pub reminders: RemindersConfig,
    #[serde(default = "default_system_prompt_standard")]
    pub system_prompt_standard: String,
    #[serde(default = "default_system_prompt_plan")]
    pub system_prompt_plan: String,
    /// Fraction of the usable input budget (context window minus reserved
    /// output) at which proactive compaction triggers.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    /// Number of most-recent entries never considered for eviction.
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    pub compaction_strategy: CompactionStrategy,
    /// Fraction of the usable budget subtracted from the trigger threshold
    /// to leave headroom for the compaction summary itself.
    #[serde(default = "default_compaction_overhead_reserve")]
    pub compaction_overhead_reserve: f32,
    #[serde(default = "default_tool_result_token_cap")]
    pub tool_result_token_cap: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_mode: AgentMode::default(),
            turn_cap: default_turn_cap(),
            reminders: RemindersConfig::default(),
            system_prompt_standard: default_system_prompt_standard(),
            system_prompt_plan: default_system_prompt_plan(),
            compaction_threshold: default_compaction_threshold(),
            compaction_keep_recent: default_compaction_keep_recent(),
            compaction_strategy: CompactionStrategy::default(),
            compaction_overhead_reserve: default_compaction_overhead_reserve(),
            tool_result_token_cap: default_tool_result_token_cap(),
        }
    }
}

fn default_auto_approve_patterns() -> Vec<String> {
    vec!["cat *".into(), "ls *".into(), "find *".into(), "rg *".into(), "grep *".into()]
}

fn default_deny_patterns() -> Vec<String> {
    vec!["rm -rf /*".into(), "dd if=*".into()]
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// Per-tool approval policy, compiled to anchored regular expressions at
/// `ToolRegistry` construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    #[serde(default = "default_auto_approve_patterns")]
    pub auto_approve_patterns: Vec<String>,
    #[serde(default = "default_deny_patterns")]
    pub deny_patterns: Vec<String>,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: default_auto_approve_patterns(),
            deny_patterns: default_deny_patterns(),
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_cli_path() -> String {
    "loom-cli".into()
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_stripped_env_vars() -> Vec<String> {
    vec!["OPENAI_API_KEY".into(), "ANTHROPIC_API_KEY".into()]
}

/// Configuration for the SubprocessAdapter InferenceClient backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubprocessConfig {
    #[serde(default = "default_cli_path")]
    pub cli_path: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    pub thinking_budget: Option<u32>,
    #[serde(default = "default_stripped_env_vars")]
    pub stripped_env_vars: Vec<String>,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            cli_path: default_cli_path(),
            max_output_tokens: default_max_output_tokens(),
            thinking_budget: None,
            stripped_env_vars: default_stripped_env_vars(),
        }
    }
}

fn default_storage_backend() -> String {
    "journal".into()
}

/// Storage backend selection. `backend_specific` is interpreted by the
/// chosen backend's constructor only (e.g. the journal backend reads a
/// `directory` key).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    pub backend_specific: serde_json::Value,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { backend: default_storage_backend(), backend_specific: serde_json::Value::Null }
    }
}

/// Hard-fails construction when the merged configuration cannot possibly
/// produce a working scheduler; this is the "validated once" step of the
/// layered loader's contract.
pub fn validate(config: &Config) -> Result<(), String> {
    if config.agent.turn_cap == 0 {
        return Err("agent.turn_cap must be greater than zero".into());
    }
    if config.agent.reminders.enabled && config.agent.reminders.interval == 0 {
        return Err("agent.reminders.interval must be greater than zero when reminders are enabled".into());
    }
    let known_backends = ["journal", "relational", "kv", "memory"];
    if !known_backends.contains(&config.storage.backend.as_str()) {
        return Err(format!("storage.backend {:?} is not one of {known_backends:?}", config.storage.backend));
    }
    if config.model.provider == "subprocess" && config.subprocess.cli_path.is_empty() {
        return Err("subprocess.cli_path must be non-empty when the subprocess adapter is selected".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn default_model_config_targets_openai() {
        assert_eq!(ModelConfig::default().provider, "openai");
    }

    #[test]
    fn zero_turn_cap_fails_validation() {
        let mut cfg = Config::default();
        cfg.agent.turn_cap = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn reminders_enabled_with_zero_interval_fails_validation() {
        let mut cfg = Config::default();
        cfg.agent.reminders.enabled = true;
        cfg.agent.reminders.interval = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn unknown_storage_backend_fails_validation() {
        let mut cfg = Config::default();
        cfg.storage.backend = "mongo".into();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn subprocess_provider_with_empty_cli_path_fails_validation() {
        let mut cfg = Config::default();
        cfg.model.provider = "subprocess".into();
        cfg.subprocess.cli_path = String::new();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn subprocess_provider_with_cli_path_validates() {
        let mut cfg = Config::default();
        cfg.model.provider = "subprocess".into();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn agent_mode_display_matches_wire_tokens() {
        assert_eq!(AgentMode::Standard.to_string(), "standard");
        assert_eq!(AgentMode::AutoAccept.to_string(), "auto_accept");
        assert_eq!(AgentMode::Plan.to_string(), "plan");
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let yaml = "agent:\n  turn_cap: 50\n";
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let cfg: Config = serde_yaml::from_value(value).unwrap();
        assert_eq!(cfg.agent.turn_cap, 50);
        assert_eq!(cfg.agent.reminders.interval, default_reminder_interval());
        assert_eq!(cfg.model.provider, "openai");
    }

    #[test]
    fn tools_config_round_trips_through_yaml() {
        let cfg = ToolsConfig::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: ToolsConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg.auto_approve_patterns, back.auto_approve_patterns);
    }
}
