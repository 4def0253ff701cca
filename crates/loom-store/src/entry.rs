// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loom_model::{Role, ToolCall};

/// Record of a single tool invocation, persisted alongside the tool-role
/// Entry it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub name: String,
    pub arguments: String,
    pub success: bool,
    pub rejected: bool,
    pub output: String,
    pub duration_ms: u64,
}

/// A single transcript position. Assistant entries carry `tool_calls` when
/// the model requested tool use; tool entries carry `tool_call_id` and an
/// execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Excluded from prompts assembled for the InferenceClient but still
    /// persisted and replayed (e.g. a reminder injection).
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub tool_execution: Option<ToolExecutionRecord>,
    /// Set on an assistant entry persisted from a cancelled turn, so a
    /// reloaded transcript still shows the turn was cut short.
    #[serde(default)]
    pub cancelled: bool,
}

impl Entry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            model: None,
            created_at: Utc::now(),
            hidden: false,
            tool_execution: None,
            cancelled: false,
        }
    }

    pub fn assistant(content: impl Into<String>, model: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            model,
            created_at: Utc::now(),
            hidden: false,
            tool_execution: None,
            cancelled: false,
        }
    }

    /// An assistant entry persisted from a turn the caller cancelled
    /// mid-stream, carrying whatever partial text had been produced.
    pub fn assistant_cancelled(content: impl Into<String>, model: Option<String>) -> Self {
        Self { cancelled: true, ..Self::assistant(content, model) }
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>, model: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls,
            tool_call_id: None,
            model,
            created_at: Utc::now(),
            hidden: false,
            tool_execution: None,
            cancelled: false,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, record: ToolExecutionRecord) -> Self {
        Self {
            role: Role::Tool,
            content: record.output.clone(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            model: None,
            created_at: Utc::now(),
            hidden: false,
            tool_execution: Some(record),
            cancelled: false,
        }
    }
}

/// Token accounting accumulated for a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenStats {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    pub request_count: u64,
}

/// Cost accounting accumulated for a conversation, in USD.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostStats {
    pub total_usd: f64,
}

/// Conversation-level metadata, persisted alongside the entry log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    #[serde(default)]
    pub token_stats: TokenStats,
    #[serde(default)]
    pub cost_stats: CostStats,
    pub model: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub title_generated: bool,
    #[serde(default)]
    pub title_invalidated: bool,
    #[serde(default)]
    pub title_generation_time: Option<DateTime<Utc>>,
}

impl Metadata {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: String::new(),
            created_at: now,
            updated_at: now,
            message_count: 0,
            token_stats: TokenStats::default(),
            cost_stats: CostStats::default(),
            model: None,
            tags: Vec::new(),
            summary: None,
            title_generated: false,
            title_invalidated: false,
            title_generation_time: None,
        }
    }

    /// Whether this conversation should be offered to a title-generation
    /// pass: no title yet generated (or a prior one invalidated), and at
    /// least one full exchange has happened.
    pub fn needs_title(&self) -> bool {
        (!self.title_generated || self.title_invalidated) && self.message_count >= 2
    }
}
