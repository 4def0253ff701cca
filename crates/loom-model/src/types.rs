//! Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//!
//! SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// A role a transcript message is attributed to, mirrored from the
/// conversation-store Entry role so the two crates never drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call reconstructed from accumulated stream deltas, or supplied by
/// the caller when replaying a past turn back into a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-serialised arguments object.
    pub arguments: String,
}

/// One message in the outgoing request, in wire-agnostic form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: MessageContent::Text(text.into()) }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::ToolCalls(calls) }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult { tool_call_id: tool_call_id.into(), content: content.into() },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            _ => None,
        }
    }

    /// 4-chars-per-token heuristic used for proactive budget estimation.
    /// Not a provider-accurate count — calibrated at the scheduler layer
    /// against real `Usage` events, per the budget-awareness contract.
    pub fn approx_tokens(&self) -> u32 {
        let char_count = match &self.content {
            MessageContent::Text(t) => t.chars().count(),
            MessageContent::ToolCalls(calls) => calls
                .iter()
                .map(|c| c.name.chars().count() + c.arguments.chars().count() + 8)
                .sum(),
            MessageContent::ToolResult { content, .. } => content.chars().count(),
        };
        ((char_count as u32) / 4).max(1)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    #[serde(default)]
    pub stream: bool,
    /// Text appended to the first system message at submission time; kept
    /// separate from stored messages so reminders never get persisted twice.
    #[serde(default)]
    pub system_dynamic_suffix: Option<String>,
}

/// A fragment of a tool call under construction. The first delta at a given
/// `index` fixes `id`/`name`; later deltas at the same index append to
/// `arguments_delta` only. Accumulation is always keyed by `index`, never by
/// `id`, because continuation deltas are not guaranteed to repeat it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_delta: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_write_tokens: u32,
}

/// The event produced by a `GenerateStream` call. A finite, ordered,
/// single-consumer sequence terminated by exactly one of `Stop`/`Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    Delta {
        choice_index: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_delta: Option<ToolCallDelta>,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
    /// Ambient, provider-normalised usage accounting. Not part of the
    /// distilled contract's terminal-event pair, but required to calibrate
    /// the scheduler's proactive-compaction token estimate.
    Usage(Usage),
    Error {
        message: String,
    },
    Stop {
        finish_reason: String,
    },
}

impl StreamEvent {
    pub fn text_delta(choice_index: u32, text: impl Into<String>) -> Self {
        Self::Delta { choice_index, text: Some(text.into()), reasoning_text: None, tool_call_delta: None }
    }

    pub fn reasoning_delta(choice_index: u32, text: impl Into<String>) -> Self {
        Self::Delta { choice_index, text: None, reasoning_text: Some(text.into()), tool_call_delta: None }
    }

    pub fn tool_call_delta(choice_index: u32, delta: ToolCallDelta) -> Self {
        Self::Delta { choice_index, text: None, reasoning_text: None, tool_call_delta: Some(delta) }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Stop { .. } | StreamEvent::Error { .. })
    }
}

/// Accumulates tool-call deltas keyed by `index` across a stream, per the
/// uniform accumulation rule shared by both InferenceClient implementations.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    by_index: std::collections::BTreeMap<u32, ToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &ToolCallDelta) {
        let entry = self.by_index.entry(delta.index).or_insert_with(|| ToolCall {
            id: String::new(),
            name: String::new(),
            arguments: String::new(),
        });
        if let Some(id) = &delta.id {
            entry.id = id.clone();
        }
        if let Some(name) = &delta.name {
            entry.name = name.clone();
        }
        if let Some(chunk) = &delta.arguments_delta {
            entry.arguments.push_str(chunk);
        }
    }

    /// Drains accumulated calls in ascending index order, per the Stop-time
    /// emission contract.
    pub fn drain_ordered(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.by_index).into_values().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_tokens_text_scales_with_length() {
        let m = Message::user("a".repeat(40));
        assert_eq!(m.approx_tokens(), 10);
    }

    #[test]
    fn approx_tokens_never_zero_for_nonempty() {
        let m = Message::user("hi");
        assert!(m.approx_tokens() >= 1);
    }

    #[test]
    fn accumulator_joins_fragmented_arguments_by_index() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&ToolCallDelta { index: 0, id: Some("c".into()), name: Some("X".into()), arguments_delta: Some("{\"a\":".into()) });
        acc.push(&ToolCallDelta { index: 0, id: None, name: None, arguments_delta: Some("1}".into()) });
        let calls = acc.drain_ordered();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c");
        assert_eq!(calls[0].name, "X");
        assert_eq!(calls[0].arguments, "{\"a\":1}");
    }

    #[test]
    fn accumulator_emits_in_ascending_index_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&ToolCallDelta { index: 2, id: Some("c2".into()), name: Some("Z".into()), arguments_delta: Some("{}".into()) });
        acc.push(&ToolCallDelta { index: 0, id: Some("c0".into()), name: Some("A".into()), arguments_delta: Some("{}".into()) });
        let calls = acc.drain_ordered();
        assert_eq!(calls.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["c0", "c2"]);
    }

    #[test]
    fn drain_ordered_clears_the_accumulator() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&ToolCallDelta { index: 0, id: Some("c".into()), name: Some("X".into()), arguments_delta: Some("{}".into()) });
        let _ = acc.drain_ordered();
        assert!(acc.is_empty());
    }

    #[test]
    fn message_round_trips_through_json() {
        let m = Message::assistant_tool_calls(vec![ToolCall { id: "1".into(), name: "shell".into(), arguments: "{}".into() }]);
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
    }
}
