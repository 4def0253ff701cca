// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Deserialize;
use serde_json::Value;

use loom_model::error::InferenceError;
use loom_model::types::{StreamEvent, ToolCallDelta};

/// The literal sentinel line that closes the stream cleanly, distinct from
/// child exit or a `result` message.
pub const DONE_SENTINEL: &str = "done";

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<MessageBody>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    tool_use_id: Option<String>,
    #[serde(default)]
    content: Option<Value>,
}

/// Translates one JSON-lines message from the child process into zero or
/// more canonical `StreamEvent`s. `system` lines and unrecognised content
/// blocks produce no events.
pub fn parse_line(line: &str) -> Vec<Result<StreamEvent, InferenceError>> {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(e) => e,
        Err(e) => return vec![Err(InferenceError::Malformed(e.to_string()))],
    };

    match envelope.kind.as_str() {
        "assistant" => {
            let Some(message) = envelope.message else { return vec![] };
            let mut events = Vec::new();
            let mut prev_was_text = false;
            for (index, block) in message.content.iter().enumerate() {
                match block.kind.as_str() {
                    "text" => {
                        if let Some(text) = &block.text {
                            let text = if prev_was_text { format!("\n{text}") } else { text.clone() };
                            events.push(Ok(StreamEvent::text_delta(0, text)));
                        }
                        prev_was_text = true;
                    }
                    "thinking" => {
                        if let Some(thinking) = &block.thinking {
                            events.push(Ok(StreamEvent::reasoning_delta(0, thinking.clone())));
                        }
                        prev_was_text = false;
                    }
                    "tool_use" => {
                        let arguments = block.input.clone().unwrap_or(Value::Null).to_string();
                        events.push(Ok(StreamEvent::tool_call_delta(
                            0,
                            ToolCallDelta {
                                index: index as u32,
                                id: block.id.clone(),
                                name: block.name.clone(),
                                arguments_delta: Some(arguments),
                            },
                        )));
                        prev_was_text = false;
                    }
                    _ => {}
                }
            }
            events
        }
        "user" => {
            let Some(message) = envelope.message else { return vec![] };
            message
                .content
                .iter()
                .filter(|b| b.kind == "tool_result")
                .filter_map(|b| {
                    let tool_call_id = b.tool_use_id.clone()?;
                    let content = match &b.content {
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                        None => String::new(),
                    };
                    Some(Ok(StreamEvent::ToolResult { tool_call_id, content }))
                })
                .collect()
        }
        "result" => {
            let finish_reason = if envelope.is_error { "error" } else { "stop" };
            vec![Ok(StreamEvent::Stop { finish_reason: finish_reason.to_string() })]
        }
        "system" => vec![],
        other => vec![Err(InferenceError::Malformed(format!("unrecognised message type: {other}")))],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_text_block_becomes_text_delta() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}"#;
        let events = parse_line(line);
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            StreamEvent::Delta { text, .. } => assert_eq!(text.as_deref(), Some("hello")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn assistant_thinking_block_becomes_reasoning_delta() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"pondering"}]}}"#;
        let events = parse_line(line);
        match events[0].as_ref().unwrap() {
            StreamEvent::Delta { reasoning_text, .. } => assert_eq!(reasoning_text.as_deref(), Some("pondering")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn assistant_tool_use_block_becomes_tool_call_delta() {
        let line = r#"{"type":"assistant","message":{"content":[
            {"type":"tool_use","id":"call_1","name":"shell","input":{"shell_command":"ls"}}
        ]}}"#;
        let events = parse_line(line);
        match events[0].as_ref().unwrap() {
            StreamEvent::Delta { tool_call_delta: Some(delta), .. } => {
                assert_eq!(delta.id.as_deref(), Some("call_1"));
                assert_eq!(delta.name.as_deref(), Some("shell"));
                assert!(delta.arguments_delta.as_deref().unwrap().contains("shell_command"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn multiple_content_blocks_produce_multiple_events_in_order() {
        let line = r#"{"type":"assistant","message":{"content":[
            {"type":"text","text":"first"},
            {"type":"text","text":"second"}
        ]}}"#;
        let events = parse_line(line);
        assert_eq!(events.len(), 2);
        match events[1].as_ref().unwrap() {
            StreamEvent::Delta { text, .. } => assert_eq!(text.as_deref(), Some("\nsecond")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn user_tool_result_block_becomes_tool_result_event() {
        let line = r#"{"type":"user","message":{"content":[
            {"type":"tool_result","tool_use_id":"call_1","content":"42"}
        ]}}"#;
        let events = parse_line(line);
        match events[0].as_ref().unwrap() {
            StreamEvent::ToolResult { tool_call_id, content } => {
                assert_eq!(tool_call_id, "call_1");
                assert_eq!(content, "42");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn result_line_becomes_stop_event() {
        let line = r#"{"type":"result","total_cost_usd":0.01,"duration_ms":100,"num_turns":1,"is_error":false}"#;
        let events = parse_line(line);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].as_ref().unwrap(), StreamEvent::Stop { finish_reason } if finish_reason == "stop"));
    }

    #[test]
    fn result_line_with_error_flag_becomes_error_finish_reason() {
        let line = r#"{"type":"result","is_error":true}"#;
        let events = parse_line(line);
        assert!(matches!(events[0].as_ref().unwrap(), StreamEvent::Stop { finish_reason } if finish_reason == "error"));
    }

    #[test]
    fn system_line_produces_no_events() {
        let line = r#"{"type":"system","subtype":"init"}"#;
        assert!(parse_line(line).is_empty());
    }

    #[test]
    fn malformed_json_produces_malformed_error() {
        let events = parse_line("not json");
        assert!(matches!(events[0], Err(InferenceError::Malformed(_))));
    }

    #[test]
    fn unrecognised_type_produces_malformed_error() {
        let events = parse_line(r#"{"type":"mystery"}"#);
        assert!(matches!(events[0], Err(InferenceError::Malformed(_))));
    }
}
