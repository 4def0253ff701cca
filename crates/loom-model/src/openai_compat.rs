// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI-compatible chat-completions HTTP/SSE backend for `InferenceClient`.
//!
//! Speaks the `POST /chat/completions` wire protocol shared by OpenAI,
//! DeepSeek, OpenRouter, Azure OpenAI, and llama.cpp-compatible local
//! servers, normalising their usage-accounting field variance into one
//! `Usage` shape and their tool-call delta shape into the index-keyed
//! `ToolCallDelta` every consumer accumulates the same way.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::error::InferenceError;
use crate::provider::{ClientOptions, EventStream, InferenceClient};
use crate::types::{CompletionRequest, Message, MessageContent, Role, StreamEvent, ToolCallDelta, Usage};

/// How the backend authenticates requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` — OpenAI, DeepSeek, OpenRouter.
    Bearer,
    /// A caller-named header carrying the raw key — Azure's `api-key`.
    ApiKeyHeader(&'static str),
    /// No authentication — local/self-hosted servers (llama.cpp, ollama).
    None,
}

#[derive(Clone)]
pub struct OpenAiCompatClient {
    driver_name: &'static str,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
    extra_headers: Vec<(String, String)>,
    auth_style: AuthStyle,
    extra_body: Value,
}

impl OpenAiCompatClient {
    pub fn new(
        driver_name: &'static str,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: u32,
        temperature: f32,
        extra_headers: Vec<(String, String)>,
        auth_style: AuthStyle,
        extra_body: Value,
    ) -> Self {
        let trimmed = base_url.trim_end_matches('/');
        Self {
            driver_name,
            model: model.into(),
            api_key,
            chat_url: format!("{trimmed}/chat/completions"),
            max_tokens,
            temperature,
            client: reqwest::Client::new(),
            extra_headers,
            auth_style,
            extra_body,
        }
    }

    /// For providers (Azure) whose chat endpoint is not a simple
    /// `base_url + /chat/completions` join.
    pub fn with_full_chat_url(
        driver_name: &'static str,
        model: impl Into<String>,
        api_key: Option<String>,
        chat_url: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
        extra_headers: Vec<(String, String)>,
        auth_style: AuthStyle,
        extra_body: Value,
    ) -> Self {
        Self {
            driver_name,
            model: model.into(),
            api_key,
            chat_url: chat_url.into(),
            max_tokens,
            temperature,
            client: reqwest::Client::new(),
            extra_headers,
            auth_style,
            extra_body,
        }
    }

    fn max_tokens_key(&self) -> &'static str {
        if self.driver_name == "openai" {
            "max_completion_tokens"
        } else {
            "max_tokens"
        }
    }

    /// Reasoning-class models (o1/o3/gpt-5 families) reject any temperature
    /// other than their fixed default.
    fn supports_temperature(&self) -> bool {
        let m = self.model.to_ascii_lowercase();
        !(m.starts_with("o1") || m.starts_with("o3") || m.starts_with("gpt-5"))
    }

    fn build_body(&self, req: &CompletionRequest) -> Value {
        let mut messages = build_openai_messages(&req.messages);
        if let Some(suffix) = &req.system_dynamic_suffix {
            if let Some(first) = messages.iter_mut().find(|m| m.get("role").and_then(Value::as_str) == Some("system")) {
                if let Some(content) = first.get("content").and_then(Value::as_str) {
                    let merged = format!("{content}\n\n{suffix}");
                    first["content"] = Value::String(merged);
                }
            } else {
                messages.insert(0, json!({"role": "system", "content": suffix}));
            }
        }

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            self.max_tokens_key(): self.max_tokens,
            "stream_options": {"include_usage": true},
        });
        if self.supports_temperature() {
            body["temperature"] = json!(self.temperature);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        if let Value::Object(extra) = &self.extra_body {
            if let Value::Object(map) = &mut body {
                for (k, v) in extra {
                    map.insert(k.clone(), v.clone());
                }
            }
        }
        body
    }
}

#[async_trait]
impl InferenceClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn configure(&self, options: ClientOptions) -> Box<dyn InferenceClient> {
        let mut extra_body = self.extra_body.clone();
        if let (Value::Object(dst), Value::Object(src)) = (&mut extra_body, &options.middleware) {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
        }
        Box::new(Self { extra_body, ..self.clone() })
    }

    async fn generate_stream(&self, messages: Vec<Message>) -> Result<EventStream, InferenceError> {
        let req = CompletionRequest { messages, tools: vec![], stream: true, system_dynamic_suffix: None };
        let body = self.build_body(&req);

        let mut builder = self.client.post(&self.chat_url).json(&body);
        builder = match &self.auth_style {
            AuthStyle::Bearer => builder.bearer_auth(self.api_key.clone().unwrap_or_default()),
            AuthStyle::ApiKeyHeader(name) => builder.header(*name, self.api_key.clone().unwrap_or_default()),
            AuthStyle::None => builder,
        };
        for (k, v) in &self.extra_headers {
            builder = builder.header(k, v);
        }

        let resp = builder.send().await.map_err(|e| InferenceError::Unreachable(e.to_string()))?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(InferenceError::AuthFailed);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(InferenceError::RateLimited { retry_after_secs: None });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(InferenceError::ProviderError { payload: format!("{} error {status}: {text}", self.driver_name) });
        }

        let byte_stream = resp.bytes_stream();
        let stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events = match chunk {
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(InferenceError::Unreachable(e.to_string()))],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }
}

/// Extracts every complete (`\n`-terminated) line from `buf`, leaving any
/// trailing partial line in place for the next chunk. This is the one
/// mechanism standing between a tool-call argument split across two TCP
/// segments and a corrupted JSON payload: parsing a line before its
/// terminator has arrived truncates mid-token and silently drops bytes.
fn drain_complete_sse_lines(buf: &mut String) -> Vec<Result<StreamEvent, InferenceError>> {
    let mut out = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let mut line: String = buf.drain(..=nl_pos).collect();
        line.pop(); // trailing \n
        if line.ends_with('\r') {
            line.pop();
        }
        if let Some(event) = parse_sse_data_line(&line) {
            out.push(event);
        }
    }
    out
}

fn parse_sse_data_line(line: &str) -> Option<Result<StreamEvent, InferenceError>> {
    let data = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        // SSE-level terminator, distinct from the Stop event derived from the
        // last finish_reason-bearing chunk. No event is produced here; the
        // prior chunk already carried the Stop.
        return None;
    }
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(Err(InferenceError::Malformed(e.to_string()))),
    };
    Some(parse_sse_chunk(&value))
}

fn parse_sse_chunk(v: &Value) -> Result<StreamEvent, InferenceError> {
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let input_tokens = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
        let output_tokens = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
        let cache_read_tokens = usage
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(Value::as_u64)
            .or_else(|| usage.get("prompt_cache_hit_tokens").and_then(Value::as_u64))
            .unwrap_or(0) as u32;
        return Ok(StreamEvent::Usage(Usage { input_tokens, output_tokens, cache_read_tokens, cache_write_tokens: 0 }));
    }
    if let Some(timings) = v.get("timings") {
        let cache_n = timings.get("cache_n").and_then(Value::as_u64).unwrap_or(0) as u32;
        let prompt_n = timings.get("prompt_n").and_then(Value::as_u64).unwrap_or(0) as u32;
        let predicted_n = timings.get("predicted_n").and_then(Value::as_u64).unwrap_or(0) as u32;
        return Ok(StreamEvent::Usage(Usage {
            input_tokens: cache_n + prompt_n,
            output_tokens: predicted_n,
            cache_read_tokens: cache_n,
            cache_write_tokens: 0,
        }));
    }

    let choice = v.get("choices").and_then(|c| c.get(0));
    let choice_index = choice.and_then(|c| c.get("index")).and_then(Value::as_u64).unwrap_or(0) as u32;

    if let Some(finish_reason) = choice.and_then(|c| c.get("finish_reason")).and_then(Value::as_str) {
        return Ok(StreamEvent::Stop { finish_reason: finish_reason.to_string() });
    }

    let delta = choice.and_then(|c| c.get("delta"));

    if let Some(tool_call) = delta.and_then(|d| d.get("tool_calls")).and_then(|t| t.get(0)) {
        let index = tool_call.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
        let id = tool_call.get("id").and_then(Value::as_str).map(str::to_string);
        let function = tool_call.get("function");
        let name = function.and_then(|f| f.get("name")).and_then(Value::as_str).map(str::to_string);
        let arguments_delta = function.and_then(|f| f.get("arguments")).and_then(Value::as_str).map(str::to_string);
        return Ok(StreamEvent::tool_call_delta(choice_index, ToolCallDelta { index, id, name, arguments_delta }));
    }

    let reasoning = delta
        .and_then(|d| d.get("reasoning_content"))
        .or_else(|| delta.and_then(|d| d.get("reasoning")))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    if let Some(r) = reasoning {
        return Ok(StreamEvent::reasoning_delta(choice_index, r));
    }

    let text = delta.and_then(|d| d.get("content")).and_then(Value::as_str).unwrap_or("");
    Ok(StreamEvent::text_delta(choice_index, text))
}

fn role_str(r: Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Converts internal messages to OpenAI wire JSON. Consecutive
/// assistant/tool-call messages are left as separate entries here — the
/// scheduler is responsible for emitting exactly one assistant message per
/// completed turn, so no coalescing is required on this side.
fn build_openai_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match &m.content {
            MessageContent::Text(t) => json!({"role": role_str(m.role), "content": t}),
            MessageContent::ToolCalls(calls) => {
                let tool_calls: Vec<Value> = calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {"name": c.name, "arguments": c.arguments},
                        })
                    })
                    .collect();
                json!({"role": "assistant", "content": Value::Null, "tool_calls": tool_calls})
            }
            MessageContent::ToolResult { tool_call_id, content } => {
                json!({"role": "tool", "tool_call_id": tool_call_id, "content": content})
            }
        })
        .collect()
}
