// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use crate::error::InferenceError;
use crate::types::{CompletionRequest, Message, StreamEvent, ToolCallAccumulator, ToolSchema};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, InferenceError>> + Send>>;

/// A materialised, non-streaming reply collapsed from an `EventStream`.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub text: String,
    pub reasoning_text: String,
    pub tool_calls: Vec<crate::types::ToolCall>,
    pub finish_reason: Option<String>,
}

/// Client-side configuration handed to `Configure`; produces a new,
/// independent view rather than mutating the original — callers may hold
/// several configured views of the same underlying client concurrently.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub tools: Vec<ToolSchema>,
    /// Opaque driver-specific tuning values (temperature overrides, extra
    /// request body fields); interpreted by the concrete backend.
    pub middleware: serde_json::Value,
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Human-readable identifier for status display and logging.
    fn name(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Returns a new client view configured with `options`; the receiver is
    /// left untouched.
    fn configure(&self, options: ClientOptions) -> Box<dyn InferenceClient>;

    /// The canonical streaming primitive. Implementations must deliver
    /// events in production order and close the stream promptly once the
    /// caller drops it or cancels the ambient context.
    async fn generate_stream(&self, messages: Vec<Message>) -> Result<EventStream, InferenceError>;

    /// Consumes `generate_stream` to completion and collapses it into one
    /// `Response`. The default implementation is the canonical realisation
    /// of `GenerateSync`; backends needing a genuinely distinct non-streaming
    /// API path may override it.
    async fn generate_sync(&self, messages: Vec<Message>) -> Result<Response, InferenceError> {
        let mut stream = self.generate_stream(messages).await?;
        let mut response = Response::default();
        let mut acc = ToolCallAccumulator::new();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Delta { text, reasoning_text, tool_call_delta, .. } => {
                    if let Some(t) = text {
                        response.text.push_str(&t);
                    }
                    if let Some(r) = reasoning_text {
                        response.reasoning_text.push_str(&r);
                    }
                    if let Some(delta) = tool_call_delta {
                        acc.push(&delta);
                    }
                }
                StreamEvent::ToolResult { .. } | StreamEvent::Usage(_) => {}
                StreamEvent::Error { message } => return Err(InferenceError::ProviderError { payload: message }),
                StreamEvent::Stop { finish_reason } => {
                    response.finish_reason = Some(finish_reason);
                    break;
                }
            }
        }
        response.tool_calls = acc.drain_ordered();
        Ok(response)
    }

    /// Waits for all background workers (stream readers, child processes) to
    /// exit. The default implementation is a no-op for stateless backends.
    async fn shutdown(&self) {}
}
