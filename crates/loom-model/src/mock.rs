// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::error::InferenceError;
use crate::provider::{ClientOptions, EventStream, InferenceClient};
use crate::types::{Message, Role, StreamEvent};

/// Deterministic client for tests. Echoes the last user message back as the
/// assistant response and terminates with `Stop`.
#[derive(Default, Clone)]
pub struct EchoClient;

#[async_trait]
impl InferenceClient for EchoClient {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn configure(&self, _options: ClientOptions) -> Box<dyn InferenceClient> {
        Box::new(self.clone())
    }

    async fn generate_stream(&self, messages: Vec<Message>) -> Result<EventStream, InferenceError> {
        let reply = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();

        let events: Vec<Result<StreamEvent, InferenceError>> = vec![
            Ok(StreamEvent::text_delta(0, format!("echo: {reply}"))),
            Ok(StreamEvent::Stop { finish_reason: "stop".into() }),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted client. Each call to `generate_stream` pops the next
/// event sequence from the front of the queue, letting tests specify exact
/// StreamEvent orderings — including fragmented tool-call deltas — with no
/// network access, per the hand-built-fake test-tooling convention.
pub struct ScriptedClient {
    scripts: Arc<Mutex<Vec<Vec<StreamEvent>>>>,
    pub last_request: Arc<Mutex<Option<Vec<Message>>>>,
}

impl ScriptedClient {
    /// `scripts` is the ordered list of calls; each inner `Vec` is the
    /// sequence of events emitted for that call.
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self { scripts: Arc::new(Mutex::new(scripts)), last_request: Arc::new(Mutex::new(None)) }
    }
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn configure(&self, _options: ClientOptions) -> Box<dyn InferenceClient> {
        Box::new(Self { scripts: self.scripts.clone(), last_request: self.last_request.clone() })
    }

    async fn generate_stream(&self, messages: Vec<Message>) -> Result<EventStream, InferenceError> {
        *self.last_request.lock().unwrap() = Some(messages);
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            return Err(InferenceError::ProviderError { payload: "scripted client exhausted".into() });
        }
        let script = scripts.remove(0);
        let events: Vec<Result<StreamEvent, InferenceError>> = script.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn echo_client_prefixes_last_user_message() {
        let client = EchoClient;
        let mut stream = client.generate_stream(vec![Message::user("hello")]).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, StreamEvent::text_delta(0, "echo: hello"));
    }

    #[tokio::test]
    async fn scripted_client_pops_scripts_in_call_order() {
        let client = ScriptedClient::new(vec![
            vec![StreamEvent::text_delta(0, "first"), StreamEvent::Stop { finish_reason: "stop".into() }],
            vec![StreamEvent::text_delta(0, "second"), StreamEvent::Stop { finish_reason: "stop".into() }],
        ]);
        let mut s1 = client.generate_stream(vec![]).await.unwrap();
        assert_eq!(s1.next().await.unwrap().unwrap(), StreamEvent::text_delta(0, "first"));
        let mut s2 = client.generate_stream(vec![]).await.unwrap();
        assert_eq!(s2.next().await.unwrap().unwrap(), StreamEvent::text_delta(0, "second"));
    }

    #[tokio::test]
    async fn scripted_client_records_last_request() {
        let client = ScriptedClient::new(vec![vec![StreamEvent::Stop { finish_reason: "stop".into() }]]);
        let _ = client.generate_stream(vec![Message::user("hi")]).await.unwrap();
        assert_eq!(client.last_request.lock().unwrap().as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_scripted_client_returns_provider_error() {
        let client = ScriptedClient::new(vec![]);
        assert!(client.generate_stream(vec![]).await.is_err());
    }
}
