// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Streaming inference client abstraction (the InferenceClient component):
//! a provider-agnostic `StreamEvent` model and an OpenAI-compatible
//! HTTP/SSE backend. The subprocess-driven backend lives in the sibling
//! `loom-subprocess` crate so this crate stays free of process-management
//! dependencies.

pub mod error;
pub mod mock;
pub mod openai_compat;
pub mod provider;
pub mod types;

pub use error::InferenceError;
pub use openai_compat::{AuthStyle, OpenAiCompatClient};
pub use provider::{ClientOptions, EventStream, InferenceClient, Response};
pub use types::{
    CompletionRequest, Message, MessageContent, Role, StreamEvent, ToolCall, ToolCallAccumulator, ToolCallDelta,
    ToolSchema, Usage,
};
