// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Drives a child CLI process as a drop-in `InferenceClient`, translating
//! its JSON-lines protocol into the same `StreamEvent` sequence an
//! HTTP/SSE backend produces.

pub mod adapter;
pub mod args;
pub mod wire;

pub use adapter::SubprocessAdapter;
pub use args::build_args;
