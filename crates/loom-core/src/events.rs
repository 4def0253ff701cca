// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Single-writer, multi-reader typed event bus between the scheduler and
//! its UI collaborator (the host binary, headlessly, in this codebase).
//! Backed by `tokio::sync::broadcast` so a slow or absent reader cannot
//! block the scheduler: a full channel drops the oldest unread event for
//! that reader rather than stalling the writer.

use tokio::sync::broadcast;

use loom_model::ToolCall;

/// Which compaction path produced a `ContextCompacted` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyUsed {
    Structured,
    Narrative,
    /// The deterministic, model-free fallback used when even a compaction
    /// prompt would overflow the budget.
    Emergency,
}

/// Events published by the scheduler in production order. No reordering
/// occurs across variants within one turn.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A new request began draining the queue and entering PREPARE.
    TurnStarted { request_id: String },
    /// A text chunk streamed from the model.
    TextDelta(String),
    /// A reasoning/thinking chunk streamed from the model.
    ReasoningDelta(String),
    /// The model requested a tool call; `ToolCall.arguments` is the
    /// finished, parseable JSON string (assembled from deltas at Stop).
    ToolCallDiscovered(ToolCall),
    /// A discovered tool call requires approval before it may run.
    ToolApprovalRequested { call_id: String, tool_name: String, command_repr: String },
    /// A tool call began executing (approval granted or not required).
    ToolStarted { call_id: String, tool_name: String },
    /// A tool call finished, successfully, with an error, or rejected.
    ToolCompleted { call_id: String, tool_name: String, success: bool, rejected: bool, output: String, duration_ms: u64 },
    /// The request finished normally. `reason` is one of `"stop"`,
    /// `"max_turns"`, or `"tool_rejected"`.
    TurnCompleted { turns: u32, reason: String },
    /// The request was cancelled; `partial_text` is the unfinished
    /// assistant text persisted alongside the cancellation, if any.
    TurnCancelled { partial_text: Option<String> },
    /// A stream or tool-registry error terminated the turn loop.
    TurnFailed { message: String },
    /// A periodic reminder was injected ahead of this turn's inference call.
    ReminderInjected { turn: u32 },
    /// Proactive compaction ran ahead of a PREPARE step.
    ContextCompacted { tokens_before: u32, tokens_after: u32, strategy: CompactionStrategyUsed, turn: u32 },
}

/// Wraps a `broadcast::Receiver`, translating `RecvError::Lagged` into a
/// running counter instead of surfacing it to the caller — a slow reader
/// misses old events but keeps consuming, rather than erroring out.
pub struct EventReader {
    rx: broadcast::Receiver<AgentEvent>,
    lagged: u64,
}

impl EventReader {
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.lagged += skipped;
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Total events dropped because this reader fell behind.
    pub fn lag_count(&self) -> u64 {
        self.lagged
    }
}

/// Single-writer, multi-reader channel of `AgentEvent`s.
pub struct EventPublisher {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event to all current subscribers. A send with no
    /// subscribers attached is not an error: forward progress of the
    /// scheduler never depends on whether anyone is listening.
    pub fn publish(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventReader {
        EventReader { rx: self.tx.subscribe(), lagged: 0 }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}
