// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Orchestrates one conversation's turn loop over an `InferenceClient` and
//! `ToolRegistry`, persisting through a `ConversationStore` and publishing
//! progress on an `EventPublisher`.

mod approval;
mod compact;
mod events;
mod queue;
mod scheduler;

pub use approval::{ApprovalChannel, AutoApproveApproval, AutoDenyApproval};
pub use compact::{apply_summary, emergency_truncate, estimate_tokens, safe_split_point, summarization_prompt, truncate_tool_output};
pub use events::{AgentEvent, CompactionStrategyUsed, EventPublisher, EventReader};
pub use queue::{MessageQueue, QueuedMessage};
pub use scheduler::{AgentScheduler, SchedulerDeps, SchedulerError, PLAN_READY_TOOL};
