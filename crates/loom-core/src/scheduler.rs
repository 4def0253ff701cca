// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Drives the PREPARE → STREAM → TOOL_DISPATCH → TOOL_RUN → NEXT_TURN state
//! machine for one conversation. Owns nothing about transport or storage
//! beyond the trait objects it is constructed with, so it can be driven by
//! a CLI host, a test harness, or eventually a long-lived service loop
//! identically.

use std::sync::Mutex;

use chrono::Utc;
use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use loom_config::{AgentConfig, AgentMode, CompactionStrategy, ModelConfig};
use loom_model::{InferenceClient, InferenceError, Message, StreamEvent, ToolCallAccumulator, ToolCall as ModelToolCall};
use loom_store::{ConversationStore, ConversationStoreError, Entry, Metadata, ToolExecutionRecord};
use loom_tools::{ApprovalOutcome, Tool, ToolOutput, ToolPolicy, ToolRegistry};

use crate::approval::ApprovalChannel;
use crate::compact;
use crate::events::{AgentEvent, CompactionStrategyUsed, EventPublisher};
use crate::queue::{MessageQueue, QueuedMessage};

/// Tool name a model calls to hand a plan to the operator for approval.
/// Interception happens by name, ahead of the normal approval-policy path,
/// since this is a control-flow checkpoint rather than an action the tool
/// registry executes.
pub const PLAN_READY_TOOL: &str = "exit_plan_mode";

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] ConversationStoreError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Constructor arguments for [`AgentScheduler`].
pub struct SchedulerDeps {
    pub store: std::sync::Arc<dyn ConversationStore>,
    pub tools: std::sync::Arc<ToolRegistry>,
    pub tool_policy: ToolPolicy,
    pub client: std::sync::Arc<dyn InferenceClient>,
    pub config: AgentConfig,
    pub model_config: ModelConfig,
    pub events: std::sync::Arc<EventPublisher>,
    pub queue: std::sync::Arc<MessageQueue>,
    pub approval: std::sync::Arc<dyn ApprovalChannel>,
}

pub struct AgentScheduler {
    store: std::sync::Arc<dyn ConversationStore>,
    tools: std::sync::Arc<ToolRegistry>,
    tool_policy: ToolPolicy,
    client: std::sync::Arc<dyn InferenceClient>,
    config: AgentConfig,
    model_config: ModelConfig,
    events: std::sync::Arc<EventPublisher>,
    queue: std::sync::Arc<MessageQueue>,
    approval: std::sync::Arc<dyn ApprovalChannel>,
    mode: Mutex<AgentMode>,
    /// Running correction applied to the chars/4 token estimate, updated
    /// from actual provider `Usage` events as turns complete.
    calibration: Mutex<f32>,
}

struct StreamOutcome {
    text: String,
    tool_calls: Vec<ModelToolCall>,
    usage_input_tokens: Option<u32>,
    cancelled: bool,
}

impl AgentScheduler {
    pub fn new(deps: SchedulerDeps) -> Self {
        let mode = deps.config.default_mode;
        Self {
            store: deps.store,
            tools: deps.tools,
            tool_policy: deps.tool_policy,
            client: deps.client,
            config: deps.config,
            model_config: deps.model_config,
            events: deps.events,
            queue: deps.queue,
            approval: deps.approval,
            mode: Mutex::new(mode),
            calibration: Mutex::new(1.0),
        }
    }

    /// Changes the agent mode honoured starting with the next turn.
    pub fn set_mode(&self, mode: AgentMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn mode(&self) -> AgentMode {
        *self.mode.lock().unwrap()
    }

    /// Processes every message currently queued for `conversation_id`,
    /// headless-host semantics: run until the queue is drained rather than
    /// waiting indefinitely for more input.
    pub async fn run(&self, conversation_id: &str, cancel: CancellationToken) -> Result<(), SchedulerError> {
        while let Some(message) = self.queue.dequeue() {
            if cancel.is_cancelled() {
                self.events.publish(AgentEvent::TurnCancelled { partial_text: None });
                return Ok(());
            }
            self.run_request(conversation_id, message, cancel.clone()).await?;
        }
        Ok(())
    }

    /// Runs one top-level request to completion: the triggering message plus
    /// anything already queued, through up to `turn_cap` inference/tool
    /// rounds.
    pub async fn run_request(
        &self,
        conversation_id: &str,
        first: QueuedMessage,
        cancel: CancellationToken,
    ) -> Result<(), SchedulerError> {
        self.events.publish(AgentEvent::TurnStarted { request_id: first.request_id.clone() });

        let (mut entries, mut metadata) = match self.store.load(conversation_id).await {
            Ok(loaded) => loaded,
            Err(ConversationStoreError::NotFound(_)) => (Vec::new(), Metadata::new(conversation_id)),
            Err(e) => return Err(e.into()),
        };

        entries.push(Entry::user(first.content));
        for queued in self.queue.drain_all() {
            entries.push(Entry::user(queued.content));
        }
        self.persist(conversation_id, &entries, &mut metadata).await?;

        let mut turn: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                self.events.publish(AgentEvent::TurnCancelled { partial_text: None });
                return Ok(());
            }
            if turn >= self.config.turn_cap {
                self.events.publish(AgentEvent::TurnCompleted { turns: turn, reason: "max_turns".into() });
                return Ok(());
            }

            for queued in self.queue.drain_all() {
                entries.push(Entry::user(queued.content));
            }
            self.persist(conversation_id, &entries, &mut metadata).await?;

            entries = self.ensure_budget(entries, turn).await;
            self.persist(conversation_id, &entries, &mut metadata).await?;

            let mut outgoing = self.build_messages(&entries);
            outgoing.insert(0, Message::system(self.system_prompt_for_mode()));

            if self.config.reminders.enabled && turn > 0 && turn % self.config.reminders.interval == 0 {
                outgoing.push(Message::system(self.config.reminders.text.clone()));
                let mut reminder = Entry::assistant(self.config.reminders.text.clone(), None);
                reminder.role = loom_model::Role::System;
                reminder.hidden = true;
                entries.push(reminder);
                self.persist(conversation_id, &entries, &mut metadata).await?;
                self.events.publish(AgentEvent::ReminderInjected { turn });
            }

            let estimate_before_call = compact::estimate_tokens(&entries);
            let outcome = match self.stream_one_turn(outgoing, &cancel).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.events.publish(AgentEvent::TurnFailed { message: e.to_string() });
                    return Err(e.into());
                }
            };

            if let Some(actual) = outcome.usage_input_tokens {
                self.update_calibration(estimate_before_call, actual);
            }

            if outcome.cancelled {
                if !outcome.text.is_empty() {
                    entries.push(Entry::assistant_cancelled(outcome.text.clone(), Some(self.client.model_name().to_string())));
                    self.persist(conversation_id, &entries, &mut metadata).await?;
                }
                self.events.publish(AgentEvent::TurnCancelled {
                    partial_text: if outcome.text.is_empty() { None } else { Some(outcome.text) },
                });
                return Ok(());
            }

            if !outcome.text.is_empty() {
                entries.push(Entry::assistant(outcome.text, Some(self.client.model_name().to_string())));
                self.persist(conversation_id, &entries, &mut metadata).await?;
            }

            if outcome.tool_calls.is_empty() {
                self.events.publish(AgentEvent::TurnCompleted { turns: turn + 1, reason: "stop".into() });
                return Ok(());
            }

            entries.push(Entry::assistant_tool_calls(outcome.tool_calls.clone(), Some(self.client.model_name().to_string())));
            self.persist(conversation_id, &entries, &mut metadata).await?;

            if let Some(plan_call) = outcome.tool_calls.iter().find(|c| c.name == PLAN_READY_TOOL) {
                let approved = self.approval.request_plan_approval(&plan_call.arguments).await;
                if !approved {
                    let record = ToolExecutionRecord {
                        name: plan_call.name.clone(),
                        arguments: plan_call.arguments.clone(),
                        success: false,
                        rejected: true,
                        output: "plan rejected".into(),
                        duration_ms: 0,
                    };
                    entries.push(Entry::tool_result(plan_call.id.clone(), record));
                    self.persist(conversation_id, &entries, &mut metadata).await?;
                    self.events.publish(AgentEvent::TurnCompleted { turns: turn + 1, reason: "plan_rejected".into() });
                    return Ok(());
                }
            }

            let mut any_rejected = false;
            for call in &outcome.tool_calls {
                let output = self.dispatch_tool_call(call, &cancel).await;
                if output.rejected {
                    any_rejected = true;
                }
                let category = self.tools.get(&call.name).map(|t| t.output_category()).unwrap_or_default();
                let capped = compact::truncate_tool_output(&output.output, category, self.config.tool_result_token_cap);
                let record = ToolExecutionRecord {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    success: output.success,
                    rejected: output.rejected,
                    output: capped,
                    duration_ms: output.duration.as_millis() as u64,
                };
                entries.push(Entry::tool_result(call.id.clone(), record));
            }
            self.persist(conversation_id, &entries, &mut metadata).await?;

            if any_rejected {
                self.events.publish(AgentEvent::TurnCompleted { turns: turn + 1, reason: "tool_rejected".into() });
                return Ok(());
            }

            turn += 1;
        }
    }

    async fn dispatch_tool_call(&self, call: &ModelToolCall, cancel: &CancellationToken) -> ToolOutput {
        self.events.publish(AgentEvent::ToolCallDiscovered(call.clone()));
        let exec_call = to_exec_call(call);
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
        };
        let outcome = self.tools.requires_approval(tool.as_ref(), self.mode(), &self.tool_policy, &call.arguments);
        match outcome {
            ApprovalOutcome::Denied => ToolOutput::rejected(&call.id, "denied by policy"),
            ApprovalOutcome::Required => {
                self.events.publish(AgentEvent::ToolApprovalRequested {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    command_repr: call.arguments.clone(),
                });
                if cancel.is_cancelled() {
                    return ToolOutput::rejected(&call.id, "cancelled");
                }
                if self.approval.request_tool_approval(&call.id, &call.name, &call.arguments).await {
                    self.events.publish(AgentEvent::ToolStarted { call_id: call.id.clone(), tool_name: call.name.clone() });
                    let output = self.tools.execute(&exec_call).await;
                    self.publish_tool_completed(&output, &call.name);
                    output
                } else {
                    ToolOutput::rejected(&call.id, "denied by operator")
                }
            }
            ApprovalOutcome::NotRequired => {
                self.events.publish(AgentEvent::ToolStarted { call_id: call.id.clone(), tool_name: call.name.clone() });
                let output = self.tools.execute(&exec_call).await;
                self.publish_tool_completed(&output, &call.name);
                output
            }
        }
    }

    fn publish_tool_completed(&self, output: &ToolOutput, tool_name: &str) {
        self.events.publish(AgentEvent::ToolCompleted {
            call_id: output.call_id.clone(),
            tool_name: tool_name.to_string(),
            success: output.success,
            rejected: output.rejected,
            output: output.output.clone(),
            duration_ms: output.duration.as_millis() as u64,
        });
    }

    async fn persist(&self, id: &str, entries: &[Entry], metadata: &mut Metadata) -> Result<(), SchedulerError> {
        metadata.message_count = entries.len();
        metadata.updated_at = Utc::now();
        self.store.save(id, entries, metadata).await?;
        Ok(())
    }

    fn build_messages(&self, entries: &[Entry]) -> Vec<Message> {
        entries
            .iter()
            .filter(|e| !e.hidden)
            .map(|e| match e.role {
                loom_model::Role::User => Message::user(e.content.clone()),
                loom_model::Role::System => Message::system(e.content.clone()),
                loom_model::Role::Assistant if !e.tool_calls.is_empty() => Message::assistant_tool_calls(e.tool_calls.clone()),
                loom_model::Role::Assistant => Message::assistant(e.content.clone()),
                loom_model::Role::Tool => Message::tool_result(e.tool_call_id.clone().unwrap_or_default(), e.content.clone()),
            })
            .collect()
    }

    fn system_prompt_for_mode(&self) -> String {
        match self.mode() {
            AgentMode::Plan => self.config.system_prompt_plan.clone(),
            AgentMode::Standard | AgentMode::AutoAccept => self.config.system_prompt_standard.clone(),
        }
    }

    fn trigger_budget(&self) -> u32 {
        let window = self.model_config.context_window as f32;
        let fraction = (self.config.compaction_threshold - self.config.compaction_overhead_reserve).max(0.05);
        (window * fraction) as u32
    }

    fn calibrated_estimate(&self, entries: &[Entry]) -> u32 {
        let raw = compact::estimate_tokens(entries) as f32;
        (raw * *self.calibration.lock().unwrap()) as u32
    }

    fn update_calibration(&self, estimated: u32, actual: u32) {
        if estimated == 0 {
            return;
        }
        let ratio = actual as f32 / estimated as f32;
        let mut cal = self.calibration.lock().unwrap();
        *cal = (*cal * 0.8 + ratio * 0.2).clamp(0.25, 4.0);
    }

    /// Proactive budget check run before every PREPARE. Returns `entries`
    /// unchanged when under budget; otherwise compacts, preserving
    /// tool-call/tool-result atomicity, and publishes `ContextCompacted`.
    async fn ensure_budget(&self, entries: Vec<Entry>, turn: u32) -> Vec<Entry> {
        let before = self.calibrated_estimate(&entries);
        let budget = self.trigger_budget();
        if before <= budget {
            return entries;
        }

        let keep_recent = self.config.compaction_keep_recent;
        let non_system: Vec<Entry> = entries.iter().filter(|e| e.role != loom_model::Role::System).cloned().collect();
        let raw_split = non_system.len().saturating_sub(keep_recent);
        let split = compact::safe_split_point(&non_system, raw_split);
        let to_summarize = &non_system[..split];

        let prompt_cost = compact::estimate_tokens(to_summarize) + 200;
        if to_summarize.is_empty() || prompt_cost > budget {
            return self.emergency_compact(&entries, keep_recent, before, turn);
        }

        let structured = matches!(self.config.compaction_strategy, CompactionStrategy::Structured);
        let prompt = compact::summarization_prompt(to_summarize, structured);
        match self.client.generate_sync(vec![Message::user(prompt)]).await {
            Ok(response) if !response.text.trim().is_empty() => {
                let (result, _) = compact::apply_summary(&entries, keep_recent, &response.text);
                let after = compact::estimate_tokens(&result);
                let strategy = if structured { CompactionStrategyUsed::Structured } else { CompactionStrategyUsed::Narrative };
                self.events.publish(AgentEvent::ContextCompacted { tokens_before: before, tokens_after: after, strategy, turn });
                result
            }
            _ => self.emergency_compact(&entries, keep_recent, before, turn),
        }
    }

    fn emergency_compact(&self, entries: &[Entry], keep_recent: usize, before: u32, turn: u32) -> Vec<Entry> {
        let result = compact::emergency_truncate(entries, keep_recent);
        let after = compact::estimate_tokens(&result);
        self.events.publish(AgentEvent::ContextCompacted {
            tokens_before: before,
            tokens_after: after,
            strategy: CompactionStrategyUsed::Emergency,
            turn,
        });
        result
    }

    async fn stream_one_turn(&self, messages: Vec<Message>, cancel: &CancellationToken) -> Result<StreamOutcome, InferenceError> {
        let mut stream = self.client.generate_stream(messages).await?;
        let mut acc = ToolCallAccumulator::new();
        let mut text = String::new();
        let mut usage_input_tokens = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(StreamOutcome { text, tool_calls: Vec::new(), usage_input_tokens, cancelled: true });
                }
                next = stream.next() => {
                    match next {
                        None => return Ok(StreamOutcome { text, tool_calls: Vec::new(), usage_input_tokens, cancelled: false }),
                        Some(Err(e)) => return Err(e),
                        Some(Ok(StreamEvent::Delta { text: delta_text, reasoning_text, tool_call_delta, .. })) => {
                            if let Some(t) = delta_text {
                                self.events.publish(AgentEvent::TextDelta(t.clone()));
                                text.push_str(&t);
                            }
                            if let Some(r) = reasoning_text {
                                self.events.publish(AgentEvent::ReasoningDelta(r));
                            }
                            if let Some(delta) = tool_call_delta {
                                acc.push(&delta);
                            }
                        }
                        Some(Ok(StreamEvent::ToolResult { .. })) => {}
                        Some(Ok(StreamEvent::Usage(usage))) => {
                            usage_input_tokens = Some(usage.input_tokens);
                        }
                        Some(Ok(StreamEvent::Error { message })) => {
                            return Err(InferenceError::ProviderError { payload: message });
                        }
                        Some(Ok(StreamEvent::Stop { .. })) => {
                            return Ok(StreamOutcome { text, tool_calls: acc.drain_ordered(), usage_input_tokens, cancelled: false });
                        }
                    }
                }
            }
        }
    }
}

fn to_exec_call(call: &ModelToolCall) -> loom_tools::ToolCall {
    let args = serde_json::from_str(&call.arguments).unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
    loom_tools::ToolCall { id: call.id.clone(), name: call.name.clone(), args }
}
