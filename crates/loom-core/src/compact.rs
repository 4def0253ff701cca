// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Proactive budget estimation and context compaction over a persisted
//! Entry transcript. Two strategies are available: a deterministic
//! emergency truncation that never calls the model, and an LLM-summarised
//! pass whose prompt is built here but whose model call is driven by the
//! scheduler (this module has no `InferenceClient` dependency).

use loom_model::Role;
use loom_store::Entry;
use loom_tools::OutputCategory;

const STRUCTURED_COMPACTION_PROMPT: &str = "\
You are a context compaction assistant for a software engineering agent. \
Produce a structured state checkpoint from the conversation history below. \
Use exactly the following Markdown sections.

## Active Task
## Key Decisions & Rationale
## Files & Artifacts
## Constraints & Requirements
## Pending Items
## Session Narrative";

const NARRATIVE_COMPACTION_PROMPT: &str =
    "Summarise the following conversation history in a concise, information-dense way. \
     Preserve technical details, decisions, file names, and tool outputs that matter for \
     continuing the work. The summary replaces the original history.";

/// 4-chars-per-token heuristic over one Entry's content, tool-call
/// arguments, and tool-execution output — the same constant-factor
/// approximation `loom_model::Message::approx_tokens` uses, applied to the
/// persisted transcript rather than the wire request.
pub fn approx_entry_tokens(entry: &Entry) -> u32 {
    let mut chars = entry.content.chars().count();
    for call in &entry.tool_calls {
        chars += call.name.chars().count() + call.arguments.chars().count() + 8;
    }
    if let Some(exec) = &entry.tool_execution {
        chars += exec.output.chars().count();
    }
    ((chars as u32) / 4).max(1)
}

/// Total estimated token footprint of `entries`.
pub fn estimate_tokens(entries: &[Entry]) -> u32 {
    entries.iter().map(approx_entry_tokens).sum()
}

/// Whether `entry` is part of an atomic tool-call/tool-result group: an
/// assistant entry carrying tool calls, or a tool-result entry. A
/// compaction boundary must never fall inside such a group.
fn is_tool_group_member(entry: &Entry) -> bool {
    entry.role == Role::Tool || (entry.role == Role::Assistant && !entry.tool_calls.is_empty())
}

/// Walks `split` backward until it no longer lands inside a tool-call/
/// tool-result group, so entries `[split..]` always begin at a clean
/// user/assistant-text boundary.
pub fn safe_split_point(entries: &[Entry], mut split: usize) -> usize {
    while split > 0 && split < entries.len() && is_tool_group_member(&entries[split]) {
        split -= 1;
    }
    split
}

/// Deterministic, model-free compaction: keeps the most recent `keep_recent`
/// non-system entries (boundary-adjusted) and replaces everything older with
/// one visible notice entry. Always succeeds; used when even a
/// summarisation prompt would overflow the budget.
pub fn emergency_truncate(entries: &[Entry], keep_recent: usize) -> Vec<Entry> {
    let non_system: Vec<&Entry> = entries.iter().filter(|e| e.role != Role::System).collect();
    if non_system.len() <= keep_recent {
        return entries.to_vec();
    }
    let raw_split = non_system.len() - keep_recent;
    // Recompute the split against the non-system slice's own indices.
    let non_system_owned: Vec<Entry> = non_system.into_iter().cloned().collect();
    let split = safe_split_point(&non_system_owned, raw_split);

    let mut result: Vec<Entry> = entries.iter().filter(|e| e.role == Role::System).cloned().collect();
    result.push(Entry::assistant(
        "[Context emergency-compacted: earlier history was dropped to stay within the model's \
         context window. Some prior decisions may no longer be visible.]",
        None,
    ));
    result.extend(non_system_owned[split..].iter().cloned());
    result
}

/// Builds the plain-text transcript a summarisation prompt is built from.
fn serialize_history(entries: &[Entry]) -> String {
    entries
        .iter()
        .filter(|e| e.role != Role::System)
        .map(|e| {
            let role = match e.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            };
            if !e.tool_calls.is_empty() {
                let calls: Vec<String> =
                    e.tool_calls.iter().map(|c| format!("{}({})", c.name, c.arguments)).collect();
                format!("{role}: [tool_call: {}]", calls.join(", "))
            } else {
                format!("{role}: {}", e.content)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The prompt text to send the model for a summarisation pass, given the
/// entries selected for eviction and the configured strategy.
pub fn summarization_prompt(to_summarize: &[Entry], structured: bool) -> String {
    let prompt = if structured { STRUCTURED_COMPACTION_PROMPT } else { NARRATIVE_COMPACTION_PROMPT };
    format!("{prompt}\n\n---\n\n{}", serialize_history(to_summarize))
}

/// Rebuilds the entry list after a successful summarisation call: system
/// entries, one synthetic assistant entry carrying the summary
/// (`hidden=false` so it stays visible in the transcript), then the
/// preserved recent tail.
pub fn apply_summary(entries: &[Entry], keep_recent: usize, summary: &str) -> (Vec<Entry>, usize) {
    let non_system: Vec<Entry> = entries.iter().filter(|e| e.role != Role::System).cloned().collect();
    let raw_split = non_system.len().saturating_sub(keep_recent);
    let split = safe_split_point(&non_system, raw_split);

    let mut result: Vec<Entry> = entries.iter().filter(|e| e.role == Role::System).cloned().collect();
    result.push(Entry::assistant(summary, None));
    result.extend(non_system[split..].iter().cloned());
    (result, split)
}

/// Caps a tool result's text to roughly `token_cap` tokens before it is
/// persisted, using the tool's declared `OutputCategory` to decide which
/// part of the text is worth keeping.
pub fn truncate_tool_output(output: &str, category: OutputCategory, token_cap: usize) -> String {
    let char_cap = token_cap.saturating_mul(4);
    if output.chars().count() <= char_cap {
        return output.to_string();
    }
    let lines: Vec<&str> = output.lines().collect();
    match category {
        OutputCategory::HeadTail => head_tail_lines(&lines, 60, 40, char_cap),
        OutputCategory::FileContent => head_tail_lines(&lines, 80, 40, char_cap),
        OutputCategory::MatchList => head_lines(&lines, 100, char_cap),
        OutputCategory::Generic => {
            let head: String = output.chars().take(char_cap).collect();
            format!("{head}\n[... output truncated ...]")
        }
    }
}

fn head_lines(lines: &[&str], n: usize, char_cap: usize) -> String {
    let omitted = lines.len().saturating_sub(n);
    let head: String = lines.iter().take(n).copied().collect::<Vec<_>>().join("\n");
    let head: String = head.chars().take(char_cap).collect();
    format!("{head}\n[... {omitted} more lines omitted ...]")
}

fn head_tail_lines(lines: &[&str], head_n: usize, tail_n: usize, char_cap: usize) -> String {
    if lines.len() <= head_n + tail_n {
        return lines.join("\n").chars().take(char_cap).collect();
    }
    let head = lines[..head_n].join("\n");
    let tail = lines[lines.len() - tail_n..].join("\n");
    let omitted = lines.len() - head_n - tail_n;
    format!("{head}\n[... {omitted} lines omitted ...]\n{tail}").chars().take(char_cap).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_model::ToolCall;

    fn tool_call_entry() -> Entry {
        Entry::assistant_tool_calls(vec![ToolCall { id: "c1".into(), name: "shell".into(), arguments: "{}".into() }], None)
    }

    fn tool_result_entry() -> Entry {
        Entry::tool_result(
            "c1",
            loom_store::ToolExecutionRecord {
                name: "shell".into(),
                arguments: "{}".into(),
                success: true,
                rejected: false,
                output: "ok".into(),
                duration_ms: 1,
            },
        )
    }

    #[test]
    fn approx_tokens_is_never_zero_for_nonempty_entry() {
        let e = Entry::user("hi");
        assert!(approx_entry_tokens(&e) >= 1);
    }

    #[test]
    fn estimate_tokens_sums_across_entries() {
        let entries = vec![Entry::user("a".repeat(40)), Entry::assistant("b".repeat(40), None)];
        assert_eq!(estimate_tokens(&entries), 20);
    }

    #[test]
    fn safe_split_point_never_separates_tool_call_from_its_result() {
        let entries = vec![Entry::user("go"), tool_call_entry(), tool_result_entry(), Entry::assistant("done", None)];
        // A naive split at index 2 would land on the tool-result entry,
        // stranding it without its tool-call.
        let split = safe_split_point(&entries, 2);
        assert!(split <= 1);
    }

    #[test]
    fn safe_split_point_is_a_no_op_on_a_clean_boundary() {
        let entries = vec![Entry::user("a"), Entry::assistant("b", None), Entry::user("c")];
        assert_eq!(safe_split_point(&entries, 2), 2);
    }

    #[test]
    fn emergency_truncate_keeps_recent_entries_and_a_notice() {
        let mut entries = vec![Entry::user("sys-ish")];
        for i in 0..10 {
            entries.push(Entry::user(format!("msg {i}")));
        }
        let result = emergency_truncate(&entries, 2);
        assert!(result.iter().any(|e| e.content.contains("emergency-compacted")));
        assert!(result.last().unwrap().content.contains("msg 9"));
    }

    #[test]
    fn emergency_truncate_is_a_no_op_when_under_keep_recent() {
        let entries = vec![Entry::user("a"), Entry::user("b")];
        let result = emergency_truncate(&entries, 10);
        assert_eq!(result.len(), entries.len());
    }

    #[test]
    fn emergency_truncate_preserves_tool_call_atomicity() {
        let entries = vec![Entry::user("go"), tool_call_entry(), tool_result_entry(), Entry::assistant("done", None)];
        let result = emergency_truncate(&entries, 1);
        // Either both the call and its result survive, or neither does.
        let has_call = result.iter().any(|e| !e.tool_calls.is_empty());
        let has_result = result.iter().any(|e| e.tool_call_id.is_some());
        assert_eq!(has_call, has_result);
    }

    #[test]
    fn apply_summary_inserts_one_synthetic_entry_and_keeps_tail() {
        let entries = vec![Entry::user("old"), Entry::assistant("older reply", None), Entry::user("recent")];
        let (result, _) = apply_summary(&entries, 1, "a summary");
        assert!(result.iter().any(|e| e.content == "a summary"));
        assert!(result.last().unwrap().content == "recent");
        assert!(!result.last().unwrap().hidden);
    }

    #[test]
    fn summarization_prompt_selects_structured_template() {
        let p = summarization_prompt(&[Entry::user("hi")], true);
        assert!(p.contains("Active Task"));
    }

    #[test]
    fn summarization_prompt_selects_narrative_template() {
        let p = summarization_prompt(&[Entry::user("hi")], false);
        assert!(!p.contains("Active Task"));
    }

    #[test]
    fn short_output_is_returned_unchanged() {
        let out = truncate_tool_output("short", OutputCategory::Generic, 1000);
        assert_eq!(out, "short");
    }

    #[test]
    fn generic_truncation_keeps_a_leading_window_and_notes_truncation() {
        let long = "x".repeat(10_000);
        let out = truncate_tool_output(&long, OutputCategory::Generic, 10);
        assert!(out.contains("truncated"));
        assert!(out.len() < long.len());
    }

    #[test]
    fn head_tail_truncation_preserves_both_ends() {
        let lines: Vec<String> = (0..500).map(|i| format!("line {i}")).collect();
        let text = lines.join("\n");
        let out = truncate_tool_output(&text, OutputCategory::HeadTail, 50);
        assert!(out.contains("line 0"));
        assert!(out.contains("omitted"));
    }

    #[test]
    fn match_list_truncation_keeps_only_the_head() {
        let lines: Vec<String> = (0..300).map(|i| format!("match {i}")).collect();
        let text = lines.join("\n");
        let out = truncate_tool_output(&text, OutputCategory::MatchList, 30);
        assert!(out.contains("match 0"));
        assert!(!out.contains("match 299"));
    }
}
