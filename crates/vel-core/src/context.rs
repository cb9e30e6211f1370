// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
//! Three-tier progressive context compaction.
//!
//! The manager keeps `estimate(messages) ≤ context window` across turns,
//! always preferring reversible compression to lossy compression:
//!
//! 1. **Offload** — a tool result larger than `large_result_token_limit` is
//!    written byte-exact to the filesystem backend and replaced in the
//!    message log by a path, a short preview, and a read-back instruction.
//! 2. **Compact** — when usage reaches `eviction_threshold`, the bulky
//!    `content`/`new_text` arguments of earlier file-writing tool calls are
//!    replaced with a short path reference.  The written files still exist,
//!    so no information leaves the system.
//! 3. **Summarize** — when usage still exceeds `summarization_threshold`,
//!    older messages are persisted as a transcript and replaced by a model
//!    (or heuristic) summary plus the most recent messages verbatim.
//!
//! Tiers apply in order within a single turn; each compression appends an
//! [`EvictionRecord`] to an append-only log.  Every rewrite produces fresh
//! message values — prior messages are never edited in place, which keeps
//! provider prompt caches valid for untouched prefixes.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use vel_config::ContextConfig;
use vel_model::{CompletionRequest, Message, MessageContent, ModelProvider, Part, ResponseEvent, Role};
use vel_store::FsBackend;

/// Tool-call argument keys rewritten by tier 2, per file-writing tool.
const FILE_WRITING_TOOLS: &[(&str, &str)] = &[("write_file", "content"), ("edit_file", "new_text")];

const COMPACT_PLACEHOLDER_PREFIX: &str = "[Content written to ";

const SUMMARY_PROMPT: &str = "\
You are a context compaction assistant for a long-running agent session. \
Summarise the conversation history below into a dense checkpoint with EXACTLY \
these Markdown sections:

## Session Intent
## Progress Made
## Key Decisions
## Current State
## Next Steps
## Critical Details To Preserve

Keep file paths, identifiers, error messages, and numbers verbatim where they \
matter. The summary replaces the original history.";

// ─── Public types ─────────────────────────────────────────────────────────────

/// Which compression tier produced an [`EvictionRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionKind {
    Offload,
    Compact,
    Summarize,
}

/// One entry in the append-only compression log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionRecord {
    pub original_tokens: usize,
    pub compacted_tokens: usize,
    pub strategy: CompactionKind,
    pub files_created: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// The token-estimation method in use, exposed so callers can tell which
/// numbers they are looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEstimator {
    /// Length heuristic: ~3 chars/token for JSON-like text, ~3.8 for prose.
    CharHeuristic,
}

pub struct ContextManager {
    config: ContextConfig,
    /// Resolved context window for the session's model, in tokens.
    window: usize,
    backend: Arc<dyn FsBackend>,
    /// Provider used for tier-3 summaries.  `None` forces the heuristic path.
    summarizer: Option<Arc<dyn ModelProvider>>,
    records: Mutex<Vec<EvictionRecord>>,
}

impl ContextManager {
    pub fn new(config: ContextConfig, model: &str, backend: Arc<dyn FsBackend>) -> Self {
        let window = resolve_window(&config, model);
        Self {
            config,
            window,
            backend,
            summarizer: None,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Use `provider` (typically a cheaper model) for tier-3 summaries.
    pub fn with_summarizer(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.summarizer = Some(provider);
        self
    }

    pub fn estimator(&self) -> TokenEstimator {
        TokenEstimator::CharHeuristic
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Snapshot of the compression log.
    pub fn records(&self) -> Vec<EvictionRecord> {
        self.records.lock().expect("eviction log lock poisoned").clone()
    }

    /// Restore a serialized compression log (state round-trip).
    pub fn load_records(&self, records: Vec<EvictionRecord>) {
        *self.records.lock().expect("eviction log lock poisoned") = records;
    }

    fn push_record(&self, record: EvictionRecord) {
        self.records
            .lock()
            .expect("eviction log lock poisoned")
            .push(record);
    }

    // ── Estimation ────────────────────────────────────────────────────────────

    pub fn estimate_text(&self, text: &str) -> usize {
        estimate_text_tokens(text)
    }

    pub fn estimate_message(&self, msg: &Message) -> usize {
        match &msg.content {
            MessageContent::Text(t) => estimate_text_tokens(t),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    Part::Text { text } => estimate_text_tokens(text),
                    // Tool-call arguments are JSON by construction.
                    Part::ToolCall { name, args, .. } => {
                        estimate_json_tokens(name.len() + args.to_string().len())
                    }
                    Part::ToolResult { value, .. } => estimate_text_tokens(value),
                })
                .sum(),
        }
    }

    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    // ── Tier 1: large-result offload ──────────────────────────────────────────

    /// Process one tool result as it is produced.  Returns the replacement
    /// text (the original when no offload applies) and the record created.
    pub async fn process_tool_result(
        &self,
        tool_name: &str,
        call_id: &str,
        content: &str,
    ) -> (String, Option<EvictionRecord>) {
        if self.config.excluded_tools.iter().any(|t| t == tool_name) {
            return (content.to_string(), None);
        }
        let tokens = estimate_text_tokens(content);
        if tokens <= self.config.large_result_token_limit {
            return (content.to_string(), None);
        }

        let timestamp = Utc::now();
        let id_prefix: String = call_id.chars().take(8).collect();
        let path = format!(
            "/context/tool_results/{tool_name}_{}_{id_prefix}.txt",
            timestamp.format("%Y%m%dT%H%M%S%6f")
        );
        if let Err(e) = self.backend.write(&path, content).await {
            // Offload failure must not lose the result; pass it through and
            // let tier 2/3 deal with the size later.
            warn!(path, error = %e, "tool-result offload failed; keeping inline");
            return (content.to_string(), None);
        }

        let preview: Vec<&str> = content.lines().take(self.config.preview_lines).collect();
        let replacement = format!(
            "[Tool result ({tokens} tokens) offloaded to {path}]\n\
             Preview (first {} lines):\n{}\n\
             Use read_file(\"{path}\") to access the full content.",
            preview.len(),
            preview.join("\n"),
        );
        debug!(tool = tool_name, path, tokens, "offloaded large tool result");

        let record = EvictionRecord {
            original_tokens: tokens,
            compacted_tokens: estimate_text_tokens(&replacement),
            strategy: CompactionKind::Offload,
            files_created: vec![path],
            timestamp,
        };
        self.push_record(record.clone());
        (replacement, Some(record))
    }

    // ── Tiers 2 + 3: before-turn pipeline ─────────────────────────────────────

    /// Run tool-call compaction and, if still needed, summarization.
    /// Returns the (possibly rewritten) message list plus the records
    /// created by this call, in order.
    pub async fn before_turn(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> anyhow::Result<(Vec<Message>, Vec<EvictionRecord>)> {
        let mut created = Vec::new();
        if self.window == 0 {
            return Ok((messages, created));
        }

        let tokens = self.estimate_messages(&messages);
        let eviction_floor = (self.config.eviction_threshold * self.window as f32) as usize;
        if tokens < eviction_floor {
            return Ok((messages, created));
        }

        // Tier 2
        let (mut messages, changed) = self.compact_tool_calls(messages);
        if changed {
            let after = self.estimate_messages(&messages);
            let record = EvictionRecord {
                original_tokens: tokens,
                compacted_tokens: after,
                strategy: CompactionKind::Compact,
                files_created: Vec::new(),
                timestamp: Utc::now(),
            };
            self.push_record(record.clone());
            created.push(record);
        }

        // Tier 3
        let tokens_after_compact = self.estimate_messages(&messages);
        let summarize_floor =
            (self.config.summarization_threshold * self.window as f32) as usize;
        if tokens_after_compact >= summarize_floor {
            let (summarized, record) = self.summarize(session_id, messages).await?;
            messages = summarized;
            if let Some(record) = record {
                created.push(record);
            }
        }

        Ok((messages, created))
    }

    /// Tier 2: replace bulky arguments of prior file-writing tool calls with
    /// short path references, and shrink their results to status strings.
    ///
    /// Idempotent: applying it twice equals applying it once.  A history
    /// without file-writing calls passes through unchanged.
    pub fn compact_tool_calls(&self, messages: Vec<Message>) -> (Vec<Message>, bool) {
        let mut changed = false;
        // Call ids whose arguments were rewritten; their results shrink too.
        let mut rewritten_calls: Vec<(String, String)> = Vec::new();

        let mut out: Vec<Message> = Vec::with_capacity(messages.len());
        for msg in messages {
            let MessageContent::Parts(parts) = &msg.content else {
                out.push(msg);
                continue;
            };

            if msg.role == Role::Assistant {
                let mut new_parts = Vec::with_capacity(parts.len());
                let mut msg_changed = false;
                for part in parts {
                    match part {
                        Part::ToolCall { id, name, args } => {
                            match compact_call_args(name, args) {
                                Some((new_args, path)) => {
                                    rewritten_calls.push((id.clone(), path));
                                    new_parts.push(Part::ToolCall {
                                        id: id.clone(),
                                        name: name.clone(),
                                        args: new_args,
                                    });
                                    msg_changed = true;
                                }
                                None => new_parts.push(part.clone()),
                            }
                        }
                        other => new_parts.push(other.clone()),
                    }
                }
                if msg_changed {
                    changed = true;
                    out.push(Message {
                        role: msg.role,
                        content: MessageContent::Parts(new_parts),
                    });
                } else {
                    out.push(msg);
                }
                continue;
            }

            if msg.role == Role::Tool {
                let mut new_parts = Vec::with_capacity(parts.len());
                let mut msg_changed = false;
                for part in parts {
                    match part {
                        Part::ToolResult { tool_call_id, value } => {
                            let shortened = rewritten_calls
                                .iter()
                                .find(|(id, _)| id == tool_call_id)
                                .map(|(_, path)| format!("Wrote {path}"));
                            match shortened {
                                Some(status) if value.len() > status.len() => {
                                    new_parts.push(Part::ToolResult {
                                        tool_call_id: tool_call_id.clone(),
                                        value: status,
                                    });
                                    msg_changed = true;
                                }
                                _ => new_parts.push(part.clone()),
                            }
                        }
                        other => new_parts.push(other.clone()),
                    }
                }
                if msg_changed {
                    changed = true;
                    out.push(Message {
                        role: msg.role,
                        content: MessageContent::Parts(new_parts),
                    });
                } else {
                    out.push(msg);
                }
                continue;
            }

            out.push(msg);
        }
        (out, changed)
    }

    /// Tier 3: persist older messages as a transcript, replace them with a
    /// summary plus an acknowledgement, and keep the recent tail verbatim.
    async fn summarize(
        &self,
        session_id: &str,
        messages: Vec<Message>,
    ) -> anyhow::Result<(Vec<Message>, Option<EvictionRecord>)> {
        let tokens_before = self.estimate_messages(&messages);

        let system: Vec<Message> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();
        let non_system: Vec<Message> = messages
            .into_iter()
            .filter(|m| m.role != Role::System)
            .collect();

        let keep = self.config.preserve_recent.min(non_system.len());
        let mut split = non_system.len() - keep;
        // Never split inside a tool-call/tool-result group: the preserved
        // tail must not begin with an orphaned result whose call was
        // summarised away.  Moving back past both results and calls keeps
        // the entire group (including parallel calls) in the tail.
        while split > 0
            && split < non_system.len()
            && (non_system[split].role == Role::Tool
                || non_system[split].tool_calls().next().is_some())
        {
            split -= 1;
        }
        if split == 0 {
            // Everything is recent; nothing to summarise.
            let mut out = system;
            out.extend(non_system);
            return Ok((out, None));
        }

        let old = &non_system[..split];
        let recent = &non_system[split..];

        let timestamp = Utc::now();
        let transcript_path = format!(
            "/context/transcripts/{session_id}_{}.json",
            timestamp.format("%Y%m%dT%H%M%S%6f")
        );
        let transcript = serde_json::to_string_pretty(old)
            .map_err(|e| anyhow::anyhow!("transcript serialization failed: {e}"))?;
        self.backend
            .write(&transcript_path, &transcript)
            .await
            .map_err(|e| anyhow::anyhow!("transcript write failed: {e}"))?;

        let summary = match self.model_summary(old).await {
            Ok(s) if !s.trim().is_empty() => s,
            outcome => {
                if let Err(e) = outcome {
                    warn!(error = %e, "summary model call failed; using heuristic summary");
                }
                heuristic_summary(old)
            }
        };

        let mut out = system;
        out.push(Message::user(format!(
            "Earlier conversation was compacted. Full transcript saved to \
             {transcript_path}.\n\n{summary}"
        )));
        out.push(Message::assistant(
            "Understood. Continuing from the checkpoint above with the \
             preserved recent context.",
        ));
        out.extend(recent.iter().cloned());

        let record = EvictionRecord {
            original_tokens: tokens_before,
            compacted_tokens: self.estimate_messages(&out),
            strategy: CompactionKind::Summarize,
            files_created: vec![transcript_path],
            timestamp,
        };
        self.push_record(record.clone());
        debug!(
            before = record.original_tokens,
            after = record.compacted_tokens,
            "summarized conversation history"
        );
        Ok((out, Some(record)))
    }

    async fn model_summary(&self, old: &[Message]) -> anyhow::Result<String> {
        let Some(provider) = &self.summarizer else {
            anyhow::bail!("no summarizer provider configured");
        };
        let history = serialize_history(old);
        let req = CompletionRequest {
            messages: vec![
                Message::system(SUMMARY_PROMPT),
                Message::user(format!("---\n\n{history}")),
            ],
            tools: Vec::new(),
            stream: true,
        };
        let mut stream = provider.complete(req).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) => text.push_str(&delta),
                ResponseEvent::Done => break,
                _ => {}
            }
        }
        Ok(text)
    }
}

// ─── Free helpers ─────────────────────────────────────────────────────────────

fn resolve_window(config: &ContextConfig, model: &str) -> usize {
    // Config overrides are prefix-matched like the catalog, longest first.
    let override_window = config
        .context_windows
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix.as_str()) || *prefix == model)
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, w)| *w);
    override_window
        .unwrap_or_else(|| vel_model::catalog::window_for_model_or_default(model))
        as usize
}

fn looks_like_json(text: &str) -> bool {
    matches!(text.trim_start().as_bytes().first(), Some(b'{') | Some(b'['))
}

/// ~3 chars/token for JSON, ~3.8 for prose.
pub fn estimate_text_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let divisor = if looks_like_json(text) { 3.0 } else { 3.8 };
    ((text.len() as f32) / divisor).ceil() as usize
}

fn estimate_json_tokens(chars: usize) -> usize {
    ((chars as f32) / 3.0).ceil() as usize
}

/// Rewrite a file-writing tool call's bulky argument, returning the new args
/// and the referenced path.  `None` when no rewrite applies (wrong tool,
/// argument missing, or already compacted).
fn compact_call_args(name: &str, args: &Value) -> Option<(Value, String)> {
    let (_, arg_key) = FILE_WRITING_TOOLS.iter().find(|(tool, _)| *tool == name)?;
    let path = args.get("path").and_then(|p| p.as_str()).unwrap_or("?").to_string();
    let current = args.get(*arg_key).and_then(|c| c.as_str())?;
    let placeholder = format!("{COMPACT_PLACEHOLDER_PREFIX}{path}]");
    if current.starts_with(COMPACT_PLACEHOLDER_PREFIX) || current.len() <= placeholder.len() {
        return None;
    }
    let mut new_args = args.clone();
    new_args[*arg_key] = Value::String(placeholder);
    Some((new_args, path))
}

/// Serialise a message list into plain text for the summary prompt.
fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            };
            let text = match &m.content {
                MessageContent::Text(t) => t.clone(),
                MessageContent::Parts(parts) => parts
                    .iter()
                    .map(|p| match p {
                        Part::Text { text } => text.clone(),
                        Part::ToolCall { name, args, .. } => {
                            format!("[tool_call: {name}({args})]")
                        }
                        Part::ToolResult { value, .. } => format!("[tool_result: {value}]"),
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
            };
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Deterministic fallback summary: invoked tool names plus the head of each
/// user message.
fn heuristic_summary(messages: &[Message]) -> String {
    let mut tools: Vec<String> = Vec::new();
    let mut user_heads: Vec<String> = Vec::new();
    for msg in messages {
        match &msg.content {
            MessageContent::Parts(parts) => {
                for part in parts {
                    if let Part::ToolCall { name, .. } = part {
                        if !tools.contains(name) {
                            tools.push(name.clone());
                        }
                    }
                }
            }
            MessageContent::Text(t) if msg.role == Role::User => {
                let head: String = t.chars().take(200).collect();
                user_heads.push(head);
            }
            _ => {}
        }
    }
    let tools_line = if tools.is_empty() {
        "(none)".to_string()
    } else {
        tools.join(", ")
    };
    let requests = user_heads
        .iter()
        .map(|h| format!("- {h}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "## Session Summary (heuristic)\n\nTools invoked: {tools_line}\n\n\
         User requests so far:\n{requests}"
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
