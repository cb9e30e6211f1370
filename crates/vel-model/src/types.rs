// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

/// A single message in the conversation history.
///
/// Messages are append-only: the harness never mutates a message in place.
/// Context compaction produces *fresh* `Message` values that replace older
/// ones wholesale, which keeps provider prompt caches valid for the unchanged
/// prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The content of a message: either a plain string or an ordered part list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Part>),
}

/// One part of a multi-part message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        tool_call_id: String,
        value: String,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: MessageContent::Text(text.into()) }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    /// Assistant message carrying a single tool-call part.
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![Part::ToolCall {
                id: id.into(),
                name: name.into(),
                args,
            }]),
        }
    }

    /// Tool message carrying the result for an earlier tool call.
    pub fn tool_result(tool_call_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![Part::ToolResult {
                tool_call_id: tool_call_id.into(),
                value: value.into(),
            }]),
        }
    }

    /// Return the plain text of this message, if it is a single text block.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::Parts(parts) if parts.len() == 1 => match &parts[0] {
                Part::Text { text } => Some(text),
                _ => None,
            },
            _ => None,
        }
    }

    /// Iterate over all tool-call parts of this message.
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        let parts: &[Part] = match &self.content {
            MessageContent::Parts(parts) => parts,
            MessageContent::Text(_) => &[],
        };
        parts.iter().filter_map(|p| match p {
            Part::ToolCall { id, name, args } => Some((id.as_str(), name.as_str(), args)),
            _ => None,
        })
    }

    /// Return the tool-result value when this is a tool message for `call_id`.
    pub fn tool_result_value(&self, call_id: &str) -> Option<&str> {
        let MessageContent::Parts(parts) = &self.content else {
            return None;
        };
        parts.iter().find_map(|p| match p {
            Part::ToolResult { tool_call_id, value } if tool_call_id == call_id => {
                Some(value.as_str())
            }
            _ => None,
        })
    }

    /// Total character count of this message's content, used by length-based
    /// token estimators.
    pub fn char_len(&self) -> usize {
        match &self.content {
            MessageContent::Text(t) => t.len(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    Part::Text { text } => text.len(),
                    Part::ToolCall { name, args, .. } => name.len() + args.to_string().len(),
                    Part::ToolResult { value, .. } => value.len(),
                })
                .sum(),
        }
    }
}

// ─── Provider request / response ──────────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
}

/// A single streamed event from the model.
///
/// Tool-call arguments may arrive across multiple `ToolCall` events with the
/// same `index`; later chunks carry empty `id`/`name` fields and only append
/// to `arguments`.  The consumer accumulates per index and flushes on `Done`.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// The model wants to call a tool
    ToolCall {
        /// Parallel-tool-call index assigned by the provider
        index: u32,
        id: String,
        name: String,
        /// JSON argument fragment (may arrive across multiple deltas)
        arguments: String,
    },
    /// Final usage statistics
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        /// Tokens served from the provider's prompt cache (read hit).
        cache_read_tokens: u32,
        /// Tokens written into the provider's prompt cache.
        cache_creation_tokens: u32,
    },
    /// The stream finished normally
    Done,
    /// A recoverable error (non-fatal warning)
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
