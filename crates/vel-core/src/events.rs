// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

use vel_tools::{TodoItem, ToolCall};

use crate::context::CompactionKind;
use crate::error::RunStatus;

/// Events emitted on a session's output stream.
///
/// Parent events are totally ordered; each subagent's events are totally
/// ordered; the two interleave in arrival order, with every subagent event
/// tagged by its originating `subagent_id` so consumers can demultiplex.
#[derive(Debug, Clone)]
pub enum HarnessEvent {
    /// A run started on the session.
    SessionStart { session_id: String },
    /// The run reached a terminal state.
    SessionEnd {
        session_id: String,
        status: RunStatus,
        reason: String,
    },
    /// A text chunk streamed from the model.
    TextDelta(String),
    /// A complete text response (after streaming finishes).
    TextComplete(String),
    /// The model has requested a tool call.
    ToolCallStarted(ToolCall),
    /// A tool call finished.
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// A confirmation-required tool is waiting on the approval manager.
    ApprovalRequired {
        call_id: String,
        tool_name: String,
        args: Value,
    },
    /// Token usage reported by the provider for one turn.
    TokenUsage {
        input: u32,
        output: u32,
        cache_read: u32,
        cache_creation: u32,
    },
    /// The context manager compressed the message history.
    ContextCompacted {
        tokens_before: usize,
        tokens_after: usize,
        strategy: CompactionKind,
    },
    /// The todo list was updated.
    TodoUpdate(Vec<TodoItem>),
    /// The model finished the current user turn.
    TurnComplete,
    /// A child agent loop started.
    SubagentStarted {
        subagent_id: String,
        agent_type: String,
        task: String,
    },
    /// Activity inside a child loop: a text fragment, a tool invocation, or
    /// a usage update — whichever fields apply.
    SubagentActivity {
        subagent_id: String,
        tool_name: Option<String>,
        text: Option<String>,
        tokens: Option<u32>,
    },
    /// A child finished with a result.
    SubagentCompleted { subagent_id: String, result: String },
    /// A child failed; the parent receives the error as a tool result.
    SubagentFailed { subagent_id: String, error: String },
    /// A recoverable error worth surfacing to the consumer.
    Error(String),
}
