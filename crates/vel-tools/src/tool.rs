// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier assigned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// Lifecycle of a tool call.  Transitions are monotonic; a call never
/// regresses to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallState {
    PendingInput,
    Approved,
    Denied,
    Running,
    Completed,
    Failed,
}

impl ToolCallState {
    /// Whether moving to `next` is a legal forward transition.
    pub fn can_transition(self, next: Self) -> bool {
        use ToolCallState::*;
        matches!(
            (self, next),
            (PendingInput, Approved)
                | (PendingInput, Denied)
                | (PendingInput, Running)
                | (Approved, Running)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ToolCallState::Denied | ToolCallState::Completed | ToolCallState::Failed
        )
    }
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text content of the result.
    pub content: String,
    /// If true, the tool execution failed non-fatally (content is the error
    /// message).  The agent loop appends it as a tool-result either way so
    /// the model can react.
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Trait that every built-in and user-defined tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the argument object
    fn input_schema(&self) -> Value;
    /// Whether an approval gate must be passed before each invocation.
    fn requires_confirmation(&self) -> bool {
        false
    }
    /// Free-form category tags used for filtering.
    fn tags(&self) -> &[&str] {
        &[]
    }
    /// Execute the tool.  Errors should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_forward_transitions_allowed() {
        use ToolCallState::*;
        assert!(PendingInput.can_transition(Approved));
        assert!(PendingInput.can_transition(Denied));
        assert!(Approved.can_transition(Running));
        assert!(Running.can_transition(Completed));
        assert!(Running.can_transition(Failed));
    }

    #[test]
    fn lifecycle_never_regresses() {
        use ToolCallState::*;
        assert!(!Completed.can_transition(Running));
        assert!(!Running.can_transition(PendingInput));
        assert!(!Denied.can_transition(Approved));
        assert!(!Failed.can_transition(Completed));
    }

    #[test]
    fn terminal_states() {
        use ToolCallState::*;
        assert!(Denied.is_terminal());
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Running.is_terminal());
        assert!(!PendingInput.is_terminal());
    }

    #[test]
    fn output_constructors_set_error_flag() {
        assert!(!ToolOutput::ok("c", "fine").is_error);
        assert!(ToolOutput::err("c", "boom").is_error);
    }
}
