// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Errors that terminate a run or prevent harness construction.
///
/// Tool-level failures (unknown tool, schema mismatch, handler errors,
/// denied approvals, subagent errors) are NOT represented here: they are
/// converted to error-valued tool results so the model can react, and the
/// loop continues.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("tool name collision: {name}")]
    ToolNameCollision { name: String },

    #[error("unknown agent type: {name}")]
    UnknownAgentType { name: String },

    #[error("session {session_id} already has a run in flight")]
    SessionBusy { session_id: String },

    #[error("provider error: {0}")]
    Provider(#[from] anyhow::Error),

    #[error("budget exceeded: {reason}")]
    BudgetExceeded { reason: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid state snapshot: {0}")]
    State(String),
}

/// Errors from the subagent scheduler.  These surface to the model as
/// human-readable tool-result strings, never as parent-run failures.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("{message}")]
    AtLimit { message: String },

    #[error("unknown agent type: {name}")]
    UnknownAgentType { name: String },

    #[error("no such subagent: {id}")]
    NotFound { id: String },

    #[error("timed out waiting for subagent")]
    Timeout,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// What a finished run hands back to the caller: the assembled assistant
/// text (possibly empty), a status tag, and the reason for non-completion.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub text: String,
    pub status: RunStatus,
    pub reason: Option<String>,
    /// Model-call iterations consumed.
    pub steps: u32,
}

impl RunOutcome {
    pub fn completed(text: String, steps: u32) -> Self {
        Self { text, status: RunStatus::Completed, reason: None, steps }
    }

    pub fn failed(text: String, reason: impl Into<String>, steps: u32) -> Self {
        Self { text, status: RunStatus::Failed, reason: Some(reason.into()), steps }
    }

    pub fn cancelled(text: String, steps: u32) -> Self {
        Self {
            text,
            status: RunStatus::Cancelled,
            reason: Some("cancelled".into()),
            steps,
        }
    }
}
