// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vel_model::Message;

/// In-memory conversation session.
///
/// The message list is append-only with respect to logical identity: the
/// agent loop only pushes, and context compaction swaps in fresh message
/// values while preserving message boundaries and tool-call pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Total tokens reported by the provider across this session's runs.
    pub total_tokens: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            total_tokens: 0,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// Replace the message list wholesale (used by context compaction).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
