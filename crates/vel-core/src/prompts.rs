// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
//! System-prompt assembly.
//!
//! The assembled prompt must be byte-stable across turns within a session so
//! providers that hash the prompt prefix can serve it from cache.  Anything
//! volatile (todos, loaded skills, tool results) flows through messages and
//! tool results instead.

const BASE_PROMPT: &str = "\
You are a capable assistant driving tools in a loop to complete the user's \
request. Work step by step: inspect before you modify, keep tool calls \
purposeful, and stop when the task is done. When a tool returns an error, \
read the message and adapt rather than repeating the same call. Reply to \
the user with a concise final answer once no further tool work is needed.";

/// Build the parent agent's system prompt from the base text plus the
/// middleware-contributed segments, joined with blank lines.
pub fn system_prompt(segments: &[String]) -> String {
    let mut out = String::from(BASE_PROMPT);
    for segment in segments {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        out.push_str("\n\n");
        out.push_str(segment);
    }
    out
}

/// Build a child agent's system prompt from its profile description.
pub fn subagent_prompt(description: &str) -> String {
    format!(
        "You are a focused sub-agent. Profile: {description}\n\
         Complete the assigned task using the tools available to you, then \
         reply with a concise final answer. You cannot ask the user \
         questions; make reasonable assumptions and note them."
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
