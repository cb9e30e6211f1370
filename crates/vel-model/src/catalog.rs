// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
//! Static context-window catalog with prefix-match fallback.
//!
//! Network drivers are external to this workspace, so the catalog carries
//! only what the harness itself needs: a model-name → context-window map.
//! Entries are matched exact-first, then by longest prefix, so a dated
//! release like `gpt-4o-2024-11-20` resolves through the `gpt-4o` entry.

/// `(model-name prefix, context window in tokens)` — longest prefix wins.
const WINDOWS: &[(&str, u32)] = &[
    ("gpt-4o-mini", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4.1", 1_047_576),
    ("o3", 200_000),
    ("claude-opus-4", 200_000),
    ("claude-sonnet-4", 200_000),
    ("claude-haiku-4", 200_000),
    ("claude-3", 200_000),
    ("gemini-2", 1_048_576),
    ("gemini-1.5-pro", 2_097_152),
    ("llama-3", 128_000),
    ("qwen", 131_072),
    ("deepseek", 131_072),
    ("mistral", 128_000),
    ("mock", 128_000),
];

/// Fallback window for models absent from the catalog.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;

/// Look up the context window for a model name.
///
/// Checks for an exact match first, then falls back to the longest matching
/// prefix.  Returns `None` when nothing matches.
pub fn window_for_model(model: &str) -> Option<u32> {
    if let Some((_, w)) = WINDOWS.iter().find(|(name, _)| *name == model) {
        return Some(*w);
    }
    WINDOWS
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, w)| *w)
}

/// Like [`window_for_model`] but never fails: unknown models get
/// [`DEFAULT_CONTEXT_WINDOW`].
pub fn window_for_model_or_default(model: &str) -> u32 {
    window_for_model(model).unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

// ── Unit tests ────────────────────────────────────────────────────────────────
