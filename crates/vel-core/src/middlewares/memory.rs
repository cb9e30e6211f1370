// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use vel_store::FsBackend;

use crate::middleware::Middleware;

const AGENTS_FILE: &str = "/memories/AGENTS.md";

/// Memory middleware: loads the persistent `AGENTS.md` from the backend's
/// `/memories/` route at construction and serves it as a stable prompt
/// segment.  Writing memories back is ordinary `write_file` work under
/// `/memories/…`; this middleware only handles session-start loading.
pub struct MemoryMiddleware {
    content: Option<String>,
}

impl MemoryMiddleware {
    pub async fn load(backend: Arc<dyn FsBackend>) -> Self {
        let content = match backend.read(AGENTS_FILE).await {
            Ok(text) if !text.trim().is_empty() => {
                debug!(bytes = text.len(), "loaded agent memory");
                Some(text)
            }
            _ => None,
        };
        Self { content }
    }

    pub fn has_memory(&self) -> bool {
        self.content.is_some()
    }
}

#[async_trait]
impl Middleware for MemoryMiddleware {
    fn name(&self) -> &str {
        "memory"
    }

    fn system_prompt_segment(&self) -> Option<String> {
        self.content.as_ref().map(|content| {
            format!(
                "## Memory\n\
                 Persistent notes from previous sessions \
                 (update by writing to {AGENTS_FILE}):\n\n{content}"
            )
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
