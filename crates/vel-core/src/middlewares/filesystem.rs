// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;

use vel_store::FsBackend;
use vel_tools::{EditFileTool, ListDirTool, ReadFileTool, Tool, WriteFileTool};

use crate::middleware::Middleware;

/// Filesystem middleware: read/write/edit/list tools over the harness's
/// abstract backend.
pub struct FilesystemMiddleware {
    backend: Arc<dyn FsBackend>,
    confirm_writes: bool,
}

impl FilesystemMiddleware {
    pub fn new(backend: Arc<dyn FsBackend>) -> Self {
        Self { backend, confirm_writes: false }
    }

    /// Gate write_file/edit_file behind the approval manager.
    pub fn with_write_confirmation(mut self) -> Self {
        self.confirm_writes = true;
        self
    }
}

#[async_trait]
impl Middleware for FilesystemMiddleware {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        let write = WriteFileTool::new(self.backend.clone());
        let edit = EditFileTool::new(self.backend.clone());
        let (write, edit) = if self.confirm_writes {
            (write.with_confirmation(), edit.with_confirmation())
        } else {
            (write, edit)
        };
        vec![
            Arc::new(ReadFileTool::new(self.backend.clone())),
            Arc::new(write),
            Arc::new(edit),
            Arc::new(ListDirTool::new(self.backend.clone())),
        ]
    }

    fn system_prompt_segment(&self) -> Option<String> {
        Some(
            "## Files\n\
             Use read_file, write_file, edit_file, and list_dir for all file \
             access. Offloaded tool results under /context/ are readable with \
             read_file."
                .to_string(),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
