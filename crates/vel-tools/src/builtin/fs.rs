// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
//! Filesystem tools backed by the abstract [`FsBackend`].
//!
//! These operate on the harness's virtual path space, so offloaded tool
//! results under `/context/…` and memories under `/memories/…` are readable
//! with the same `read_file` tool the model uses for everything else.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use vel_store::FsBackend;

use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct ReadFileTool {
    backend: Arc<dyn FsBackend>,
}

impl ReadFileTool {
    pub fn new(backend: Arc<dyn FsBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the content of a file. Supports optional line-based offset and \
         limit for reading large files in slices."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "First line to read (0-based, default 0)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
                }
            },
            "required": ["path"]
        })
    }

    fn tags(&self) -> &[&str] {
        &["filesystem"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = call.args["path"].as_str().unwrap_or_default();
        debug!(path, "read_file tool");
        let content = match self.backend.read(path).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);
        if offset == 0 && limit.is_none() {
            return ToolOutput::ok(&call.id, content);
        }
        let lines: Vec<&str> = content.lines().collect();
        let end = limit
            .map(|l| (offset + l).min(lines.len()))
            .unwrap_or(lines.len());
        if offset >= lines.len() {
            return ToolOutput::err(
                &call.id,
                format!("offset {offset} past end of file ({} lines)", lines.len()),
            );
        }
        ToolOutput::ok(&call.id, lines[offset..end].join("\n"))
    }
}

pub struct WriteFileTool {
    backend: Arc<dyn FsBackend>,
    confirm: bool,
}

impl WriteFileTool {
    pub fn new(backend: Arc<dyn FsBackend>) -> Self {
        Self { backend, confirm: false }
    }

    /// Require an approval gate before each write.
    pub fn with_confirmation(mut self) -> Self {
        self.confirm = true;
        self
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, overwriting any existing content and \
         creating parent directories as needed. ALWAYS prefer edit_file for \
         modifying existing files."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn requires_confirmation(&self) -> bool {
        self.confirm
    }

    fn tags(&self) -> &[&str] {
        &["filesystem"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = call.args["path"].as_str().unwrap_or_default();
        let content = call.args["content"].as_str().unwrap_or_default();
        debug!(path, bytes = content.len(), "write_file tool");
        match self.backend.write(path, content).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("Wrote {} bytes to {path}", content.len())),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct EditFileTool {
    backend: Arc<dyn FsBackend>,
    confirm: bool,
}

impl EditFileTool {
    pub fn new(backend: Arc<dyn FsBackend>) -> Self {
        Self { backend, confirm: false }
    }

    pub fn with_confirmation(mut self) -> Self {
        self.confirm = true;
        self
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact text fragment in a file. old_text must occur exactly \
         once; include enough surrounding context to make it unique."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to edit"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    fn requires_confirmation(&self) -> bool {
        self.confirm
    }

    fn tags(&self) -> &[&str] {
        &["filesystem"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = call.args["path"].as_str().unwrap_or_default();
        let old_text = call.args["old_text"].as_str().unwrap_or_default();
        let new_text = call.args["new_text"].as_str().unwrap_or_default();
        debug!(path, "edit_file tool");

        let content = match self.backend.read(path).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let occurrences = content.matches(old_text).count();
        if occurrences == 0 {
            return ToolOutput::err(&call.id, format!("old_text not found in {path}"));
        }
        if occurrences > 1 {
            return ToolOutput::err(
                &call.id,
                format!("old_text occurs {occurrences} times in {path}; make it unique"),
            );
        }
        let updated = content.replacen(old_text, new_text, 1);
        match self.backend.write(path, &updated).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("Edited {path}")),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct ListDirTool {
    backend: Arc<dyn FsBackend>,
}

impl ListDirTool {
    pub fn new(backend: Arc<dyn FsBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List all file paths under a directory prefix."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory prefix to list"
                }
            },
            "required": ["path"]
        })
    }

    fn tags(&self) -> &[&str] {
        &["filesystem"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = call.args["path"].as_str().unwrap_or_default();
        match self.backend.list(path).await {
            Ok(paths) if paths.is_empty() => {
                ToolOutput::ok(&call.id, format!("(no files under {path})"))
            }
            Ok(paths) => ToolOutput::ok(&call.id, paths.join("\n")),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use vel_store::MemoryBackend;

    use super::*;

    fn backend() -> Arc<dyn FsBackend> {
        Arc::new(MemoryBackend::new())
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "t1".into(), name: name.into(), args }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let b = backend();
        let w = WriteFileTool::new(b.clone());
        let r = ReadFileTool::new(b);
        let out = w
            .execute(&call("write_file", json!({"path": "/a.txt", "content": "hello"})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let out = r.execute(&call("read_file", json!({"path": "/a.txt"}))).await;
        assert_eq!(out.content, "hello");
    }

    #[tokio::test]
    async fn read_missing_is_error() {
        let r = ReadFileTool::new(backend());
        let out = r.execute(&call("read_file", json!({"path": "/nope"}))).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn read_with_offset_and_limit() {
        let b = backend();
        b.write("/lines.txt", "l0\nl1\nl2\nl3\nl4").await.unwrap();
        let r = ReadFileTool::new(b);
        let out = r
            .execute(&call(
                "read_file",
                json!({"path": "/lines.txt", "offset": 1, "limit": 2}),
            ))
            .await;
        assert_eq!(out.content, "l1\nl2");
    }

    #[tokio::test]
    async fn read_offset_past_end_is_error() {
        let b = backend();
        b.write("/short.txt", "only line").await.unwrap();
        let r = ReadFileTool::new(b);
        let out = r
            .execute(&call("read_file", json!({"path": "/short.txt", "offset": 10})))
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn edit_replaces_unique_fragment() {
        let b = backend();
        b.write("/f.txt", "alpha beta gamma").await.unwrap();
        let e = EditFileTool::new(b.clone());
        let out = e
            .execute(&call(
                "edit_file",
                json!({"path": "/f.txt", "old_text": "beta", "new_text": "BETA"}),
            ))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(b.read("/f.txt").await.unwrap(), "alpha BETA gamma");
    }

    #[tokio::test]
    async fn edit_rejects_ambiguous_fragment() {
        let b = backend();
        b.write("/f.txt", "x x").await.unwrap();
        let e = EditFileTool::new(b);
        let out = e
            .execute(&call(
                "edit_file",
                json!({"path": "/f.txt", "old_text": "x", "new_text": "y"}),
            ))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("2 times"));
    }

    #[tokio::test]
    async fn edit_rejects_missing_fragment() {
        let b = backend();
        b.write("/f.txt", "abc").await.unwrap();
        let e = EditFileTool::new(b);
        let out = e
            .execute(&call(
                "edit_file",
                json!({"path": "/f.txt", "old_text": "zzz", "new_text": "y"}),
            ))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("not found"));
    }

    #[tokio::test]
    async fn list_dir_reports_paths() {
        let b = backend();
        b.write("/dir/a.txt", "1").await.unwrap();
        b.write("/dir/b.txt", "2").await.unwrap();
        let l = ListDirTool::new(b);
        let out = l.execute(&call("list_dir", json!({"path": "/dir"}))).await;
        assert!(out.content.contains("/dir/a.txt"));
        assert!(out.content.contains("/dir/b.txt"));
    }

    #[test]
    fn confirmation_flag_is_off_by_default() {
        let b = backend();
        assert!(!WriteFileTool::new(b.clone()).requires_confirmation());
        assert!(WriteFileTool::new(b).with_confirmation().requires_confirmation());
    }
}
