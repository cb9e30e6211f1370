// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::events::{render_todos_markdown, TodoItem, TodoPriority, TodoStatus, ToolEvent};
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Replaces the session's todo list with the supplied items.
///
/// The list lives in a tool-owned shared slot, never in the system prompt, so
/// updating it does not invalidate the provider's prompt cache.
pub struct TodoWriteTool {
    todos: Arc<Mutex<Vec<TodoItem>>>,
    event_tx: mpsc::Sender<ToolEvent>,
}

impl TodoWriteTool {
    pub fn new(todos: Arc<Mutex<Vec<TodoItem>>>, event_tx: mpsc::Sender<ToolEvent>) -> Self {
        Self { todos, event_tx }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Create and manage a structured task list for the current session.\n\n\
         ## Task Statuses\n\
         - pending: Not yet started\n\
         - in_progress: Currently being worked on (only ONE at a time)\n\
         - completed: Finished successfully\n\
         - blocked: Cannot proceed until something else changes\n\n\
         ## When to Use\n\
         Use proactively for complex multi-step tasks (3+ distinct steps), \
         and keep statuses current: mark items completed IMMEDIATELY after \
         finishing them.\n\n\
         ## IMPORTANT\n\
         - Each item requires a unique id, content, and status\n\
         - Calling todo_write replaces the entire list (not a merge/patch)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "Array of todo items to set (replaces existing list)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "blocked"]
                            },
                            "priority": {
                                "type": "string",
                                "enum": ["high", "medium", "low"]
                            },
                            "notes": { "type": "string" }
                        },
                        "required": ["id", "content", "status"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["planning"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let todos_value = match call.args.get("todos").and_then(|v| v.as_array()) {
            Some(arr) => arr.clone(),
            None => return ToolOutput::err(&call.id, "missing 'todos' array"),
        };

        let existing = self.todos.lock().expect("todo list lock poisoned").clone();
        let now = Utc::now();
        let mut items: Vec<TodoItem> = Vec::new();
        for item in &todos_value {
            let id = match item.get("id").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(&call.id, "todo item missing 'id'"),
            };
            let content = match item.get("content").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => {
                    return ToolOutput::err(&call.id, format!("todo '{id}' missing 'content'"))
                }
            };
            let status = match item
                .get("status")
                .and_then(|v| v.as_str())
                .and_then(TodoStatus::parse)
            {
                Some(s) => s,
                None => {
                    return ToolOutput::err(&call.id, format!("invalid status for todo '{id}'"))
                }
            };
            let priority = item
                .get("priority")
                .and_then(|v| v.as_str())
                .and_then(TodoPriority::parse)
                .unwrap_or_default();
            let notes = item
                .get("notes")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            // Creation timestamps survive rewrites of the same id.
            let created_at = existing
                .iter()
                .find(|t| t.id == id)
                .map(|t| t.created_at)
                .unwrap_or(now);
            items.push(TodoItem {
                id,
                content,
                status,
                priority,
                notes,
                created_at,
                updated_at: now,
            });
        }

        let in_progress = items
            .iter()
            .filter(|t| t.status == TodoStatus::InProgress)
            .count();
        if in_progress > 1 {
            return ToolOutput::err(&call.id, "at most one todo can be 'in_progress' at a time");
        }

        debug!(count = items.len(), "todo_write tool");

        *self.todos.lock().expect("todo list lock poisoned") = items.clone();
        let _ = self.event_tx.send(ToolEvent::TodoUpdate(items.clone())).await;

        ToolOutput::ok(
            &call.id,
            format!("Todos updated:\n{}", render_todos_markdown(&items)),
        )
    }
}

/// Renders the current todo list as markdown.
pub struct TodoReadTool {
    todos: Arc<Mutex<Vec<TodoItem>>>,
}

impl TodoReadTool {
    pub fn new(todos: Arc<Mutex<Vec<TodoItem>>>) -> Self {
        Self { todos }
    }
}

#[async_trait]
impl Tool for TodoReadTool {
    fn name(&self) -> &str {
        "todo_read"
    }

    fn description(&self) -> &str {
        "Read the current session todo list as markdown."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    fn tags(&self) -> &[&str] {
        &["planning"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let items = self.todos.lock().expect("todo list lock poisoned");
        ToolOutput::ok(&call.id, render_todos_markdown(&items))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
