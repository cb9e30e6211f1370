// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use vel_tools::{TodoItem, TodoReadTool, TodoWriteTool, Tool, ToolEvent};

use crate::middleware::Middleware;

/// Planning middleware: owns the session todo list and contributes the
/// `todo_write`/`todo_read` tools.  The list lives in tool-owned state, not
/// in the system prompt, so updates never break prompt caching.
pub struct PlanningMiddleware {
    todos: Arc<Mutex<Vec<TodoItem>>>,
    event_tx: mpsc::Sender<ToolEvent>,
}

impl PlanningMiddleware {
    /// The paired receiver must be handed to the agent loop so todo updates
    /// surface as harness events.
    pub fn new() -> (Self, mpsc::Receiver<ToolEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        (
            Self {
                todos: Arc::new(Mutex::new(Vec::new())),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn todos(&self) -> Vec<TodoItem> {
        self.todos.lock().expect("todo list lock poisoned").clone()
    }
}

#[async_trait]
impl Middleware for PlanningMiddleware {
    fn name(&self) -> &str {
        "planning"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(TodoWriteTool::new(self.todos.clone(), self.event_tx.clone())),
            Arc::new(TodoReadTool::new(self.todos.clone())),
        ]
    }

    fn system_prompt_segment(&self) -> Option<String> {
        Some(
            "## Planning\n\
             For multi-step work, maintain a task list with todo_write and \
             keep item statuses current as you progress."
                .to_string(),
        )
    }

    fn state(&self) -> Value {
        serde_json::to_value(self.todos()).unwrap_or(Value::Null)
    }

    fn load_state(&self, state: &Value) {
        if let Ok(items) = serde_json::from_value::<Vec<TodoItem>>(state.clone()) {
            *self.todos.lock().expect("todo list lock poisoned") = items;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
