// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
//! Middleware composition.
//!
//! A middleware is a capability provider: it contributes tools, a
//! system-prompt segment, lifecycle hooks, and serializable state.  The
//! harness composes an ordered list of them deterministically — tool lists
//! concatenate (duplicate names are a boot error), prompt segments join with
//! blank lines, hooks pipeline in list order, and state serialises to a map
//! keyed by middleware name.  Middlewares never call one another directly;
//! all interaction flows through the pipelined hook values.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use vel_model::Message;
use vel_tools::{Tool, ToolCall, ToolOutput, ToolRegistry};

use crate::error::HarnessError;
use crate::events::HarnessEvent;

/// Per-turn context handed to middleware hooks.
#[derive(Clone)]
pub struct TurnContext {
    pub session_id: String,
    /// 1-based loop iteration within the current run.
    pub turn: u32,
    /// Session event stream; hooks may emit observability events.
    pub events: mpsc::Sender<HarnessEvent>,
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Tools contributed to the session.  Names must be globally unique
    /// across the composed stack.
    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// A text block appended to the system prompt.  Must be stable across
    /// turns within a session (prompt-caching invariant).
    fn system_prompt_segment(&self) -> Option<String> {
        None
    }

    /// Runs before each provider call; may rewrite the message list.
    async fn before_turn(
        &self,
        _ctx: &TurnContext,
        messages: Vec<Message>,
    ) -> anyhow::Result<Vec<Message>> {
        Ok(messages)
    }

    /// Runs on each raw tool result before it is appended to the log.
    async fn on_tool_result(
        &self,
        _ctx: &TurnContext,
        _call: &ToolCall,
        output: ToolOutput,
    ) -> ToolOutput {
        output
    }

    /// Runs after the provider finishes a turn.
    async fn after_assistant(
        &self,
        _ctx: &TurnContext,
        messages: Vec<Message>,
    ) -> anyhow::Result<Vec<Message>> {
        Ok(messages)
    }

    /// Serializable middleware state (todos, active skills, eviction log…).
    fn state(&self) -> Value {
        Value::Null
    }

    /// Restore state captured by [`state`][Middleware::state].
    fn load_state(&self, _state: &Value) {}
}

/// An ordered, immutable middleware list with deterministic composition.
#[derive(Default)]
pub struct MiddlewareStack {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    pub fn list(&self) -> &[Arc<dyn Middleware>] {
        &self.middlewares
    }

    /// Concatenate all contributed tools plus `extra` into one registry.
    /// A duplicate tool name anywhere in the composition is a boot error.
    pub fn build_registry(
        &self,
        extra: &[Arc<dyn Tool>],
    ) -> Result<ToolRegistry, HarnessError> {
        let mut registry = ToolRegistry::new();
        for mw in &self.middlewares {
            for tool in mw.tools() {
                let name = tool.name().to_string();
                registry
                    .register(tool)
                    .map_err(|_| HarnessError::ToolNameCollision { name })?;
            }
        }
        for tool in extra {
            let name = tool.name().to_string();
            registry
                .register(tool.clone())
                .map_err(|_| HarnessError::ToolNameCollision { name })?;
        }
        Ok(registry)
    }

    /// All prompt segments, in order, joined with blank lines.
    pub fn prompt_segments(&self) -> Vec<String> {
        self.middlewares
            .iter()
            .filter_map(|mw| mw.system_prompt_segment())
            .collect()
    }

    pub async fn before_turn(
        &self,
        ctx: &TurnContext,
        mut messages: Vec<Message>,
    ) -> anyhow::Result<Vec<Message>> {
        for mw in &self.middlewares {
            messages = mw.before_turn(ctx, messages).await?;
        }
        Ok(messages)
    }

    pub async fn on_tool_result(
        &self,
        ctx: &TurnContext,
        call: &ToolCall,
        mut output: ToolOutput,
    ) -> ToolOutput {
        for mw in &self.middlewares {
            output = mw.on_tool_result(ctx, call, output).await;
        }
        output
    }

    pub async fn after_assistant(
        &self,
        ctx: &TurnContext,
        mut messages: Vec<Message>,
    ) -> anyhow::Result<Vec<Message>> {
        for mw in &self.middlewares {
            messages = mw.after_assistant(ctx, messages).await?;
        }
        Ok(messages)
    }

    /// State of every middleware, keyed by name.  `Null` entries are elided.
    pub fn state(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        for mw in &self.middlewares {
            let state = mw.state();
            if !state.is_null() {
                map.insert(mw.name().to_string(), state);
            }
        }
        map
    }

    pub fn load_state(&self, state: &serde_json::Map<String, Value>) {
        for mw in &self.middlewares {
            if let Some(entry) = state.get(mw.name()) {
                mw.load_state(entry);
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    fn ctx() -> TurnContext {
        let (tx, _rx) = mpsc::channel(8);
        TurnContext { session_id: "s".into(), turn: 1, events: tx }
    }

    struct TaggingMiddleware {
        name: &'static str,
        segment: Option<&'static str>,
        tool_names: Vec<&'static str>,
        state: Mutex<Value>,
    }

    impl TaggingMiddleware {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                segment: None,
                tool_names: Vec::new(),
                state: Mutex::new(Value::Null),
            }
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[async_trait]
    impl Middleware for TaggingMiddleware {
        fn name(&self) -> &str {
            self.name
        }

        fn tools(&self) -> Vec<Arc<dyn Tool>> {
            self.tool_names
                .iter()
                .map(|n| Arc::new(NamedTool(n)) as Arc<dyn Tool>)
                .collect()
        }

        fn system_prompt_segment(&self) -> Option<String> {
            self.segment.map(|s| s.to_string())
        }

        async fn before_turn(
            &self,
            _ctx: &TurnContext,
            mut messages: Vec<Message>,
        ) -> anyhow::Result<Vec<Message>> {
            messages.push(Message::user(format!("seen by {}", self.name)));
            Ok(messages)
        }

        async fn on_tool_result(
            &self,
            _ctx: &TurnContext,
            _call: &ToolCall,
            output: ToolOutput,
        ) -> ToolOutput {
            ToolOutput::ok(&output.call_id, format!("{}+{}", output.content, self.name))
        }

        fn state(&self) -> Value {
            self.state.lock().unwrap().clone()
        }

        fn load_state(&self, state: &Value) {
            *self.state.lock().unwrap() = state.clone();
        }
    }

    #[tokio::test]
    async fn hooks_run_in_list_order() {
        let stack = MiddlewareStack::new(vec![
            Arc::new(TaggingMiddleware::new("first")),
            Arc::new(TaggingMiddleware::new("second")),
        ]);
        let out = stack.before_turn(&ctx(), vec![]).await.unwrap();
        assert_eq!(out[0].as_text(), Some("seen by first"));
        assert_eq!(out[1].as_text(), Some("seen by second"));

        let call = ToolCall { id: "c".into(), name: "t".into(), args: json!({}) };
        let piped = stack
            .on_tool_result(&ctx(), &call, ToolOutput::ok("c", "base"))
            .await;
        assert_eq!(piped.content, "base+first+second");
    }

    #[test]
    fn registry_concatenates_tools() {
        let mut a = TaggingMiddleware::new("a");
        a.tool_names = vec!["t1", "t2"];
        let mut b = TaggingMiddleware::new("b");
        b.tool_names = vec!["t3"];
        let stack = MiddlewareStack::new(vec![Arc::new(a), Arc::new(b)]);
        let registry = stack.build_registry(&[]).unwrap();
        assert_eq!(registry.names(), vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn duplicate_tool_name_is_boot_error() {
        let mut a = TaggingMiddleware::new("a");
        a.tool_names = vec!["same"];
        let mut b = TaggingMiddleware::new("b");
        b.tool_names = vec!["same"];
        let stack = MiddlewareStack::new(vec![Arc::new(a), Arc::new(b)]);
        let err = stack.build_registry(&[]).unwrap_err();
        assert!(matches!(err, HarnessError::ToolNameCollision { name } if name == "same"));
    }

    #[test]
    fn prompt_segments_in_order_skipping_none() {
        let mut a = TaggingMiddleware::new("a");
        a.segment = Some("segment A");
        let b = TaggingMiddleware::new("b"); // no segment
        let mut c = TaggingMiddleware::new("c");
        c.segment = Some("segment C");
        let stack = MiddlewareStack::new(vec![Arc::new(a), Arc::new(b), Arc::new(c)]);
        assert_eq!(stack.prompt_segments(), vec!["segment A", "segment C"]);
    }

    #[test]
    fn state_round_trips_by_name() {
        let a = TaggingMiddleware::new("a");
        *a.state.lock().unwrap() = json!({"counter": 7});
        let stack = MiddlewareStack::new(vec![Arc::new(a)]);
        let snapshot = stack.state();
        assert_eq!(snapshot["a"]["counter"], 7);

        let fresh = TaggingMiddleware::new("a");
        let fresh_stack = MiddlewareStack::new(vec![Arc::new(fresh)]);
        fresh_stack.load_state(&snapshot);
        assert_eq!(fresh_stack.state()["a"]["counter"], 7);
    }
}
