// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use vel_model::Message;
use vel_tools::{ToolCall, ToolOutput};

use crate::context::{ContextManager, EvictionRecord};
use crate::events::HarnessEvent;
use crate::middleware::{Middleware, TurnContext};

/// Context-management middleware: attaches the three compaction tiers to
/// the loop's hook points.  Tier 1 (offload) runs on every successful tool
/// result; tiers 2–3 run in the before-turn hook.
pub struct ContextMiddleware {
    manager: Arc<ContextManager>,
}

impl ContextMiddleware {
    pub fn new(manager: Arc<ContextManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ContextManager> {
        &self.manager
    }

    async fn emit_records(&self, ctx: &TurnContext, records: &[EvictionRecord]) {
        for record in records {
            let _ = ctx
                .events
                .send(HarnessEvent::ContextCompacted {
                    tokens_before: record.original_tokens,
                    tokens_after: record.compacted_tokens,
                    strategy: record.strategy,
                })
                .await;
        }
    }
}

#[async_trait]
impl Middleware for ContextMiddleware {
    fn name(&self) -> &str {
        "context"
    }

    async fn before_turn(
        &self,
        ctx: &TurnContext,
        messages: Vec<Message>,
    ) -> anyhow::Result<Vec<Message>> {
        let (messages, records) = self.manager.before_turn(&ctx.session_id, messages).await?;
        self.emit_records(ctx, &records).await;
        Ok(messages)
    }

    async fn on_tool_result(
        &self,
        ctx: &TurnContext,
        call: &ToolCall,
        output: ToolOutput,
    ) -> ToolOutput {
        // Error messages stay inline; only successful bulk results offload.
        if output.is_error {
            return output;
        }
        let (content, record) = self
            .manager
            .process_tool_result(&call.name, &call.id, &output.content)
            .await;
        if let Some(record) = record {
            self.emit_records(ctx, &[record]).await;
        }
        ToolOutput { call_id: output.call_id, content, is_error: false }
    }

    fn state(&self) -> Value {
        serde_json::to_value(self.manager.records()).unwrap_or(Value::Null)
    }

    fn load_state(&self, state: &Value) {
        if let Ok(records) = serde_json::from_value::<Vec<EvictionRecord>>(state.clone()) {
            self.manager.load_records(records);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use vel_config::ContextConfig;
    use vel_store::MemoryBackend;

    use super::*;
    use crate::context::CompactionKind;

    fn middleware(limit: usize) -> ContextMiddleware {
        let mut config = ContextConfig::default();
        config.large_result_token_limit = limit;
        config.context_windows.insert("test-model".into(), 100_000);
        let manager = Arc::new(ContextManager::new(
            config,
            "test-model",
            Arc::new(MemoryBackend::new()),
        ));
        ContextMiddleware::new(manager)
    }

    fn ctx() -> (TurnContext, mpsc::Receiver<HarnessEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (
            TurnContext { session_id: "s".into(), turn: 1, events: tx },
            rx,
        )
    }

    #[tokio::test]
    async fn large_result_is_rewritten_and_event_emitted() {
        let mw = middleware(10);
        let (ctx, mut events) = ctx();
        let call = ToolCall { id: "c1".into(), name: "grep".into(), args: json!({}) };
        let out = mw
            .on_tool_result(&ctx, &call, ToolOutput::ok("c1", "x".repeat(500)))
            .await;
        assert!(out.content.contains("/context/tool_results/"));
        let ev = events.try_recv().unwrap();
        assert!(matches!(
            ev,
            HarnessEvent::ContextCompacted { strategy: CompactionKind::Offload, .. }
        ));
    }

    #[tokio::test]
    async fn error_results_stay_inline() {
        let mw = middleware(10);
        let (ctx, mut events) = ctx();
        let call = ToolCall { id: "c1".into(), name: "grep".into(), args: json!({}) };
        let big_error = "e".repeat(500);
        let out = mw
            .on_tool_result(&ctx, &call, ToolOutput::err("c1", big_error.clone()))
            .await;
        assert!(out.is_error);
        assert_eq!(out.content, big_error);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn state_round_trips_eviction_log() {
        let mw = middleware(10);
        let (ctx, _events) = ctx();
        let call = ToolCall { id: "c1".into(), name: "grep".into(), args: json!({}) };
        mw.on_tool_result(&ctx, &call, ToolOutput::ok("c1", "x".repeat(500)))
            .await;
        let state = mw.state();

        let fresh = middleware(10);
        fresh.load_state(&state);
        let records = fresh.manager().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].strategy, CompactionKind::Offload);
    }
}
