// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;

use vel_tools::Tool;

use crate::middleware::Middleware;
use crate::scheduler::SubagentScheduler;
use crate::task_tools::{
    CancelSubagentTool, ListSubagentsTool, SpawnParallelTool, SpawnSubagentTool,
    WaitAllSubagentsTool, WaitSubagentTool,
};

/// Subagents middleware: binds the spawn/wait/cancel tools to the session's
/// scheduler.  Every spawn — including one made by a child whose tool set
/// allows it — goes through the same scheduler instance, so the session-wide
/// caps hold across the whole subagent tree.
pub struct SubagentsMiddleware {
    scheduler: Arc<SubagentScheduler>,
}

impl SubagentsMiddleware {
    pub fn new(scheduler: Arc<SubagentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Middleware for SubagentsMiddleware {
    fn name(&self) -> &str {
        "subagents"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(SpawnSubagentTool::new(self.scheduler.clone())),
            Arc::new(SpawnParallelTool::new(self.scheduler.clone())),
            Arc::new(WaitSubagentTool::new(self.scheduler.clone())),
            Arc::new(WaitAllSubagentsTool::new(self.scheduler.clone())),
            Arc::new(CancelSubagentTool::new(self.scheduler.clone())),
            Arc::new(ListSubagentsTool::new(self.scheduler.clone())),
        ]
    }

    fn system_prompt_segment(&self) -> Option<String> {
        let types = self.scheduler.list_agent_types();
        if types.is_empty() {
            return None;
        }
        let lines: Vec<String> = types
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect();
        Some(format!(
            "## Delegation\n\
             You can delegate isolated sub-tasks to sub-agents with \
             spawn_subagent / spawn_parallel, then collect results with \
             wait_subagent / wait_all_subagents. Each sub-agent starts fresh \
             and sees only its task text, so make tasks self-contained.\n\
             Available agent types:\n{}",
            lines.join("\n")
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
