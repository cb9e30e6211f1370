// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
//! Tools through which the model drives the subagent scheduler.
//!
//! Scheduler errors (caps, unknown types, timeouts) come back as
//! human-readable tool-result strings the model can interpret and adapt to;
//! they never fail the parent run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use vel_tools::{Tool, ToolCall, ToolOutput};

use crate::scheduler::{SubagentRun, SubagentScheduler};

const DEFAULT_WAIT_SECS: u64 = 300;

fn format_run(run: &SubagentRun) -> String {
    match (&run.result, &run.error) {
        (Some(result), _) => format!("[{}] {}", run.id, result),
        (None, Some(error)) => format!("[{}] error: {}", run.id, error),
        (None, None) => format!("[{}] {:?}", run.id, run.status),
    }
}

pub struct SpawnSubagentTool {
    scheduler: Arc<SubagentScheduler>,
    /// Set when this tool instance belongs to a child loop; spawns then
    /// record that child as the grandchild's parent.
    parent: Option<String>,
}

impl SpawnSubagentTool {
    pub fn new(scheduler: Arc<SubagentScheduler>) -> Self {
        Self { scheduler, parent: None }
    }

    pub fn with_parent(mut self, run_id: String) -> Self {
        self.parent = Some(run_id);
        self
    }
}

#[async_trait]
impl Tool for SpawnSubagentTool {
    fn name(&self) -> &str {
        "spawn_subagent"
    }

    fn description(&self) -> &str {
        "Spawn an isolated sub-agent to work on a focused task in the \
         background. The sub-agent starts with a fresh context containing \
         only the task text. Returns the subagent id; use wait_subagent to \
         collect its result."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Complete, self-contained task instruction"
                },
                "agent_type": {
                    "type": "string",
                    "description": "Registered agent type to run"
                }
            },
            "required": ["task", "agent_type"]
        })
    }

    fn tags(&self) -> &[&str] {
        &["subagents"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let task = call.args["task"].as_str().unwrap_or_default();
        let agent_type = call.args["agent_type"].as_str().unwrap_or_default();
        match self
            .scheduler
            .spawn_with_parent(task, agent_type, self.parent.clone())
        {
            Ok(run) => ToolOutput::ok(
                &call.id,
                format!("Spawned subagent {} ({})", run.id, run.agent_type),
            ),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct SpawnParallelTool {
    scheduler: Arc<SubagentScheduler>,
    parent: Option<String>,
}

impl SpawnParallelTool {
    pub fn new(scheduler: Arc<SubagentScheduler>) -> Self {
        Self { scheduler, parent: None }
    }

    pub fn with_parent(mut self, run_id: String) -> Self {
        self.parent = Some(run_id);
        self
    }
}

#[async_trait]
impl Tool for SpawnParallelTool {
    fn name(&self) -> &str {
        "spawn_parallel"
    }

    fn description(&self) -> &str {
        "Spawn several sub-agents at once, one per task, all running in \
         parallel. Each task must be self-contained. Use wait_all_subagents \
         to collect the results."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Task instructions, one sub-agent each"
                },
                "agent_type": {
                    "type": "string",
                    "description": "Registered agent type to run"
                }
            },
            "required": ["tasks", "agent_type"]
        })
    }

    fn tags(&self) -> &[&str] {
        &["subagents"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let tasks: Vec<String> = call.args["tasks"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|t| t.as_str())
                    .map(|t| t.to_string())
                    .collect()
            })
            .unwrap_or_default();
        if tasks.is_empty() {
            return ToolOutput::err(&call.id, "tasks must be a non-empty array of strings");
        }
        let agent_type = call.args["agent_type"].as_str().unwrap_or_default();
        match self
            .scheduler
            .spawn_many_with_parent(tasks, agent_type, self.parent.clone())
        {
            Ok(runs) => {
                let lines: Vec<String> = runs
                    .iter()
                    .map(|r| format!("{} → \"{}\"", r.id, r.task))
                    .collect();
                ToolOutput::ok(
                    &call.id,
                    format!("Spawned {} subagents:\n{}", runs.len(), lines.join("\n")),
                )
            }
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct WaitSubagentTool {
    scheduler: Arc<SubagentScheduler>,
}

impl WaitSubagentTool {
    pub fn new(scheduler: Arc<SubagentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Tool for WaitSubagentTool {
    fn name(&self) -> &str {
        "wait_subagent"
    }

    fn description(&self) -> &str {
        "Wait for a spawned sub-agent to finish and return its result. A \
         timeout does not terminate the sub-agent; you can wait again."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Subagent id returned by spawn_subagent"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Seconds to wait (default 300)"
                }
            },
            "required": ["id"]
        })
    }

    fn tags(&self) -> &[&str] {
        &["subagents"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = call.args["id"].as_str().unwrap_or_default();
        let timeout = call.args["timeout_secs"]
            .as_u64()
            .unwrap_or(DEFAULT_WAIT_SECS);
        match self.scheduler.wait(id, Duration::from_secs(timeout)).await {
            Ok(run) => match (&run.result, &run.error) {
                (Some(result), _) => ToolOutput::ok(&call.id, result.clone()),
                (None, Some(error)) => {
                    ToolOutput::err(&call.id, format!("subagent failed: {error}"))
                }
                (None, None) => ToolOutput::ok(&call.id, format!("{:?}", run.status)),
            },
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct WaitAllSubagentsTool {
    scheduler: Arc<SubagentScheduler>,
    /// Run id to leave out of the wait set.  Set for delegating children,
    /// which must never wait on their own completion.
    exclude: Option<String>,
}

impl WaitAllSubagentsTool {
    pub fn new(scheduler: Arc<SubagentScheduler>) -> Self {
        Self { scheduler, exclude: None }
    }

    pub fn excluding(scheduler: Arc<SubagentScheduler>, run_id: String) -> Self {
        Self { scheduler, exclude: Some(run_id) }
    }
}

#[async_trait]
impl Tool for WaitAllSubagentsTool {
    fn name(&self) -> &str {
        "wait_all_subagents"
    }

    fn description(&self) -> &str {
        "Wait for every running sub-agent to finish and return all results, \
         each tagged with its subagent id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "timeout_secs": {
                    "type": "integer",
                    "description": "Seconds to wait (default 300)"
                }
            }
        })
    }

    fn tags(&self) -> &[&str] {
        &["subagents"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let timeout = call.args["timeout_secs"]
            .as_u64()
            .unwrap_or(DEFAULT_WAIT_SECS);
        match self
            .scheduler
            .wait_all_except(self.exclude.as_deref(), Duration::from_secs(timeout))
            .await
        {
            Ok(runs) if runs.is_empty() => {
                ToolOutput::ok(&call.id, "No subagents are running.")
            }
            Ok(runs) => {
                let lines: Vec<String> = runs.iter().map(format_run).collect();
                ToolOutput::ok(&call.id, lines.join("\n"))
            }
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct CancelSubagentTool {
    scheduler: Arc<SubagentScheduler>,
}

impl CancelSubagentTool {
    pub fn new(scheduler: Arc<SubagentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Tool for CancelSubagentTool {
    fn name(&self) -> &str {
        "cancel_subagent"
    }

    fn description(&self) -> &str {
        "Request cancellation of a running sub-agent. Cancellation is \
         cooperative: the sub-agent stops at its next step boundary."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Subagent id to cancel"
                }
            },
            "required": ["id"]
        })
    }

    fn tags(&self) -> &[&str] {
        &["subagents"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = call.args["id"].as_str().unwrap_or_default();
        if self.scheduler.cancel(id) {
            ToolOutput::ok(&call.id, format!("Cancellation requested for {id}"))
        } else {
            ToolOutput::err(&call.id, format!("no running subagent with id {id}"))
        }
    }
}

pub struct ListSubagentsTool {
    scheduler: Arc<SubagentScheduler>,
}

impl ListSubagentsTool {
    pub fn new(scheduler: Arc<SubagentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Tool for ListSubagentsTool {
    fn name(&self) -> &str {
        "list_subagents"
    }

    fn description(&self) -> &str {
        "List all sub-agents spawned this session with their status."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn tags(&self) -> &[&str] {
        &["subagents"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let runs = self.scheduler.get_all_results();
        if runs.is_empty() {
            return ToolOutput::ok(&call.id, "No subagents have been spawned.");
        }
        let listing: Vec<Value> = runs
            .iter()
            .map(|r| {
                json!({
                    "id": r.id,
                    "agent_type": r.agent_type,
                    "status": r.status,
                    "task": r.task,
                })
            })
            .collect();
        ToolOutput::ok(
            &call.id,
            serde_json::to_string_pretty(&listing).unwrap_or_default(),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
