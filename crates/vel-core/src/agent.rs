// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
//! The agent loop: model call → tool dispatch → append results → repeat.
//!
//! One loop drives one session run.  The loop suspends in exactly three
//! places: the provider streaming call, the approval gate, and (indirectly,
//! through the subagent tools) waits on child runs.  Tool-level failures are
//! converted to error tool-results so the model can react; only provider
//! exhaustion, budget violations, and cancellation terminate the run.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vel_config::ApprovalPolicyConfig;
use vel_model::{CompletionRequest, Message, ModelProvider, ResponseEvent};
use vel_tools::{
    ApprovalDecision, ApprovalManager, ToolCall, ToolEvent, ToolOutput, ToolRegistry,
};

use crate::error::{RunOutcome, RunStatus};
use crate::events::HarnessEvent;
use crate::middleware::{MiddlewareStack, TurnContext};
use crate::session::Session;

/// Hard per-run budgets.  A zero (or `None`) disables the corresponding cap.
#[derive(Debug, Clone)]
pub struct RunBudget {
    pub max_steps: u32,
    pub max_tool_calls: u32,
    pub max_total_tokens: u64,
    pub max_wall_clock: Option<Duration>,
}

impl Default for RunBudget {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_tool_calls: 0,
            max_total_tokens: 0,
            max_wall_clock: None,
        }
    }
}

/// Sliding window of recent `(tool, args)` fingerprints.
///
/// Trips when one fingerprint occurs strictly more than `max_repeats` times
/// within the window.
pub struct LoopDetector {
    window: VecDeque<u64>,
    window_size: usize,
    max_repeats: usize,
}

impl LoopDetector {
    pub fn new(window_size: usize, max_repeats: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            max_repeats: max_repeats.max(1),
        }
    }

    pub fn record(&mut self, call: &ToolCall) {
        let mut hasher = DefaultHasher::new();
        call.name.hash(&mut hasher);
        call.args.to_string().hash(&mut hasher);
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(hasher.finish());
    }

    pub fn tripped(&self) -> bool {
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for fp in &self.window {
            *counts.entry(*fp).or_insert(0) += 1;
        }
        counts.values().any(|&c| c > self.max_repeats)
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

/// Construction knobs for one [`AgentLoop`].
#[derive(Clone)]
pub struct AgentLoopOptions {
    pub system_prompt: String,
    pub approval_policy: ApprovalPolicyConfig,
    pub budget: RunBudget,
    pub loop_window: usize,
    pub loop_repeats: usize,
    pub provider_retries: u32,
}

impl Default for AgentLoopOptions {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            approval_policy: ApprovalPolicyConfig::PerTool,
            budget: RunBudget::default(),
            loop_window: 10,
            loop_repeats: 3,
            provider_retries: 3,
        }
    }
}

/// Drives one session through iterative model calls and tool dispatch.
pub struct AgentLoop {
    session: Session,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    middlewares: Arc<MiddlewareStack>,
    approvals: Arc<ApprovalManager>,
    options: AgentLoopOptions,
    cancel: Arc<AtomicBool>,
    /// Receiver for events emitted by stateful tools (todo updates); the
    /// paired sender lives inside those tools.
    tool_event_rx: Option<mpsc::Receiver<ToolEvent>>,
}

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Session,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        middlewares: Arc<MiddlewareStack>,
        approvals: Arc<ApprovalManager>,
        options: AgentLoopOptions,
        cancel: Arc<AtomicBool>,
        tool_event_rx: Option<mpsc::Receiver<ToolEvent>>,
    ) -> Self {
        Self {
            session,
            provider,
            tools,
            middlewares,
            approvals,
            options,
            cancel,
            tool_event_rx,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// Dismantle the loop, returning the session and the tool-event
    /// receiver so the owner can reuse both for the next run.
    pub fn into_parts(self) -> (Session, Option<mpsc::Receiver<ToolEvent>>) {
        (self.session, self.tool_event_rx)
    }

    /// Push the user message and run the loop to a terminal state, streaming
    /// events through `tx`.
    pub async fn run(&mut self, user_input: &str, tx: mpsc::Sender<HarnessEvent>) -> RunOutcome {
        let started = Instant::now();
        let mut steps = 0u32;
        let mut tool_calls_made = 0u32;
        let mut text_parts: Vec<String> = Vec::new();
        let mut detector =
            LoopDetector::new(self.options.loop_window, self.options.loop_repeats);
        let mut loop_reminder_sent = false;

        if self.session.is_empty() {
            self.session
                .push(Message::system(self.options.system_prompt.clone()));
        }
        self.session.push(Message::user(user_input));

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return RunOutcome::cancelled(text_parts.join("\n"), steps);
            }

            steps += 1;
            if steps > self.options.budget.max_steps {
                let reason = format!(
                    "max steps reached ({} model turns)",
                    self.options.budget.max_steps
                );
                return RunOutcome::failed(text_parts.join("\n"), reason, steps - 1);
            }
            if let Some(max_wall) = self.options.budget.max_wall_clock {
                if started.elapsed() > max_wall {
                    return RunOutcome::failed(
                        text_parts.join("\n"),
                        format!("wall-clock budget exhausted ({max_wall:?})"),
                        steps,
                    );
                }
            }

            // Loop detector: one reminder, then termination.
            if detector.tripped() {
                if loop_reminder_sent {
                    return RunOutcome::failed(
                        text_parts.join("\n"),
                        "loop detected: identical tool calls repeated after reminder",
                        steps,
                    );
                }
                loop_reminder_sent = true;
                detector.reset();
                self.session.push(Message::system(
                    "You are repeating identical tool calls. Do not repeat a call \
                     with the same arguments; use the results you already have or \
                     try a different approach.",
                ));
            }

            let ctx = TurnContext {
                session_id: self.session.id.clone(),
                turn: steps,
                events: tx.clone(),
            };

            // before-turn hooks (context compaction among them)
            let messages = std::mem::take(&mut self.session.messages);
            match self.middlewares.before_turn(&ctx, messages).await {
                Ok(msgs) => self.session.replace_messages(msgs),
                Err(e) => {
                    return RunOutcome::failed(
                        text_parts.join("\n"),
                        format!("before-turn hook failed: {e}"),
                        steps,
                    );
                }
            }

            let (text, tool_calls) = match self.stream_one_turn(&tx).await {
                Ok(t) => t,
                Err(e) => {
                    return RunOutcome::failed(
                        text_parts.join("\n"),
                        format!("provider error: {e:#}"),
                        steps,
                    );
                }
            };

            if self.options.budget.max_total_tokens > 0
                && self.session.total_tokens > self.options.budget.max_total_tokens
            {
                return RunOutcome::failed(
                    text_parts.join("\n"),
                    format!(
                        "token budget exhausted ({} > {})",
                        self.session.total_tokens, self.options.budget.max_total_tokens
                    ),
                    steps,
                );
            }

            if !text.is_empty() {
                self.session.push(Message::assistant(text.clone()));
                let _ = tx.send(HarnessEvent::TextComplete(text.clone())).await;
                text_parts.push(text);
            }

            if tool_calls.is_empty() {
                let _ = tx.send(HarnessEvent::TurnComplete).await;
                let messages = std::mem::take(&mut self.session.messages);
                match self.middlewares.after_assistant(&ctx, messages).await {
                    Ok(msgs) => self.session.replace_messages(msgs),
                    Err(e) => {
                        return RunOutcome::failed(
                            text_parts.join("\n"),
                            format!("after-assistant hook failed: {e}"),
                            steps,
                        );
                    }
                }
                return RunOutcome::completed(text_parts.join("\n"), steps);
            }

            // Dispatch sequentially, in the order the provider emitted the
            // calls.  Results append in the same order.
            for tc in &tool_calls {
                if self.options.budget.max_tool_calls > 0
                    && tool_calls_made >= self.options.budget.max_tool_calls
                {
                    return RunOutcome::failed(
                        text_parts.join("\n"),
                        format!(
                            "tool-call budget exhausted ({} calls)",
                            self.options.budget.max_tool_calls
                        ),
                        steps,
                    );
                }

                self.session
                    .push(Message::tool_call(&tc.id, &tc.name, tc.args.clone()));
                let _ = tx.send(HarnessEvent::ToolCallStarted(tc.clone())).await;
                detector.record(tc);
                tool_calls_made += 1;

                let output = match self.gate_and_dispatch(tc, &tx).await {
                    GateOutcome::Output(output) => output,
                    GateOutcome::Cancelled => {
                        // The dangling tool-call message is acceptable: the
                        // pairing invariant binds successful runs only.
                        return RunOutcome::cancelled(text_parts.join("\n"), steps);
                    }
                };

                // In-flight results arriving after cancellation are discarded.
                if self.cancel.load(Ordering::SeqCst) {
                    return RunOutcome::cancelled(text_parts.join("\n"), steps);
                }

                let output = self.middlewares.on_tool_result(&ctx, tc, output).await;
                self.session
                    .push(Message::tool_result(&tc.id, output.content.clone()));
                let _ = tx
                    .send(HarnessEvent::ToolCallFinished {
                        call_id: tc.id.clone(),
                        tool_name: tc.name.clone(),
                        output: output.content,
                        is_error: output.is_error,
                    })
                    .await;

                self.drain_tool_events(&tx).await;
            }

            let messages = std::mem::take(&mut self.session.messages);
            match self.middlewares.after_assistant(&ctx, messages).await {
                Ok(msgs) => self.session.replace_messages(msgs),
                Err(e) => {
                    return RunOutcome::failed(
                        text_parts.join("\n"),
                        format!("after-assistant hook failed: {e}"),
                        steps,
                    );
                }
            }
        }
    }

    /// Run the approval gate (when required) and dispatch the call.
    async fn gate_and_dispatch(
        &self,
        tc: &ToolCall,
        tx: &mpsc::Sender<HarnessEvent>,
    ) -> GateOutcome {
        if self.needs_confirmation(&tc.name) {
            // File the request before announcing it so a responder reacting
            // to the event always finds the pending record.
            let rx = self.approvals.request(tc);
            let _ = tx
                .send(HarnessEvent::ApprovalRequired {
                    call_id: tc.id.clone(),
                    tool_name: tc.name.clone(),
                    args: tc.args.clone(),
                })
                .await;
            match rx.await {
                Ok(ApprovalDecision::Approved) => {}
                Ok(ApprovalDecision::Denied) => {
                    debug!(tool = %tc.name, call_id = %tc.id, "tool call denied by user");
                    return GateOutcome::Output(ToolOutput::err(&tc.id, "Denied by user"));
                }
                // Explicit cancellation, or the responder went away.
                Ok(ApprovalDecision::Cancelled) | Err(_) => return GateOutcome::Cancelled,
            }
        }
        // Run the handler on its own task so a panic is contained as an
        // error tool-result instead of tearing down the loop.
        let tools = Arc::clone(&self.tools);
        let call = tc.clone();
        let output = match tokio::spawn(async move { tools.dispatch(&call).await }).await {
            Ok(output) => output,
            Err(e) => ToolOutput::err(&tc.id, format!("tool handler panicked: {e}")),
        };
        GateOutcome::Output(output)
    }

    fn needs_confirmation(&self, tool_name: &str) -> bool {
        match self.options.approval_policy {
            ApprovalPolicyConfig::Always => true,
            ApprovalPolicyConfig::Never => false,
            ApprovalPolicyConfig::PerTool => self
                .tools
                .get(tool_name)
                .map(|t| t.requires_confirmation())
                .unwrap_or(false),
        }
    }

    /// Call the model once, streaming text deltas and collecting tool calls.
    /// Transient request failures retry with exponential backoff.
    async fn stream_one_turn(
        &mut self,
        tx: &mpsc::Sender<HarnessEvent>,
    ) -> anyhow::Result<(String, Vec<ToolCall>)> {
        let schemas: Vec<vel_model::ToolSchema> = self
            .tools
            .schemas()
            .into_iter()
            .map(|s| vel_model::ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        let req = CompletionRequest {
            messages: self.session.messages.clone(),
            tools: schemas,
            stream: true,
        };

        let mut attempt = 0u32;
        let mut stream = loop {
            match self.provider.complete(req.clone()).await {
                Ok(s) => break s,
                Err(e) => {
                    attempt += 1;
                    if attempt > self.options.provider_retries {
                        return Err(e).context("model completion failed");
                    }
                    let backoff = Duration::from_millis(50 * (1 << attempt.min(6)));
                    warn!(attempt, ?backoff, error = %e, "provider call failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        let mut full_text = String::new();
        // Keyed by the parallel-tool-call index from the provider; chunks for
        // one call may arrive interleaved with chunks for another.
        let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();

        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                    full_text.push_str(&delta);
                    let _ = tx.send(HarnessEvent::TextDelta(delta)).await;
                }
                ResponseEvent::ToolCall { index, id, name, arguments } => {
                    let ptc = pending.entry(index).or_insert_with(PendingToolCall::default);
                    if !id.is_empty() {
                        ptc.id = id;
                    }
                    if !name.is_empty() {
                        ptc.name = name;
                    }
                    ptc.args_buf.push_str(&arguments);
                }
                ResponseEvent::Usage {
                    input_tokens,
                    output_tokens,
                    cache_read_tokens,
                    cache_creation_tokens,
                } => {
                    self.session.total_tokens += (input_tokens + output_tokens) as u64;
                    let _ = tx
                        .send(HarnessEvent::TokenUsage {
                            input: input_tokens,
                            output: output_tokens,
                            cache_read: cache_read_tokens,
                            cache_creation: cache_creation_tokens,
                        })
                        .await;
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(e) => {
                    warn!("model stream error: {e}");
                    let _ = tx.send(HarnessEvent::Error(e)).await;
                }
                _ => {}
            }
        }

        // Flush accumulated tool calls in emission (index) order.  Calls
        // without a name cannot be dispatched and are dropped; an empty id
        // gets a synthetic fallback so the turn can still complete.
        let mut ordered: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
        ordered.sort_by_key(|(idx, _)| *idx);
        let mut tool_calls = Vec::with_capacity(ordered.len());
        for (i, (_, ptc)) in ordered.into_iter().enumerate() {
            if ptc.name.is_empty() {
                warn!(call_id = %ptc.id, "dropping tool call with empty name from model");
                continue;
            }
            let mut tc = ptc.finish();
            if tc.id.is_empty() {
                tc.id = format!("tc_synthetic_{i}");
                warn!(tool = %tc.name, "tool call from model had empty id; generated one");
            }
            tool_calls.push(tc);
        }

        Ok((full_text, tool_calls))
    }

    /// Drain pending tool events and translate them to harness events.
    async fn drain_tool_events(&mut self, tx: &mpsc::Sender<HarnessEvent>) {
        let Some(rx) = self.tool_event_rx.as_mut() else {
            return;
        };
        while let Ok(te) = rx.try_recv() {
            match te {
                ToolEvent::TodoUpdate(todos) => {
                    let _ = tx.send(HarnessEvent::TodoUpdate(todos)).await;
                }
            }
        }
    }
}

enum GateOutcome {
    Output(ToolOutput),
    Cancelled,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    fn finish(self) -> ToolCall {
        // Always resolve to a JSON object: dispatch validates against an
        // object schema, and providers reject null tool inputs on replay.
        let args = if self.args_buf.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.args_buf) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        tool = %self.name,
                        error = %e,
                        "model sent invalid JSON arguments; substituting {{}}"
                    );
                    serde_json::Value::Object(Default::default())
                }
            }
        };
        ToolCall { id: self.id, name: self.name, args }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use vel_model::ScriptedMockProvider;

    use super::*;

    fn make_loop(
        provider: ScriptedMockProvider,
        tools: ToolRegistry,
        options: AgentLoopOptions,
    ) -> (AgentLoop, Arc<ApprovalManager>, Arc<AtomicBool>) {
        let approvals = Arc::new(ApprovalManager::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let agent = AgentLoop::new(
            Session::new(),
            Arc::new(provider),
            Arc::new(tools),
            Arc::new(MiddlewareStack::default()),
            approvals.clone(),
            options,
            cancel.clone(),
            None,
        );
        (agent, approvals, cancel)
    }

    async fn drain(mut rx: mpsc::Receiver<HarnessEvent>) -> Vec<HarnessEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    struct RecordingTool {
        name: &'static str,
        confirm: bool,
        invocations: Arc<std::sync::Mutex<Vec<serde_json::Value>>>,
    }

    #[async_trait::async_trait]
    impl vel_tools::Tool for RecordingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "records invocations"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn requires_confirmation(&self) -> bool {
            self.confirm
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            self.invocations.lock().unwrap().push(call.args.clone());
            ToolOutput::ok(&call.id, format!("ran {}", self.name))
        }
    }

    fn recording_registry(
        name: &'static str,
        confirm: bool,
    ) -> (ToolRegistry, Arc<std::sync::Mutex<Vec<serde_json::Value>>>) {
        let invocations = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(RecordingTool {
            name,
            confirm,
            invocations: invocations.clone(),
        }))
        .unwrap();
        (reg, invocations)
    }

    #[tokio::test]
    async fn trivial_round_trip_completes_in_one_step() {
        let provider = ScriptedMockProvider::always_text("The answer is 4");
        let (mut agent, _, _) = make_loop(provider, ToolRegistry::new(), Default::default());
        let (tx, rx) = mpsc::channel(64);
        let outcome = agent.run("What is 2+2?", tx).await;
        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(outcome.text.contains('4'));
        assert_eq!(outcome.steps, 1);
        let events = drain(rx).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, HarnessEvent::TurnComplete)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, HarnessEvent::ToolCallStarted(_))));
    }

    #[tokio::test]
    async fn tool_call_dispatches_then_second_turn_answers() {
        let provider = ScriptedMockProvider::tool_then_text(
            "c1",
            "probe",
            r#"{"q":"x"}"#,
            "final answer",
        );
        let (reg, invocations) = recording_registry("probe", false);
        let (mut agent, _, _) = make_loop(provider, reg, Default::default());
        let (tx, rx) = mpsc::channel(64);
        let outcome = agent.run("go", tx).await;
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.text, "final answer");
        assert_eq!(outcome.steps, 2);
        assert_eq!(invocations.lock().unwrap().len(), 1);

        // Message log pairing: every tool-call has a later matching result.
        let session = agent.session();
        let call_pos = session
            .messages
            .iter()
            .position(|m| m.tool_calls().any(|(id, _, _)| id == "c1"))
            .unwrap();
        let result_pos = session
            .messages
            .iter()
            .position(|m| m.tool_result_value("c1").is_some())
            .unwrap();
        assert!(call_pos < result_pos);

        let events = drain(rx).await;
        let started = events
            .iter()
            .position(|e| matches!(e, HarnessEvent::ToolCallStarted(_)))
            .unwrap();
        let finished = events
            .iter()
            .position(|e| matches!(e, HarnessEvent::ToolCallFinished { .. }))
            .unwrap();
        assert!(started < finished);
    }

    #[tokio::test]
    async fn parallel_calls_dispatch_in_emission_order() {
        let provider = ScriptedMockProvider::new(vec![
            vec![
                // Emitted out of index order; dispatch must sort by index.
                ResponseEvent::ToolCall {
                    index: 1,
                    id: "c2".into(),
                    name: "probe".into(),
                    arguments: r#"{"n":2}"#.into(),
                },
                ResponseEvent::ToolCall {
                    index: 0,
                    id: "c1".into(),
                    name: "probe".into(),
                    arguments: r#"{"n":1}"#.into(),
                },
                ResponseEvent::Done,
            ],
            ScriptedMockProvider::text_script("done"),
        ]);
        let (reg, invocations) = recording_registry("probe", false);
        let (mut agent, _, _) = make_loop(provider, reg, Default::default());
        let (tx, _rx) = mpsc::channel(64);
        let outcome = agent.run("go", tx).await;
        assert_eq!(outcome.status, RunStatus::Completed);
        let seen = invocations.lock().unwrap().clone();
        assert_eq!(seen, vec![json!({"n":1}), json!({"n":2})]);
    }

    #[tokio::test]
    async fn denied_tool_call_synthesizes_error_and_continues() {
        let provider = ScriptedMockProvider::tool_then_text(
            "c1",
            "execute",
            r#"{"command":"rm -rf /"}"#,
            "understood, not doing that",
        );
        let (reg, invocations) = recording_registry("execute", true);
        let (mut agent, approvals, _) = make_loop(provider, reg, Default::default());
        let (tx, rx) = mpsc::channel(64);

        let approvals_task = approvals.clone();
        let responder = tokio::spawn(async move {
            // Wait for the request to appear, then deny it.
            for _ in 0..100 {
                if approvals_task.has_pending() {
                    approvals_task.respond_by_tool_name("execute", false);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("approval request never arrived");
        });

        let outcome = agent.run("rm -rf /", tx).await;
        responder.await.unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(
            invocations.lock().unwrap().is_empty(),
            "denied handler must never run"
        );
        let denied = agent
            .session()
            .messages
            .iter()
            .find_map(|m| m.tool_result_value("c1"))
            .unwrap();
        assert_eq!(denied, "Denied by user");
        let events = drain(rx).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, HarnessEvent::ApprovalRequired { tool_name, .. } if tool_name == "execute")));
    }

    #[tokio::test]
    async fn cancelled_approval_terminates_run() {
        let provider = ScriptedMockProvider::tool_then_text("c1", "execute", "{}", "never");
        let (reg, _) = recording_registry("execute", true);
        let (mut agent, approvals, _) = make_loop(provider, reg, Default::default());
        let (tx, _rx) = mpsc::channel(64);

        let approvals_task = approvals.clone();
        tokio::spawn(async move {
            for _ in 0..100 {
                if approvals_task.has_pending() {
                    approvals_task.cancel_all();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let outcome = agent.run("go", tx).await;
        assert_eq!(outcome.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn unknown_tool_result_lets_model_recover() {
        let provider =
            ScriptedMockProvider::tool_then_text("c1", "no_such_tool", "{}", "recovered");
        let (mut agent, _, _) = make_loop(provider, ToolRegistry::new(), Default::default());
        let (tx, _rx) = mpsc::channel(64);
        let outcome = agent.run("go", tx).await;
        assert_eq!(outcome.status, RunStatus::Completed);
        let result = agent
            .session()
            .messages
            .iter()
            .find_map(|m| m.tool_result_value("c1"))
            .unwrap();
        assert!(result.contains("unknown tool"));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_error_result() {
        struct PanicTool;

        #[async_trait::async_trait]
        impl vel_tools::Tool for PanicTool {
            fn name(&self) -> &str {
                "explode"
            }
            fn description(&self) -> &str {
                "always panics"
            }
            fn input_schema(&self) -> serde_json::Value {
                json!({"type": "object"})
            }
            async fn execute(&self, _call: &ToolCall) -> ToolOutput {
                panic!("boom");
            }
        }

        let provider = ScriptedMockProvider::tool_then_text("c1", "explode", "{}", "survived");
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(PanicTool)).unwrap();
        let (mut agent, _, _) = make_loop(provider, reg, Default::default());
        let (tx, _rx) = mpsc::channel(64);
        let outcome = agent.run("go", tx).await;
        assert_eq!(outcome.status, RunStatus::Completed, "loop survives the panic");
        let result = agent
            .session()
            .messages
            .iter()
            .find_map(|m| m.tool_result_value("c1"))
            .unwrap();
        assert!(result.contains("panicked"));
    }

    #[tokio::test]
    async fn max_steps_budget_fails_run() {
        // The model asks for the same (valid) tool forever with fresh args.
        let scripts: Vec<Vec<ResponseEvent>> = (0..10)
            .map(|i| {
                ScriptedMockProvider::tool_call_script(
                    format!("c{i}"),
                    "probe",
                    format!(r#"{{"n":{i}}}"#),
                )
            })
            .collect();
        let provider = ScriptedMockProvider::new(scripts);
        let (reg, _) = recording_registry("probe", false);
        let options = AgentLoopOptions {
            budget: RunBudget { max_steps: 3, ..Default::default() },
            ..Default::default()
        };
        let (mut agent, _, _) = make_loop(provider, reg, options);
        let (tx, _rx) = mpsc::channel(64);
        let outcome = agent.run("go", tx).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.reason.unwrap().contains("max steps"));
    }

    #[tokio::test]
    async fn loop_detector_reminds_then_fails() {
        // Identical calls forever.
        let scripts: Vec<Vec<ResponseEvent>> = (0..20)
            .map(|i| {
                ScriptedMockProvider::tool_call_script(format!("c{i}"), "probe", r#"{"n":1}"#)
            })
            .collect();
        let provider = ScriptedMockProvider::new(scripts);
        let (reg, _) = recording_registry("probe", false);
        let options = AgentLoopOptions {
            loop_repeats: 2,
            ..Default::default()
        };
        let (mut agent, _, _) = make_loop(provider, reg, options);
        let (tx, _rx) = mpsc::channel(256);
        let outcome = agent.run("go", tx).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.reason.unwrap().contains("loop detected"));
        // The synthetic reminder landed in the log before termination.
        assert!(agent.session().messages.iter().any(|m| m
            .as_text()
            .map(|t| t.contains("repeating identical tool calls"))
            .unwrap_or(false)));
    }

    #[tokio::test]
    async fn cancellation_flag_stops_next_iteration() {
        let provider = ScriptedMockProvider::always_text("unreachable");
        let (mut agent, _, cancel) = make_loop(provider, ToolRegistry::new(), Default::default());
        cancel.store(true, Ordering::SeqCst);
        let (tx, _rx) = mpsc::channel(64);
        let outcome = agent.run("go", tx).await;
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(outcome.steps, 0);
    }

    // ── LoopDetector ──────────────────────────────────────────────────────────

    fn call_named(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "x".into(), name: "t".into(), args }
    }

    #[test]
    fn detector_trips_after_configured_repeats_not_before() {
        let mut d = LoopDetector::new(10, 2);
        d.record(&call_named(json!({"a":1})));
        assert!(!d.tripped());
        d.record(&call_named(json!({"a":1})));
        assert!(!d.tripped(), "exactly the repeat count must not trip");
        d.record(&call_named(json!({"a":1})));
        assert!(d.tripped(), "one more than the repeat count trips");
    }

    #[test]
    fn detector_distinguishes_args() {
        let mut d = LoopDetector::new(10, 1);
        d.record(&call_named(json!({"a":1})));
        d.record(&call_named(json!({"a":2})));
        assert!(!d.tripped());
    }

    #[test]
    fn detector_window_slides() {
        let mut d = LoopDetector::new(2, 1);
        d.record(&call_named(json!({"a":1})));
        d.record(&call_named(json!({"b":2})));
        // The first fingerprint has slid out; recording it again is 1-in-window.
        d.record(&call_named(json!({"a":1})));
        assert!(!d.tripped());
    }
}
