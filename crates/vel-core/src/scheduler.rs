// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
//! Concurrency-bounded pool of isolated child agent loops.
//!
//! Each spawn runs a fresh [`AgentLoop`] on its own task: the child sees
//! only its task string, a tool registry filtered to the agent type's
//! `allowed_tools`, and its own step budget.  Child lifecycle events are
//! broadcast tagged with the subagent id so the harness can merge them into
//! the parent's stream.
//!
//! One scheduler serves one session.  The subagent tools are bound to this
//! single instance, so a child that is itself allowed to spawn goes through
//! the same counters — grandchildren consume the root session's `max_total`
//! cap, and the concurrency gate applies across the whole tree.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

use vel_config::SubagentLimits;
use vel_model::{Message, ModelProvider};
use vel_tools::{ApprovalManager, ToolRegistry};

use crate::agent::{AgentLoop, AgentLoopOptions, RunBudget};
use crate::error::{RunStatus, ScheduleError};
use crate::events::HarnessEvent;
use crate::middleware::MiddlewareStack;
use crate::session::Session;

/// A named child-agent profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentConfig {
    pub name: String,
    pub description: String,
    /// Tool names the child may use; everything else is filtered out.
    pub allowed_tools: Vec<String>,
    /// Step budget for the child loop.
    pub max_steps: u32,
    /// Extra text appended to the child's system prompt.
    #[serde(default)]
    pub system_prompt_addition: Option<String>,
    /// Optional provider override, resolved against the harness's
    /// registered providers by name.
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One child run's record.  A `Completed` run carries a non-empty result
/// and no error; a `Failed` run the reverse.
#[derive(Debug, Clone)]
pub struct SubagentRun {
    pub id: String,
    pub parent_id: Option<String>,
    pub task: String,
    pub agent_type: String,
    pub status: SubagentStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    /// The child's full message log, captured at completion.
    pub messages: Vec<Message>,
}

struct SchedState {
    runs: HashMap<String, SubagentRun>,
    order: Vec<String>,
    running: usize,
    total_spawned: usize,
    cancel_flags: HashMap<String, Arc<AtomicBool>>,
    done: HashMap<String, watch::Receiver<bool>>,
}

pub struct SubagentScheduler {
    limits: SubagentLimits,
    default_provider: Arc<dyn ModelProvider>,
    provider_overrides: HashMap<String, Arc<dyn ModelProvider>>,
    /// Full parent tool registry; children get filtered views of it.
    base_tools: OnceLock<Arc<ToolRegistry>>,
    /// Middlewares applied inside child loops (context management only).
    child_middlewares: OnceLock<Arc<MiddlewareStack>>,
    agent_types: Mutex<HashMap<String, SubagentConfig>>,
    events: broadcast::Sender<HarnessEvent>,
    state: Arc<Mutex<SchedState>>,
    /// Weak self-reference so child tool sets can be rebound to this
    /// scheduler (a child's `wait_all_subagents` must exclude the child
    /// itself or it would deadlock waiting on its own completion).
    self_ref: OnceLock<Weak<SubagentScheduler>>,
}

impl SubagentScheduler {
    pub fn new(limits: SubagentLimits, default_provider: Arc<dyn ModelProvider>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            limits,
            default_provider,
            provider_overrides: HashMap::new(),
            base_tools: OnceLock::new(),
            child_middlewares: OnceLock::new(),
            agent_types: Mutex::new(HashMap::new()),
            events,
            state: Arc::new(Mutex::new(SchedState {
                runs: HashMap::new(),
                order: Vec::new(),
                running: 0,
                total_spawned: 0,
                cancel_flags: HashMap::new(),
                done: HashMap::new(),
            })),
            self_ref: OnceLock::new(),
        }
    }

    /// Record the owning `Arc` so spawned children can rebind their wait
    /// tools to this scheduler.  Called once by the harness at boot.
    pub fn set_self(self: &Arc<Self>) {
        let _ = self.self_ref.set(Arc::downgrade(self));
    }

    /// Register a provider children may select via `SubagentConfig::model`.
    pub fn add_provider(&mut self, name: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        self.provider_overrides.insert(name.into(), provider);
    }

    /// Install the parent tool registry children filter from.  Set once at
    /// harness boot (the registry itself is built from the middleware stack,
    /// which includes the subagent tools bound to this scheduler).
    pub fn set_base_tools(&self, tools: Arc<ToolRegistry>) {
        let _ = self.base_tools.set(tools);
    }

    /// Install the middleware stack applied inside child loops.
    pub fn set_child_middlewares(&self, middlewares: Arc<MiddlewareStack>) {
        let _ = self.child_middlewares.set(middlewares);
    }

    pub fn register_agent(&self, config: SubagentConfig) {
        self.agent_types
            .lock()
            .expect("agent types lock poisoned")
            .insert(config.name.clone(), config);
    }

    pub fn list_agent_types(&self) -> Vec<SubagentConfig> {
        let mut types: Vec<SubagentConfig> = self
            .agent_types
            .lock()
            .expect("agent types lock poisoned")
            .values()
            .cloned()
            .collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        types
    }

    /// Subscribe to this session's subagent event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<HarnessEvent> {
        self.events.subscribe()
    }

    // ── Spawning ──────────────────────────────────────────────────────────────

    /// Launch one child in the background; returns its record immediately.
    pub fn spawn(
        &self,
        task: impl Into<String>,
        agent_type: &str,
    ) -> Result<SubagentRun, ScheduleError> {
        self.spawn_with_parent(task, agent_type, None)
    }

    /// [`spawn`][Self::spawn] with an explicit parent run id, used when a
    /// delegating child spawns a grandchild.
    pub fn spawn_with_parent(
        &self,
        task: impl Into<String>,
        agent_type: &str,
        parent_id: Option<String>,
    ) -> Result<SubagentRun, ScheduleError> {
        let config = self.config_for(agent_type)?;
        self.reserve(1)?;
        Ok(self.spawn_reserved(task.into(), config, parent_id))
    }

    /// Spawn all tasks in parallel.  The whole call fails — spawning none —
    /// when it exceeds `max_parallel_tasks` or would overrun a pool cap.
    pub fn spawn_many(
        &self,
        tasks: Vec<String>,
        agent_type: &str,
    ) -> Result<Vec<SubagentRun>, ScheduleError> {
        self.spawn_many_with_parent(tasks, agent_type, None)
    }

    /// [`spawn_many`][Self::spawn_many] with an explicit parent run id.
    pub fn spawn_many_with_parent(
        &self,
        tasks: Vec<String>,
        agent_type: &str,
        parent_id: Option<String>,
    ) -> Result<Vec<SubagentRun>, ScheduleError> {
        if tasks.len() > self.limits.max_parallel_tasks {
            return Err(ScheduleError::AtLimit {
                message: format!(
                    "spawn_parallel accepts at most {} tasks per call (got {})",
                    self.limits.max_parallel_tasks,
                    tasks.len()
                ),
            });
        }
        let config = self.config_for(agent_type)?;
        self.reserve(tasks.len())?;
        Ok(tasks
            .into_iter()
            .map(|task| self.spawn_reserved(task, config.clone(), parent_id.clone()))
            .collect())
    }

    fn config_for(&self, agent_type: &str) -> Result<SubagentConfig, ScheduleError> {
        self.agent_types
            .lock()
            .expect("agent types lock poisoned")
            .get(agent_type)
            .cloned()
            .ok_or_else(|| ScheduleError::UnknownAgentType { name: agent_type.to_string() })
    }

    /// Atomically claim capacity for `n` children.
    fn reserve(&self, n: usize) -> Result<(), ScheduleError> {
        let mut state = self.state.lock().expect("scheduler state lock poisoned");
        if state.running + n > self.limits.max_concurrent {
            return Err(ScheduleError::AtLimit {
                message: format!(
                    "Subagent concurrency limit reached: {} running, max {} concurrent",
                    state.running, self.limits.max_concurrent
                ),
            });
        }
        if state.total_spawned + n > self.limits.max_total {
            return Err(ScheduleError::AtLimit {
                message: format!(
                    "Subagent limit reached: at most {} subagents per session \
                     ({} already spawned)",
                    self.limits.max_total, state.total_spawned
                ),
            });
        }
        state.running += n;
        state.total_spawned += n;
        Ok(())
    }

    fn spawn_reserved(
        &self,
        task: String,
        config: SubagentConfig,
        parent_id: Option<String>,
    ) -> SubagentRun {
        let id = uuid::Uuid::new_v4().to_string();
        let run = SubagentRun {
            id: id.clone(),
            parent_id,
            task: task.clone(),
            agent_type: config.name.clone(),
            status: SubagentStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
            messages: Vec::new(),
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut state = self.state.lock().expect("scheduler state lock poisoned");
            state.runs.insert(id.clone(), run.clone());
            state.order.push(id.clone());
            state.cancel_flags.insert(id.clone(), cancel.clone());
            state.done.insert(id.clone(), done_rx);
        }

        let provider = config
            .model
            .as_deref()
            .and_then(|m| self.provider_overrides.get(m).cloned())
            .unwrap_or_else(|| self.default_provider.clone());
        let base_tools = self
            .base_tools
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::new(ToolRegistry::new()));
        let filtered = base_tools.filtered(&config.allowed_tools);
        // Rebind the subagent tools to the child's identity: spawns record
        // the child as parent, and the collective wait excludes the child
        // itself (waiting on one's own completion would deadlock).
        let child_tools = match self.self_ref.get().and_then(Weak::upgrade) {
            Some(sched) => {
                let mut rebuilt = ToolRegistry::new();
                for tool in filtered.list() {
                    use crate::task_tools::{
                        SpawnParallelTool, SpawnSubagentTool, WaitAllSubagentsTool,
                    };
                    let replacement: Arc<dyn vel_tools::Tool> = match tool.name() {
                        "spawn_subagent" => Arc::new(
                            SpawnSubagentTool::new(sched.clone()).with_parent(id.clone()),
                        ),
                        "spawn_parallel" => Arc::new(
                            SpawnParallelTool::new(sched.clone()).with_parent(id.clone()),
                        ),
                        "wait_all_subagents" => {
                            Arc::new(WaitAllSubagentsTool::excluding(sched.clone(), id.clone()))
                        }
                        _ => tool.clone(),
                    };
                    let _ = rebuilt.register(replacement);
                }
                Arc::new(rebuilt)
            }
            None => Arc::new(filtered),
        };
        let middlewares = self
            .child_middlewares
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::new(MiddlewareStack::default()));

        let mut prompt = crate::prompts::subagent_prompt(&config.description);
        if let Some(addition) = &config.system_prompt_addition {
            prompt.push_str("\n\n");
            prompt.push_str(addition);
        }

        let options = AgentLoopOptions {
            system_prompt: prompt,
            // Children never block on the approval gate; their capability
            // boundary is the filtered tool set.
            approval_policy: vel_config::ApprovalPolicyConfig::Never,
            budget: RunBudget { max_steps: config.max_steps, ..Default::default() },
            ..Default::default()
        };

        let events = self.events.clone();
        let shared_state = Arc::clone(&self.state);
        let child_id = id.clone();
        let agent_type = config.name.clone();

        debug!(subagent = %child_id, agent = %agent_type, "spawning subagent");
        let _ = events.send(HarnessEvent::SubagentStarted {
            subagent_id: child_id.clone(),
            agent_type: agent_type.clone(),
            task: task.clone(),
        });

        tokio::spawn(async move {
            let (child_tx, child_rx) = mpsc::channel::<HarnessEvent>(256);
            let forwarder =
                tokio::spawn(forward_child_events(child_rx, events.clone(), child_id.clone()));

            let mut agent = AgentLoop::new(
                Session::new(),
                provider,
                child_tools,
                middlewares,
                Arc::new(ApprovalManager::new()),
                options,
                cancel,
                None,
            );
            let outcome = agent.run(&task, child_tx).await;
            let _ = forwarder.await;
            let messages = agent.into_session().messages;

            let (status, result, error) = match outcome.status {
                RunStatus::Completed => {
                    let text = if outcome.text.trim().is_empty() {
                        "(subagent produced no text output)".to_string()
                    } else {
                        outcome.text
                    };
                    (SubagentStatus::Completed, Some(text), None)
                }
                RunStatus::Failed => (
                    SubagentStatus::Failed,
                    None,
                    Some(outcome.reason.unwrap_or_else(|| "subagent failed".into())),
                ),
                RunStatus::Cancelled => {
                    (SubagentStatus::Cancelled, None, Some("cancelled".into()))
                }
            };

            {
                let mut state = shared_state.lock().expect("scheduler state lock poisoned");
                state.running = state.running.saturating_sub(1);
                if let Some(run) = state.runs.get_mut(&child_id) {
                    run.status = status;
                    run.completed_at = Some(Utc::now());
                    run.result = result.clone();
                    run.error = error.clone();
                    run.messages = messages;
                }
            }

            match status {
                SubagentStatus::Completed => {
                    let _ = events.send(HarnessEvent::SubagentCompleted {
                        subagent_id: child_id.clone(),
                        result: result.unwrap_or_default(),
                    });
                }
                _ => {
                    let _ = events.send(HarnessEvent::SubagentFailed {
                        subagent_id: child_id.clone(),
                        error: error.unwrap_or_default(),
                    });
                }
            }
            let _ = done_tx.send(true);
        });

        run
    }

    // ── Waiting / observation ─────────────────────────────────────────────────

    /// Block until the run completes or `timeout` elapses.  A timeout does
    /// NOT terminate the child; pair with [`cancel`][Self::cancel] for that.
    pub async fn wait(&self, id: &str, timeout: Duration) -> Result<SubagentRun, ScheduleError> {
        let mut done = {
            let state = self.state.lock().expect("scheduler state lock poisoned");
            state
                .done
                .get(id)
                .cloned()
                .ok_or_else(|| ScheduleError::NotFound { id: id.to_string() })?
        };
        let outcome = tokio::time::timeout(timeout, done.wait_for(|finished| *finished)).await;
        match outcome {
            Ok(Ok(_)) => self
                .get_result(id)
                .ok_or_else(|| ScheduleError::NotFound { id: id.to_string() }),
            Ok(Err(_)) => {
                // The sender dropped without signalling; the child task was
                // torn down abnormally.
                warn!(subagent = id, "child task dropped without completing");
                self.get_result(id)
                    .ok_or_else(|| ScheduleError::NotFound { id: id.to_string() })
            }
            Err(_) => Err(ScheduleError::Timeout),
        }
    }

    /// Block until every running child finishes, or `timeout`.  Returns the
    /// records of all runs (including already-finished ones) in spawn order.
    pub async fn wait_all(&self, timeout: Duration) -> Result<Vec<SubagentRun>, ScheduleError> {
        self.wait_all_except(None, timeout).await
    }

    /// [`wait_all`][Self::wait_all] minus one id — used by delegating
    /// children, which must not wait on their own completion.
    pub async fn wait_all_except(
        &self,
        exclude: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<SubagentRun>, ScheduleError> {
        let ids: Vec<String> = {
            let state = self.state.lock().expect("scheduler state lock poisoned");
            state
                .order
                .iter()
                .filter(|id| Some(id.as_str()) != exclude)
                .cloned()
                .collect()
        };
        let deadline = tokio::time::Instant::now() + timeout;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            out.push(self.wait(&id, remaining).await?);
        }
        Ok(out)
    }

    /// Request cooperative cancellation.  The child observes the flag at its
    /// next suspension point.  Returns `false` for unknown or finished runs.
    pub fn cancel(&self, id: &str) -> bool {
        let state = self.state.lock().expect("scheduler state lock poisoned");
        match (state.runs.get(id), state.cancel_flags.get(id)) {
            (Some(run), Some(flag)) if run.status == SubagentStatus::Running => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    pub fn get_result(&self, id: &str) -> Option<SubagentRun> {
        self.state
            .lock()
            .expect("scheduler state lock poisoned")
            .runs
            .get(id)
            .cloned()
    }

    pub fn list_active(&self) -> Vec<SubagentRun> {
        let state = self.state.lock().expect("scheduler state lock poisoned");
        state
            .order
            .iter()
            .filter_map(|id| state.runs.get(id))
            .filter(|r| r.status == SubagentStatus::Running)
            .cloned()
            .collect()
    }

    pub fn get_all_results(&self) -> Vec<SubagentRun> {
        let state = self.state.lock().expect("scheduler state lock poisoned");
        state
            .order
            .iter()
            .filter_map(|id| state.runs.get(id))
            .cloned()
            .collect()
    }

    pub fn total_spawned(&self) -> usize {
        self.state
            .lock()
            .expect("scheduler state lock poisoned")
            .total_spawned
    }

    pub fn running_count(&self) -> usize {
        self.state
            .lock()
            .expect("scheduler state lock poisoned")
            .running
    }
}

/// Map child loop events into tagged subagent-activity events.
async fn forward_child_events(
    mut rx: mpsc::Receiver<HarnessEvent>,
    events: broadcast::Sender<HarnessEvent>,
    subagent_id: String,
) {
    while let Some(event) = rx.recv().await {
        let mapped = match event {
            HarnessEvent::TextDelta(text) => Some(HarnessEvent::SubagentActivity {
                subagent_id: subagent_id.clone(),
                tool_name: None,
                text: Some(text),
                tokens: None,
            }),
            HarnessEvent::ToolCallStarted(tc) => Some(HarnessEvent::SubagentActivity {
                subagent_id: subagent_id.clone(),
                tool_name: Some(tc.name),
                text: None,
                tokens: None,
            }),
            HarnessEvent::TokenUsage { input, output, .. } => {
                Some(HarnessEvent::SubagentActivity {
                    subagent_id: subagent_id.clone(),
                    tool_name: None,
                    text: None,
                    tokens: Some(input + output),
                })
            }
            _ => None,
        };
        if let Some(ev) = mapped {
            let _ = events.send(ev);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::stream;

    use vel_model::{
        CompletionRequest, MockProvider, ModelProvider, ResponseEvent, ResponseStream, Role,
    };

    use super::*;

    fn limits(concurrent: usize, total: usize, parallel: usize) -> SubagentLimits {
        SubagentLimits {
            max_concurrent: concurrent,
            max_total: total,
            max_parallel_tasks: parallel,
            default_max_steps: 10,
        }
    }

    fn researcher() -> SubagentConfig {
        SubagentConfig {
            name: "researcher".into(),
            description: "Researches a topic and reports back.".into(),
            allowed_tools: vec![],
            max_steps: 5,
            system_prompt_addition: None,
            model: None,
        }
    }

    fn scheduler(l: SubagentLimits) -> SubagentScheduler {
        let sched = SubagentScheduler::new(l, Arc::new(MockProvider));
        sched.set_base_tools(Arc::new(ToolRegistry::new()));
        sched.register_agent(researcher());
        sched
    }

    /// Provider that sleeps before answering, for concurrency-gate tests.
    struct SlowProvider {
        delay: Duration,
    }

    #[async_trait]
    impl ModelProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow-mock"
        }
        fn model_name(&self) -> &str {
            "slow-mock-model"
        }
        async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
            tokio::time::sleep(self.delay).await;
            let reply = req
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .and_then(|m| m.as_text())
                .unwrap_or("[no input]")
                .to_string();
            let events: Vec<anyhow::Result<ResponseEvent>> = vec![
                Ok(ResponseEvent::TextDelta(format!("SLOW: {reply}"))),
                Ok(ResponseEvent::Done),
            ];
            Ok(Box::pin(stream::iter(events)))
        }
    }

    fn slow_scheduler(l: SubagentLimits, delay_ms: u64) -> SubagentScheduler {
        let sched = SubagentScheduler::new(
            l,
            Arc::new(SlowProvider { delay: Duration::from_millis(delay_ms) }),
        );
        sched.set_base_tools(Arc::new(ToolRegistry::new()));
        sched.register_agent(researcher());
        sched
    }

    #[tokio::test]
    async fn spawn_runs_child_to_completion() {
        let sched = scheduler(limits(5, 20, 5));
        let run = sched.spawn("investigate topic X", "researcher").unwrap();
        assert_eq!(run.status, SubagentStatus::Running);

        let done = sched.wait(&run.id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(done.status, SubagentStatus::Completed);
        // The child saw ONLY the task string as its user message.
        assert_eq!(done.result.as_deref(), Some("MOCK: investigate topic X"));
        assert!(done.error.is_none());
        assert!(done.completed_at.is_some());
        assert!(!done.messages.is_empty(), "child log captured");
    }

    #[tokio::test]
    async fn unknown_agent_type_fails_spawn() {
        let sched = scheduler(limits(5, 20, 5));
        let err = sched.spawn("task", "ghost").unwrap_err();
        assert!(matches!(err, ScheduleError::UnknownAgentType { .. }));
        assert_eq!(sched.total_spawned(), 0);
    }

    #[tokio::test]
    async fn concurrency_cap_rejects_spawn() {
        let sched = slow_scheduler(limits(1, 20, 5), 300);
        let first = sched.spawn("task one", "researcher").unwrap();
        let err = sched.spawn("task two", "researcher").unwrap_err();
        assert!(matches!(err, ScheduleError::AtLimit { .. }));
        assert!(err.to_string().contains("concurrency"));

        // Once the first finishes, capacity frees up.
        sched.wait(&first.id, Duration::from_secs(5)).await.unwrap();
        assert!(sched.spawn("task three", "researcher").is_ok());
    }

    #[tokio::test]
    async fn total_cap_is_for_the_whole_session() {
        let sched = scheduler(limits(5, 2, 5));
        let a = sched.spawn("a", "researcher").unwrap();
        let b = sched.spawn("b", "researcher").unwrap();
        sched.wait(&a.id, Duration::from_secs(5)).await.unwrap();
        sched.wait(&b.id, Duration::from_secs(5)).await.unwrap();

        // Both children finished, but the per-session total still binds.
        let err = sched.spawn("c", "researcher").unwrap_err();
        assert!(err.to_string().contains("Subagent limit reached"));
        assert_eq!(sched.total_spawned(), 2);
    }

    #[tokio::test]
    async fn spawn_many_at_cap_succeeds_over_cap_spawns_none() {
        let sched = scheduler(limits(5, 20, 3));
        let runs = sched
            .spawn_many(
                vec!["x".into(), "y".into(), "z".into()],
                "researcher",
            )
            .unwrap();
        assert_eq!(runs.len(), 3);

        let err = sched
            .spawn_many(
                vec!["1".into(), "2".into(), "3".into(), "4".into()],
                "researcher",
            )
            .unwrap_err();
        assert!(matches!(err, ScheduleError::AtLimit { .. }));
        // Nothing was spawned by the failing call.
        assert_eq!(sched.total_spawned(), 3);
    }

    #[tokio::test]
    async fn results_arrive_tagged_per_child() {
        let sched = scheduler(limits(5, 20, 5));
        let mut rx = sched.subscribe();
        let runs = sched
            .spawn_many(vec!["alpha".into(), "beta".into()], "researcher")
            .unwrap();
        let all = sched.wait_all(Duration::from_secs(5)).await.unwrap();
        assert_eq!(all.len(), 2);

        let mut started = 0;
        let mut completed = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                HarnessEvent::SubagentStarted { subagent_id, .. } => {
                    assert!(runs.iter().any(|r| r.id == subagent_id));
                    started += 1;
                }
                HarnessEvent::SubagentCompleted { subagent_id, result } => {
                    let run = runs.iter().find(|r| r.id == subagent_id).unwrap();
                    assert!(result.contains(&run.task), "result tagged to its own task");
                    completed += 1;
                }
                _ => {}
            }
        }
        assert_eq!(started, 2);
        assert_eq!(completed, 2);
    }

    #[tokio::test]
    async fn wait_timeout_leaves_child_running() {
        let sched = slow_scheduler(limits(5, 20, 5), 300);
        let run = sched.spawn("slow task", "researcher").unwrap();
        let err = sched.wait(&run.id, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, ScheduleError::Timeout));
        // The child was NOT terminated by the timeout.
        let done = sched.wait(&run.id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(done.status, SubagentStatus::Completed);
    }

    #[tokio::test]
    async fn wait_unknown_id_is_not_found() {
        let sched = scheduler(limits(5, 20, 5));
        let err = sched.wait("ghost", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ScheduleError::NotFound { .. }));
    }

    #[tokio::test]
    async fn cancel_unknown_or_finished_returns_false() {
        let sched = scheduler(limits(5, 20, 5));
        assert!(!sched.cancel("ghost"));
        let run = sched.spawn("quick", "researcher").unwrap();
        sched.wait(&run.id, Duration::from_secs(5)).await.unwrap();
        assert!(!sched.cancel(&run.id), "finished children cannot be cancelled");
    }

    #[tokio::test]
    async fn observers_report_running_and_all() {
        let sched = slow_scheduler(limits(5, 20, 5), 200);
        let run = sched.spawn("observed", "researcher").unwrap();
        assert_eq!(sched.list_active().len(), 1);
        assert_eq!(sched.running_count(), 1);
        sched.wait(&run.id, Duration::from_secs(5)).await.unwrap();
        assert!(sched.list_active().is_empty());
        assert_eq!(sched.get_all_results().len(), 1);
    }

    #[tokio::test]
    async fn child_failure_is_captured_not_propagated() {
        /// Provider whose calls always fail.
        struct FailingProvider;

        #[async_trait]
        impl ModelProvider for FailingProvider {
            fn name(&self) -> &str {
                "failing"
            }
            fn model_name(&self) -> &str {
                "failing-model"
            }
            async fn complete(&self, _req: CompletionRequest) -> anyhow::Result<ResponseStream> {
                anyhow::bail!("connection refused")
            }
        }

        let sched = SubagentScheduler::new(limits(5, 20, 5), Arc::new(FailingProvider));
        sched.set_base_tools(Arc::new(ToolRegistry::new()));
        sched.register_agent(researcher());
        let run = sched.spawn("doomed", "researcher").unwrap();
        let done = sched.wait(&run.id, Duration::from_secs(30)).await.unwrap();
        assert_eq!(done.status, SubagentStatus::Failed);
        assert!(done.error.unwrap().contains("provider error"));
        assert!(done.result.is_none());
    }
}
