// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
//! The harness facade: session lifecycle, run/run-stream, state snapshots.
//!
//! A harness owns per-instance registries (tools, agent types, middleware
//! stack) so multiple harnesses coexist in one process with independent
//! tool sets.  Sessions are independent of one another; each run streams a
//! merged, bounded event channel of parent and subagent events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use vel_config::Config;
use vel_model::ModelProvider;
use vel_runtime::SkillsRegistry;
use vel_store::FsBackend;
use vel_tools::{ApprovalManager, Tool, ToolEvent, ToolRegistry};

use crate::agent::{AgentLoop, AgentLoopOptions, RunBudget};
use crate::context::ContextManager;
use crate::error::{HarnessError, RunOutcome};
use crate::events::HarnessEvent;
use crate::middleware::{Middleware, MiddlewareStack};
use crate::middlewares::{
    ContextMiddleware, FilesystemMiddleware, MemoryMiddleware, PlanningMiddleware,
    SkillsMiddleware, SubagentsMiddleware,
};
use crate::prompts;
use crate::scheduler::{SubagentConfig, SubagentScheduler};
use crate::session::Session;

/// Serializable harness snapshot: sessions plus per-middleware state
/// (todos, active skills, eviction log).
#[derive(Debug, Serialize, Deserialize)]
pub struct HarnessState {
    pub sessions: HashMap<String, Session>,
    pub middleware: serde_json::Map<String, Value>,
}

pub struct HarnessBuilder {
    provider: Arc<dyn ModelProvider>,
    backend: Arc<dyn FsBackend>,
    config: Config,
    skills: Option<Arc<SkillsRegistry>>,
    extra_middlewares: Vec<Arc<dyn Middleware>>,
    extra_tools: Vec<Arc<dyn Tool>>,
    provider_overrides: Vec<(String, Arc<dyn ModelProvider>)>,
    agent_configs: Vec<SubagentConfig>,
    summarizer: Option<Arc<dyn ModelProvider>>,
    confirm_writes: bool,
}

impl HarnessBuilder {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        backend: Arc<dyn FsBackend>,
        config: Config,
    ) -> Self {
        Self {
            provider,
            backend,
            config,
            skills: None,
            extra_middlewares: Vec::new(),
            extra_tools: Vec::new(),
            provider_overrides: Vec::new(),
            agent_configs: Vec::new(),
            summarizer: None,
            confirm_writes: false,
        }
    }

    /// Attach a skills registry; enables the skills middleware.
    pub fn skills(mut self, skills: Arc<SkillsRegistry>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Append a custom middleware after the standard set.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.extra_middlewares.push(middleware);
        self
    }

    /// Register a standalone tool outside any middleware.
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    /// Register an alternate provider selectable by subagent configs.
    pub fn provider_override(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn ModelProvider>,
    ) -> Self {
        self.provider_overrides.push((name.into(), provider));
        self
    }

    /// Register a subagent type at boot.
    pub fn agent(mut self, config: SubagentConfig) -> Self {
        self.agent_configs.push(config);
        self
    }

    /// Use a dedicated (typically cheaper) model for tier-3 summaries.
    pub fn summarizer(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.summarizer = Some(provider);
        self
    }

    /// Gate file-writing tools behind the approval manager.
    pub fn confirm_writes(mut self) -> Self {
        self.confirm_writes = true;
        self
    }

    pub async fn build(self) -> Result<Harness, HarnessError> {
        let context_manager = Arc::new(
            ContextManager::new(
                self.config.context.clone(),
                self.provider.model_name(),
                self.backend.clone(),
            )
            .with_summarizer(self.summarizer.unwrap_or_else(|| self.provider.clone())),
        );

        let mut scheduler =
            SubagentScheduler::new(self.config.subagents.clone(), self.provider.clone());
        for (name, provider) in self.provider_overrides {
            scheduler.add_provider(name, provider);
        }
        let scheduler = Arc::new(scheduler);
        scheduler.set_self();
        for config in self.agent_configs {
            scheduler.register_agent(config);
        }

        let (planning, tool_event_rx) = PlanningMiddleware::new();
        let mut filesystem = FilesystemMiddleware::new(self.backend.clone());
        if self.confirm_writes {
            filesystem = filesystem.with_write_confirmation();
        }

        let mut middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(planning),
            Arc::new(filesystem),
        ];
        if let Some(skills) = self.skills {
            middlewares.push(Arc::new(SkillsMiddleware::new(skills)));
        }
        middlewares.push(Arc::new(SubagentsMiddleware::new(scheduler.clone())));
        middlewares.push(Arc::new(ContextMiddleware::new(context_manager.clone())));
        middlewares.push(Arc::new(MemoryMiddleware::load(self.backend.clone()).await));
        middlewares.extend(self.extra_middlewares);

        let stack = Arc::new(MiddlewareStack::new(middlewares));
        let tools = Arc::new(stack.build_registry(&self.extra_tools)?);
        scheduler.set_base_tools(tools.clone());
        scheduler.set_child_middlewares(Arc::new(MiddlewareStack::new(vec![Arc::new(
            ContextMiddleware::new(context_manager.clone()),
        )])));

        let system_prompt = prompts::system_prompt(&stack.prompt_segments());
        debug!(
            tools = tools.names().len(),
            prompt_bytes = system_prompt.len(),
            "harness assembled"
        );

        Ok(Harness {
            provider: self.provider,
            backend: self.backend,
            config: self.config,
            tools,
            middlewares: stack,
            approvals: Arc::new(ApprovalManager::new()),
            scheduler,
            context_manager,
            system_prompt,
            sessions: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
            tool_event_rx: Mutex::new(Some(tool_event_rx)),
        })
    }
}

pub struct Harness {
    provider: Arc<dyn ModelProvider>,
    backend: Arc<dyn FsBackend>,
    config: Config,
    tools: Arc<ToolRegistry>,
    middlewares: Arc<MiddlewareStack>,
    approvals: Arc<ApprovalManager>,
    scheduler: Arc<SubagentScheduler>,
    context_manager: Arc<ContextManager>,
    system_prompt: String,
    sessions: Mutex<HashMap<String, Session>>,
    /// Cancel flags of in-flight runs, keyed by session id.
    active: Mutex<HashMap<String, Arc<AtomicBool>>>,
    /// Last finished outcome per session.
    outcomes: Mutex<HashMap<String, RunOutcome>>,
    /// Receiver for stateful-tool events; lent to the active run.
    tool_event_rx: Mutex<Option<mpsc::Receiver<ToolEvent>>>,
}

impl Harness {
    pub fn builder(
        provider: Arc<dyn ModelProvider>,
        backend: Arc<dyn FsBackend>,
        config: Config,
    ) -> HarnessBuilder {
        HarnessBuilder::new(provider, backend, config)
    }

    // ── Observation ───────────────────────────────────────────────────────────

    pub fn approvals(&self) -> &Arc<ApprovalManager> {
        &self.approvals
    }

    pub fn scheduler(&self) -> &Arc<SubagentScheduler> {
        &self.scheduler
    }

    pub fn context_manager(&self) -> &Arc<ContextManager> {
        &self.context_manager
    }

    pub fn backend(&self) -> &Arc<dyn FsBackend> {
        &self.backend
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Message log of a (non-running) session.
    pub fn session_messages(&self, session_id: &str) -> Option<Vec<vel_model::Message>> {
        self.sessions
            .lock()
            .expect("sessions lock poisoned")
            .get(session_id)
            .map(|s| s.messages.clone())
    }

    /// The last finished outcome for a session.
    pub fn last_outcome(&self, session_id: &str) -> Option<RunOutcome> {
        self.outcomes
            .lock()
            .expect("outcomes lock poisoned")
            .get(session_id)
            .cloned()
    }

    // ── Agent registry ────────────────────────────────────────────────────────

    pub fn register_agent(&self, config: SubagentConfig) {
        self.scheduler.register_agent(config);
    }

    pub fn list_agent_types(&self) -> Vec<SubagentConfig> {
        self.scheduler.list_agent_types()
    }

    /// Subscribe to subagent lifecycle events independently of a run stream.
    /// Dropping the receiver unsubscribes.
    pub fn on_subagent_event(&self) -> broadcast::Receiver<HarnessEvent> {
        self.scheduler.subscribe()
    }

    // ── Running ───────────────────────────────────────────────────────────────

    /// Start a run and return the merged event stream.  The caller reads
    /// events until the channel closes; the bounded channel backpressures
    /// producers rather than dropping events.
    pub fn run_stream(
        self: &Arc<Self>,
        message: impl Into<String>,
        session_id: Option<String>,
    ) -> Result<(String, mpsc::Receiver<HarnessEvent>), HarnessError> {
        let message = message.into();
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let cancel = Arc::new(AtomicBool::new(false));
        let session = {
            let mut active = self.active.lock().expect("active runs lock poisoned");
            if active.contains_key(&session_id) {
                return Err(HarnessError::SessionBusy { session_id });
            }
            active.insert(session_id.clone(), cancel.clone());

            let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
            sessions
                .remove(&session_id)
                .unwrap_or_else(|| Session::with_id(session_id.clone()))
        };

        let (tx, rx) = mpsc::channel::<HarnessEvent>(256);

        // Merge subagent broadcast events into this run's stream until the
        // driver signals completion.
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let mut sub_rx = self.scheduler.subscribe();
        let merge_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    event = sub_rx.recv() => match event {
                        Ok(ev) => {
                            if merge_tx.send(ev).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "subagent event merge lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        let harness = Arc::clone(self);
        let sid = session_id.clone();
        tokio::spawn(async move {
            let _ = tx
                .send(HarnessEvent::SessionStart { session_id: sid.clone() })
                .await;

            let tool_event_rx = harness
                .tool_event_rx
                .lock()
                .expect("tool event rx lock poisoned")
                .take();

            let options = AgentLoopOptions {
                system_prompt: harness.system_prompt.clone(),
                approval_policy: harness.config.harness.tool_approval_policy,
                budget: RunBudget {
                    max_steps: harness.config.harness.max_steps,
                    max_tool_calls: harness.config.harness.max_tool_calls,
                    max_total_tokens: harness.config.harness.max_total_tokens,
                    max_wall_clock: match harness.config.harness.max_wall_clock_secs {
                        0 => None,
                        secs => Some(Duration::from_secs(secs)),
                    },
                },
                loop_window: harness.config.harness.loop_detection_window,
                loop_repeats: harness.config.harness.loop_detection_repeats,
                provider_retries: harness.config.harness.provider_retries,
            };

            let mut agent = AgentLoop::new(
                session,
                harness.provider.clone(),
                harness.tools.clone(),
                harness.middlewares.clone(),
                harness.approvals.clone(),
                options,
                cancel,
                tool_event_rx,
            );
            let outcome = agent.run(&message, tx.clone()).await;

            // Return the session and the tool-event receiver for later runs.
            let (session, tool_event_rx) = agent.into_parts();
            harness
                .sessions
                .lock()
                .expect("sessions lock poisoned")
                .insert(sid.clone(), session);
            if tool_event_rx.is_some() {
                *harness
                    .tool_event_rx
                    .lock()
                    .expect("tool event rx lock poisoned") = tool_event_rx;
            }
            harness
                .active
                .lock()
                .expect("active runs lock poisoned")
                .remove(&sid);

            let reason = outcome
                .reason
                .clone()
                .unwrap_or_else(|| "completed".to_string());
            let _ = tx
                .send(HarnessEvent::SessionEnd {
                    session_id: sid.clone(),
                    status: outcome.status,
                    reason,
                })
                .await;
            harness
                .outcomes
                .lock()
                .expect("outcomes lock poisoned")
                .insert(sid, outcome);
            let _ = stop_tx.send(());
        });

        Ok((session_id, rx))
    }

    /// Run to completion and return the final outcome.
    pub async fn run(
        self: &Arc<Self>,
        message: impl Into<String>,
        session_id: Option<String>,
    ) -> Result<RunOutcome, HarnessError> {
        let (sid, mut rx) = self.run_stream(message, session_id)?;
        // Drain the stream; the outcome is recorded by the driver task.
        while rx.recv().await.is_some() {}
        self.last_outcome(&sid)
            .ok_or_else(|| HarnessError::State(format!("no outcome recorded for {sid}")))
    }

    /// Cancel a session's in-flight run.  Propagates to the approval gate
    /// and to every running subagent.
    pub fn cancel(&self, session_id: &str) -> bool {
        let flagged = {
            let active = self.active.lock().expect("active runs lock poisoned");
            match active.get(session_id) {
                Some(flag) => {
                    flag.store(true, Ordering::SeqCst);
                    true
                }
                None => false,
            }
        };
        if flagged {
            self.approvals.cancel_all();
            for run in self.scheduler.list_active() {
                self.scheduler.cancel(&run.id);
            }
        }
        flagged
    }

    // ── State snapshots ───────────────────────────────────────────────────────

    pub fn state(&self) -> HarnessState {
        HarnessState {
            sessions: self
                .sessions
                .lock()
                .expect("sessions lock poisoned")
                .clone(),
            middleware: self.middlewares.state(),
        }
    }

    pub fn load_state(&self, state: HarnessState) -> Result<(), HarnessError> {
        if !self
            .active
            .lock()
            .expect("active runs lock poisoned")
            .is_empty()
        {
            return Err(HarnessError::State(
                "cannot load state while runs are in flight".into(),
            ));
        }
        *self.sessions.lock().expect("sessions lock poisoned") = state.sessions;
        self.middlewares.load_state(&state.middleware);
        Ok(())
    }
}
