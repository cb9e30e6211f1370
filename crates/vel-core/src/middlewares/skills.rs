// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use vel_model::{Message, Role};
use vel_runtime::SkillsRegistry;
use vel_tools::{
    ListSkillAssetsTool, ListSkillsTool, LoadSkillTool, SearchSkillsTool, Tool, ToolCall,
    ToolOutput,
};

use crate::middleware::{Middleware, TurnContext};

/// Skills middleware: progressive disclosure of procedural knowledge.
///
/// The prompt segment carries only `{name, description}` pairs — stable
/// across turns, so the provider's prompt cache survives.  Full bodies reach
/// the model exclusively as `load_skill` tool results.  The active set
/// tracks which skills this session has matched or loaded.
pub struct SkillsMiddleware {
    skills: Arc<SkillsRegistry>,
    active: Mutex<BTreeSet<String>>,
}

impl SkillsMiddleware {
    pub fn new(skills: Arc<SkillsRegistry>) -> Self {
        Self { skills, active: Mutex::new(BTreeSet::new()) }
    }

    /// Names of skills activated this session (trigger-matched or loaded).
    /// Always a subset of the registry.
    pub fn active_skills(&self) -> Vec<String> {
        self.active
            .lock()
            .expect("active skills lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    fn mark_active(&self, name: &str) {
        if self.skills.get(name).is_some() {
            self.active
                .lock()
                .expect("active skills lock poisoned")
                .insert(name.to_string());
        }
    }
}

#[async_trait]
impl Middleware for SkillsMiddleware {
    fn name(&self) -> &str {
        "skills"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(ListSkillsTool::new(self.skills.clone())),
            Arc::new(LoadSkillTool::new(self.skills.clone())),
            Arc::new(SearchSkillsTool::new(self.skills.clone())),
            Arc::new(ListSkillAssetsTool::new(self.skills.clone())),
        ]
    }

    fn system_prompt_segment(&self) -> Option<String> {
        let enabled: Vec<_> = self.skills.list().iter().filter(|s| s.enabled).collect();
        if enabled.is_empty() {
            return None;
        }
        let lines: Vec<String> = enabled
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.description.trim().lines().next().unwrap_or("")))
            .collect();
        Some(format!(
            "## Skills\n\
             The following skills are available. When a request matches a \
             skill's description, call load_skill(name) to get its full \
             instructions before proceeding.\n{}",
            lines.join("\n")
        ))
    }

    async fn before_turn(
        &self,
        _ctx: &TurnContext,
        messages: Vec<Message>,
    ) -> anyhow::Result<Vec<Message>> {
        // Trigger matching against the latest user text marks skills active;
        // the model still decides whether to load them.
        if let Some(text) = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.as_text())
        {
            for skill in self.skills.match_triggers(text) {
                self.mark_active(&skill.name);
            }
        }
        Ok(messages)
    }

    async fn on_tool_result(
        &self,
        _ctx: &TurnContext,
        call: &ToolCall,
        output: ToolOutput,
    ) -> ToolOutput {
        if call.name == "load_skill" && !output.is_error {
            if let Some(name) = call.args.get("name").and_then(|n| n.as_str()) {
                self.mark_active(name);
            }
        }
        output
    }

    fn state(&self) -> Value {
        serde_json::to_value(self.active_skills()).unwrap_or(Value::Null)
    }

    fn load_state(&self, state: &Value) {
        if let Ok(names) = serde_json::from_value::<Vec<String>>(state.clone()) {
            let mut active = self.active.lock().expect("active skills lock poisoned");
            active.clear();
            // Restored entries stay a subset of the registry.
            for name in names {
                if self.skills.get(&name).is_some() {
                    active.insert(name);
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use vel_runtime::Skill;

    use super::*;

    fn registry() -> Arc<SkillsRegistry> {
        let mut reg = SkillsRegistry::new();
        reg.register(Skill {
            name: "git-workflow".into(),
            description: "Use when committing.\nMore detail here.".into(),
            content: "body".into(),
            triggers: vec!["commit".into()],
            tags: vec![],
            priority: 0,
            enabled: true,
            requires: vec![],
            author: None,
            version: None,
        });
        Arc::new(reg)
    }

    fn ctx() -> TurnContext {
        let (tx, _rx) = mpsc::channel(8);
        TurnContext { session_id: "s".into(), turn: 1, events: tx }
    }

    #[test]
    fn segment_lists_names_not_bodies() {
        let mw = SkillsMiddleware::new(registry());
        let segment = mw.system_prompt_segment().unwrap();
        assert!(segment.contains("git-workflow"));
        assert!(segment.contains("Use when committing."));
        assert!(!segment.contains("body"), "skill bodies never enter the prompt");
        // Only the first description line appears.
        assert!(!segment.contains("More detail here."));
    }

    #[tokio::test]
    async fn trigger_match_marks_skill_active() {
        let mw = SkillsMiddleware::new(registry());
        mw.before_turn(&ctx(), vec![Message::user("please commit this")])
            .await
            .unwrap();
        assert_eq!(mw.active_skills(), vec!["git-workflow"]);
    }

    #[tokio::test]
    async fn load_skill_result_marks_active() {
        let mw = SkillsMiddleware::new(registry());
        let call = ToolCall {
            id: "c".into(),
            name: "load_skill".into(),
            args: json!({"name": "git-workflow"}),
        };
        mw.on_tool_result(&ctx(), &call, ToolOutput::ok("c", "loaded"))
            .await;
        assert_eq!(mw.active_skills(), vec!["git-workflow"]);
    }

    #[tokio::test]
    async fn failed_load_does_not_mark_active() {
        let mw = SkillsMiddleware::new(registry());
        let call = ToolCall {
            id: "c".into(),
            name: "load_skill".into(),
            args: json!({"name": "git-workflow"}),
        };
        mw.on_tool_result(&ctx(), &call, ToolOutput::err("c", "nope"))
            .await;
        assert!(mw.active_skills().is_empty());
    }

    #[test]
    fn state_restores_only_known_skills() {
        let mw = SkillsMiddleware::new(registry());
        mw.load_state(&json!(["git-workflow", "ghost-skill"]));
        assert_eq!(mw.active_skills(), vec!["git-workflow"]);
    }
}
