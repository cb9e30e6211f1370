// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
//! Skill tools: progressive disclosure of procedural knowledge.
//!
//! The system prompt lists only `{name, description}` pairs.  Full skill
//! bodies reach the model exclusively through `load_skill` tool results —
//! never through prompt edits, which would invalidate the provider's prompt
//! cache.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use vel_runtime::SkillsRegistry;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Lists available skills as `{name, description, tags}` records.
pub struct ListSkillsTool {
    skills: Arc<SkillsRegistry>,
}

impl ListSkillsTool {
    pub fn new(skills: Arc<SkillsRegistry>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl Tool for ListSkillsTool {
    fn name(&self) -> &str {
        "list_skills"
    }

    fn description(&self) -> &str {
        "List all available skills with their names, descriptions, and tags. \
         Use load_skill to fetch a skill's full instructions."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    fn tags(&self) -> &[&str] {
        &["skills"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let listing: Vec<Value> = self
            .skills
            .list()
            .iter()
            .filter(|s| s.enabled)
            .map(|s| {
                json!({
                    "name": s.name,
                    "description": s.description.trim(),
                    "tags": s.tags,
                })
            })
            .collect();
        if listing.is_empty() {
            return ToolOutput::ok(&call.id, "No skills are currently available.");
        }
        ToolOutput::ok(
            &call.id,
            serde_json::to_string_pretty(&listing).unwrap_or_default(),
        )
    }
}

/// Loads a named skill's full content into the conversation.
pub struct LoadSkillTool {
    skills: Arc<SkillsRegistry>,
}

impl LoadSkillTool {
    pub fn new(skills: Arc<SkillsRegistry>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl Tool for LoadSkillTool {
    fn name(&self) -> &str {
        "load_skill"
    }

    fn description(&self) -> &str {
        "Load the full instructions for a named skill into the conversation \
         context. Call this when the user's request matches a skill \
         description from list_skills or the system prompt."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "The name of the skill to load"
                }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["skills"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let name = call.args["name"].as_str().unwrap_or_default();
        debug!(skill = name, "load_skill tool");

        let Some(skill) = self.skills.get(name) else {
            let available = self
                .skills
                .list()
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return ToolOutput::err(
                &call.id,
                format!(
                    "skill \"{name}\" not found. Available skills: {}",
                    if available.is_empty() { "(none)" } else { &available }
                ),
            );
        };
        if !skill.enabled {
            return ToolOutput::err(&call.id, format!("skill \"{name}\" is disabled"));
        }

        ToolOutput::ok(
            &call.id,
            format!(
                "<skill-loaded name=\"{name}\">\n{}\n</skill-loaded>\n\
                 Follow the instructions above.",
                skill.content.trim_end()
            ),
        )
    }
}

/// Searches skills by substring across name, description, and tags.
pub struct SearchSkillsTool {
    skills: Arc<SkillsRegistry>,
}

impl SearchSkillsTool {
    pub fn new(skills: Arc<SkillsRegistry>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl Tool for SearchSkillsTool {
    fn name(&self) -> &str {
        "search_skills"
    }

    fn description(&self) -> &str {
        "Search available skills by a case-insensitive substring across \
         names, descriptions, and tags."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search text"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["skills"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = call.args["query"].as_str().unwrap_or_default();
        let hits = self.skills.search(query);
        if hits.is_empty() {
            return ToolOutput::ok(&call.id, format!("No skills match \"{query}\"."));
        }
        let listing: Vec<Value> = hits
            .iter()
            .map(|s| json!({ "name": s.name, "description": s.description.trim() }))
            .collect();
        ToolOutput::ok(
            &call.id,
            serde_json::to_string_pretty(&listing).unwrap_or_default(),
        )
    }
}

/// Lists the non-skill markdown assets bundled with a skill.
pub struct ListSkillAssetsTool {
    skills: Arc<SkillsRegistry>,
}

impl ListSkillAssetsTool {
    pub fn new(skills: Arc<SkillsRegistry>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl Tool for ListSkillAssetsTool {
    fn name(&self) -> &str {
        "list_skill_assets"
    }

    fn description(&self) -> &str {
        "List the bundled (non-skill) files that ship alongside a named skill."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "The skill whose assets to list"
                }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["skills"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let name = call.args["name"].as_str().unwrap_or_default();
        if self.skills.get(name).is_none() {
            return ToolOutput::err(&call.id, format!("skill \"{name}\" not found"));
        }
        let assets = self.skills.assets_of(name);
        if assets.is_empty() {
            return ToolOutput::ok(&call.id, format!("Skill \"{name}\" has no bundled assets."));
        }
        let lines: Vec<String> = assets
            .iter()
            .map(|a| a.path.display().to_string())
            .collect();
        ToolOutput::ok(&call.id, lines.join("\n"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
