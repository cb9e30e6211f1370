// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub harness: HarnessConfig,
    #[serde(default)]
    pub subagents: SubagentLimits,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "mock" ships with the workspace; network drivers
    /// are plugged in by embedding applications.
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    /// Never put keys themselves in config files.
    pub api_key_env: Option<String>,
    /// Base URL override for self-hosted or proxied endpoints.
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            name: "mock-model".into(),
            api_key_env: None,
            base_url: None,
        }
    }
}

/// Per-session budgets and loop-control knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Maximum model-call → tool-dispatch iterations per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Hard cap on tool invocations per run (0 disables the cap).
    #[serde(default)]
    pub max_tool_calls: u32,
    /// Wall-clock budget per run in seconds (0 disables the cap).
    #[serde(default)]
    pub max_wall_clock_secs: u64,
    /// Total-token budget per run, input + output (0 disables the cap).
    #[serde(default)]
    pub max_total_tokens: u64,
    /// Tools that must be confirmed before running: "always" requires every
    /// tool to be approved, "never" disables the gate, "per_tool" (default)
    /// honours each tool's own `requires_confirmation` flag.
    #[serde(default)]
    pub tool_approval_policy: ApprovalPolicyConfig,
    /// Working directory made available to tool handlers.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Loop detector: window of recent (tool, args) fingerprints.
    #[serde(default = "default_loop_window")]
    pub loop_detection_window: usize,
    /// Loop detector: identical repeats tolerated before intervening.
    #[serde(default = "default_loop_repeats")]
    pub loop_detection_repeats: usize,
    /// Provider retry attempts on transient failure.
    #[serde(default = "default_provider_retries")]
    pub provider_retries: u32,
}

fn default_max_steps() -> u32 {
    50
}
fn default_loop_window() -> usize {
    10
}
fn default_loop_repeats() -> usize {
    3
}
fn default_provider_retries() -> u32 {
    3
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tool_calls: 0,
            max_wall_clock_secs: 0,
            max_total_tokens: 0,
            tool_approval_policy: ApprovalPolicyConfig::default(),
            working_directory: None,
            loop_detection_window: default_loop_window(),
            loop_detection_repeats: default_loop_repeats(),
            provider_retries: default_provider_retries(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicyConfig {
    /// Every tool call requires approval.
    Always,
    /// No tool call requires approval.
    Never,
    /// Each tool's own `requires_confirmation` flag decides.
    #[default]
    PerTool,
}

/// Subagent scheduler caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentLimits {
    /// Live children at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Spawns per session (grandchildren count against the same cap).
    #[serde(default = "default_max_total")]
    pub max_total: usize,
    /// Tasks accepted by a single `spawn_parallel` call.
    #[serde(default = "default_max_parallel")]
    pub max_parallel_tasks: usize,
    /// Default step budget for children without an explicit override.
    #[serde(default = "default_child_steps")]
    pub default_max_steps: u32,
}

fn default_max_concurrent() -> usize {
    5
}
fn default_max_total() -> usize {
    20
}
fn default_max_parallel() -> usize {
    5
}
fn default_child_steps() -> u32 {
    25
}

impl Default for SubagentLimits {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_total: default_max_total(),
            max_parallel_tasks: default_max_parallel(),
            default_max_steps: default_child_steps(),
        }
    }
}

/// Context-manager thresholds.  Fractions are of the model context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Per-tool-result offload trigger, in tokens.
    #[serde(default = "default_large_result_limit")]
    pub large_result_token_limit: usize,
    /// Fraction of the window at which tool-call compaction activates.
    #[serde(default = "default_eviction_threshold")]
    pub eviction_threshold: f32,
    /// Fraction of the window at which summarization activates.
    #[serde(default = "default_summarization_threshold")]
    pub summarization_threshold: f32,
    /// Most-recent messages always kept verbatim by summarization.
    #[serde(default = "default_preserve_recent")]
    pub preserve_recent: usize,
    /// Lines of preview kept in place of an offloaded result.
    #[serde(default = "default_preview_lines")]
    pub preview_lines: usize,
    /// Tool names whose outputs must never be offloaded.
    #[serde(default)]
    pub excluded_tools: Vec<String>,
    /// Per-model context-window overrides (prefix-matched), tokens.
    #[serde(default)]
    pub context_windows: HashMap<String, u32>,
}

fn default_large_result_limit() -> usize {
    20_000
}
fn default_eviction_threshold() -> f32 {
    0.85
}
fn default_summarization_threshold() -> f32 {
    0.95
}
fn default_preserve_recent() -> usize {
    20
}
fn default_preview_lines() -> usize {
    10
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            large_result_token_limit: default_large_result_limit(),
            eviction_threshold: default_eviction_threshold(),
            summarization_threshold: default_summarization_threshold(),
            preserve_recent: default_preserve_recent(),
            preview_lines: default_preview_lines(),
            excluded_tools: Vec::new(),
            context_windows: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillsConfig {
    /// Directories scanned for skill packages.
    #[serde(default)]
    pub skill_dirs: Vec<PathBuf>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.harness.max_steps, 50);
        assert_eq!(c.subagents.max_concurrent, 5);
        assert_eq!(c.subagents.max_total, 20);
        assert_eq!(c.subagents.max_parallel_tasks, 5);
        assert_eq!(c.context.large_result_token_limit, 20_000);
        assert!((c.context.eviction_threshold - 0.85).abs() < f32::EPSILON);
        assert!((c.context.summarization_threshold - 0.95).abs() < f32::EPSILON);
        assert_eq!(c.context.preserve_recent, 20);
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_missing_fields() {
        let c: Config = serde_yaml::from_str("harness:\n  max_steps: 7\n").unwrap();
        assert_eq!(c.harness.max_steps, 7);
        assert_eq!(c.harness.loop_detection_repeats, 3);
        assert_eq!(c.subagents.max_total, 20);
    }

    #[test]
    fn approval_policy_parses_snake_case() {
        let c: Config =
            serde_yaml::from_str("harness:\n  tool_approval_policy: always\n").unwrap();
        assert_eq!(c.harness.tool_approval_policy, ApprovalPolicyConfig::Always);
    }

    #[test]
    fn context_window_overrides_parse() {
        let c: Config = serde_yaml::from_str(
            "context:\n  context_windows:\n    my-model: 32000\n",
        )
        .unwrap();
        assert_eq!(c.context.context_windows.get("my-model"), Some(&32_000));
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let c = Config::default();
        let text = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.harness.max_steps, c.harness.max_steps);
        assert_eq!(back.model.provider, c.model.provider);
    }
}
