// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
//! Skill discovery and parsing for skill package trees.
//!
//! ## Skill packages
//!
//! A skill is a markdown document of procedural knowledge.  Discovery is
//! **entrypoint-only**: a file becomes a skill when it is named `SKILL.md`
//! (matched case-insensitively) or when its frontmatter carries
//! `kind: skill`.  Every other markdown file sitting next to a skill is
//! registered as an *asset* of that skill — queryable, but never activatable.
//! This keeps README files and design notes from being treated as skills.
//!
//! Example layout:
//! ```text
//! skills/
//! ├── git-workflow/
//! │   ├── SKILL.md          → skill "git-workflow"
//! │   ├── NOTES.md          → asset of "git-workflow"
//! │   └── release/
//! │       └── SKILL.md      → skill "release"
//! └── deploy-checklist.md   → skill iff frontmatter has `kind: skill`
//! ```
//!
//! ## SKILL.md format
//!
//! ```markdown
//! ---
//! name: git-workflow        # optional — falls back to the directory name
//! description: |
//!   Use when the user asks to commit, rebase, or prepare a release.
//! tags: [git, vcs]
//! triggers: ["commit", "rebase"]
//! priority: 10
//! enabled: true
//! requires: [git]
//! author: infra-team
//! version: 0.2.0
//! ---
//!
//! # Skill body here…
//! ```
//!
//! Skill bodies are reference data: they are injected into the conversation
//! as `load_skill` tool results, never as system-prompt fragments, so the
//! provider's prompt cache stays valid across turns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

pub(crate) const MAX_SKILL_FILE_BYTES: u64 = 256 * 1024; // 256 KB

// ── Public types ──────────────────────────────────────────────────────────────

/// A fully parsed and validated skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    /// Unique name.  Comes from the `name:` frontmatter field; falls back to
    /// the directory name (for `SKILL.md`) or the file stem otherwise.
    pub name: String,
    /// Description from frontmatter (should contain trigger phrases).
    pub description: String,
    /// Markdown body — everything after the closing `---` fence.
    pub content: String,
    /// Patterns matched against user text, case-insensitively.
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ordering for trigger matches; higher wins.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Names of binaries or capabilities this skill needs.
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// A non-skill markdown file bundled next to a skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillAsset {
    /// Owning skill name.
    pub skill: String,
    /// Absolute path of the asset file.
    pub path: PathBuf,
}

/// Registry of parsed skills and their bundled assets.
///
/// Immutable after harness initialisation; built once by [`discover_skills`]
/// (or assembled programmatically) and shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct SkillsRegistry {
    skills: Vec<Skill>,
    by_name: HashMap<String, usize>,
    assets: Vec<SkillAsset>,
}

impl SkillsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill.  A later registration with the same name replaces
    /// the earlier one (higher-precedence discovery sources register last).
    pub fn register(&mut self, skill: Skill) {
        if let Some(&idx) = self.by_name.get(&skill.name) {
            self.skills[idx] = skill;
        } else {
            self.by_name.insert(skill.name.clone(), self.skills.len());
            self.skills.push(skill);
        }
    }

    pub fn register_asset(&mut self, asset: SkillAsset) {
        self.assets.push(asset);
    }

    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.by_name.get(name).map(|&idx| &self.skills[idx])
    }

    /// All skills in registration order.
    pub fn list(&self) -> &[Skill] {
        &self.skills
    }

    /// Case-insensitive substring match across name, description, and tags.
    pub fn search(&self, query: &str) -> Vec<&Skill> {
        let q = query.to_lowercase();
        self.skills
            .iter()
            .filter(|s| {
                s.name.to_lowercase().contains(&q)
                    || s.description.to_lowercase().contains(&q)
                    || s.tags.iter().any(|t| t.to_lowercase().contains(&q))
            })
            .collect()
    }

    /// Enabled skills whose trigger patterns match `text`, sorted by priority
    /// descending (name ascending as tie-break for determinism).
    pub fn match_triggers(&self, text: &str) -> Vec<&Skill> {
        let haystack = text.to_lowercase();
        let mut matched: Vec<&Skill> = self
            .skills
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| {
                s.triggers
                    .iter()
                    .any(|t| !t.is_empty() && haystack.contains(&t.to_lowercase()))
            })
            .collect();
        matched.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.name.cmp(&b.name)));
        matched
    }

    /// Asset paths bundled with the named skill, sorted.
    pub fn assets_of(&self, skill: &str) -> Vec<&SkillAsset> {
        let mut out: Vec<&SkillAsset> = self.assets.iter().filter(|a| a.skill == skill).collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

// ── Internal frontmatter schema ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawFrontmatter {
    #[serde(default)]
    name: Option<String>,
    description: String,
    /// `skill` marks a non-`SKILL.md` markdown file as a skill entrypoint.
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    triggers: Vec<String>,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parsed frontmatter fields plus the markdown body.
pub struct ParsedSkill {
    pub name: Option<String>,
    pub description: String,
    pub kind: Option<String>,
    pub tags: Vec<String>,
    pub triggers: Vec<String>,
    pub priority: i32,
    pub enabled: bool,
    pub requires: Vec<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    /// Everything after the closing `---` fence, with leading whitespace trimmed.
    pub body: String,
}

impl ParsedSkill {
    /// Whether this file is an activatable skill entrypoint by frontmatter.
    pub fn is_skill_kind(&self) -> bool {
        self.kind.as_deref() == Some("skill")
    }

    fn into_skill(self, fallback_name: &str) -> Skill {
        Skill {
            name: self
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| fallback_name.to_string()),
            description: self.description,
            content: self.body,
            triggers: self.triggers,
            tags: self.tags,
            priority: self.priority,
            enabled: self.enabled,
            requires: self.requires,
            author: self.author,
            version: self.version,
        }
    }
}

/// Parse a raw skill markdown string into its frontmatter fields and body.
///
/// The `description` field is required.  Returns `None` when the frontmatter
/// is missing, malformed, or lacks a non-empty `description`.
#[must_use]
pub fn parse_skill_file(raw: &str) -> Option<ParsedSkill> {
    let rest = raw.trim_start_matches('\n');
    let after_open = rest.strip_prefix("---")?;
    let close = after_open.find("\n---")?;
    let yaml_block = &after_open[..close];
    // Body starts after "\n---" (4 bytes). Strip one leading newline if present.
    let body = after_open[close + 4..].trim_start_matches('\n').to_string();

    let fm: RawFrontmatter = serde_yaml::from_str(yaml_block).ok()?;

    if fm.description.trim().is_empty() {
        return None;
    }

    Some(ParsedSkill {
        name: fm.name,
        description: fm.description,
        kind: fm.kind,
        tags: fm.tags,
        triggers: fm.triggers,
        priority: fm.priority,
        enabled: fm.enabled,
        requires: fm.requires,
        author: fm.author,
        version: fm.version,
        body,
    })
}

// ── Directory scanning ────────────────────────────────────────────────────────

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
}

fn is_skill_entrypoint_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.eq_ignore_ascii_case("skill.md"))
        .unwrap_or(false)
}

fn read_parsed(path: &Path) -> Option<ParsedSkill> {
    let size = path.metadata().map(|m| m.len()).unwrap_or(0);
    if size > MAX_SKILL_FILE_BYTES {
        warn!(
            path = %path.display(),
            size,
            max = MAX_SKILL_FILE_BYTES,
            "skipping oversized skill file"
        );
        return None;
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read skill file");
            return None;
        }
    };
    parse_skill_file(&raw)
}

/// Scan one directory level: classify its markdown files into the skill
/// entrypoint, extra `kind: skill` entrypoints, and assets, then recurse.
fn scan_dir(dir: &Path, registry: &mut SkillsRegistry) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    entries.sort();

    let dir_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("skill")
        .to_string();

    // First pass: the directory's SKILL.md (if any) anchors asset ownership.
    let mut dir_skill: Option<String> = None;
    for path in entries.iter().filter(|p| p.is_file()) {
        if is_skill_entrypoint_name(path) {
            if let Some(parsed) = read_parsed(path) {
                let skill = parsed.into_skill(&dir_name);
                dir_skill = Some(skill.name.clone());
                registry.register(skill);
            } else {
                warn!(path = %path.display(), "failed to parse SKILL.md — skipping");
            }
        }
    }

    // Second pass: remaining markdown files are either `kind: skill`
    // entrypoints in their own right or assets of the directory's skill.
    for path in entries.iter().filter(|p| p.is_file()) {
        if !is_markdown(path) || is_skill_entrypoint_name(path) {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("skill")
            .to_string();
        match read_parsed(path) {
            Some(parsed) if parsed.is_skill_kind() => {
                registry.register(parsed.into_skill(&stem));
            }
            _ => {
                if let Some(owner) = &dir_skill {
                    registry.register_asset(SkillAsset {
                        skill: owner.clone(),
                        path: path.clone(),
                    });
                }
            }
        }
    }

    for path in entries.iter().filter(|p| p.is_dir()) {
        scan_dir(path, registry);
    }
}

/// Discover all skills under the given root directories.
///
/// Directories are scanned in order, so a skill in a later root replaces an
/// earlier one with the same name (later roots take precedence).
#[must_use]
pub fn discover_skills(dirs: &[PathBuf]) -> SkillsRegistry {
    let mut registry = SkillsRegistry::new();
    for dir in dirs {
        scan_dir(dir, &mut registry);
    }
    registry
}

// ── Tests ─────────────────────────────────────────────────────────────────────
