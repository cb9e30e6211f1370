// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
mod skills;

pub use skills::{discover_skills, parse_skill_file, ParsedSkill, Skill, SkillAsset, SkillsRegistry};
