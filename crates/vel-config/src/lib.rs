// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod schema;

pub use loader::load;
pub use schema::{
    ApprovalPolicyConfig, Config, ContextConfig, HarnessConfig, ModelConfig, SkillsConfig,
    SubagentLimits,
};
