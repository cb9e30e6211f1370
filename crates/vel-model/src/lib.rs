// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
pub mod catalog;
pub mod mock;
mod provider;
mod types;

pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::{ModelProvider, ResponseStream};
pub use types::{
    CompletionRequest, Message, MessageContent, Part, ResponseEvent, Role, ToolSchema,
};
