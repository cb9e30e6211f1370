// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
pub mod approval;
pub mod builtin;
pub mod events;
pub mod registry;
pub mod tool;

pub use approval::{ApprovalDecision, ApprovalManager, PendingApproval};
pub use events::{render_todos_markdown, TodoItem, TodoPriority, TodoStatus, ToolEvent};
pub use registry::{validate_args, RegistryError, ToolRegistry, ToolSchema};
pub use tool::{Tool, ToolCall, ToolCallState, ToolOutput};

pub use builtin::fs::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
pub use builtin::skills::{ListSkillAssetsTool, ListSkillsTool, LoadSkillTool, SearchSkillsTool};
pub use builtin::todo::{TodoReadTool, TodoWriteTool};
