// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
//! Workspace smoke test: the full stack from config to a finished run.

use std::sync::Arc;

use vel_config::Config;
use vel_core::{Harness, RunStatus};
use vel_model::MockProvider;
use vel_store::{DiskBackend, MemoryBackend, RoutedBackend};

#[tokio::test]
async fn mock_harness_answers_end_to_end() {
    let tmp = tempfile::TempDir::new().unwrap();
    let backend = Arc::new(
        RoutedBackend::new(Arc::new(MemoryBackend::new()))
            .route("/memories", Arc::new(DiskBackend::new(tmp.path()))),
    );
    let skills = Arc::new(vel_runtime::discover_skills(&[]));

    let harness = Arc::new(
        Harness::builder(Arc::new(MockProvider), backend, Config::default())
            .skills(skills)
            .build()
            .await
            .unwrap(),
    );

    let outcome = harness.run("hello harness", None).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.text.contains("hello harness"));
}

#[tokio::test]
async fn config_defaults_drive_the_harness() {
    let config = Config::default();
    assert_eq!(config.model.provider, "mock");

    let backend = Arc::new(MemoryBackend::new());
    let harness = Arc::new(
        Harness::builder(Arc::new(MockProvider), backend, config)
            .build()
            .await
            .unwrap(),
    );
    // The standard middleware set contributes the core tool surface.
    let names = harness.tool_names();
    for expected in [
        "todo_write",
        "todo_read",
        "read_file",
        "write_file",
        "edit_file",
        "list_dir",
        "spawn_subagent",
        "spawn_parallel",
        "wait_subagent",
        "wait_all_subagents",
        "cancel_subagent",
        "list_subagents",
    ] {
        assert!(
            names.iter().any(|n| n == expected),
            "missing tool {expected}; have {names:?}"
        );
    }
}
