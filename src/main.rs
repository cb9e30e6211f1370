// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use vel_core::{Harness, HarnessEvent, RunStatus};
use vel_model::{MockProvider, ModelProvider};
use vel_store::{DiskBackend, MemoryBackend, RoutedBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let prompt = cli.prompt_text();
    if prompt.trim().is_empty() {
        anyhow::bail!("no prompt given; usage: vel <prompt…>");
    }

    let mut config = vel_config::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.skills_dir {
        config.skills.skill_dirs.push(dir.clone());
    }

    let provider: Arc<dyn ModelProvider> = match config.model.provider.as_str() {
        "mock" => Arc::new(MockProvider),
        other => anyhow::bail!(
            "provider driver \"{other}\" is not bundled with this workspace; \
             embedding applications supply their own ModelProvider. \
             Configure `model.provider: mock` to exercise the harness."
        ),
    };

    // Session scratch stays in memory; /memories/ persists across runs.
    let memories = DiskBackend::new(&cli.state_dir);
    let backend = Arc::new(
        RoutedBackend::new(Arc::new(MemoryBackend::new()))
            .route("/memories", Arc::new(memories)),
    );

    let skills = Arc::new(vel_runtime::discover_skills(&config.skills.skill_dirs));
    let approve_all = cli.approve_all;

    let harness = Arc::new(
        Harness::builder(provider, backend, config)
            .skills(skills)
            .build()
            .await
            .context("harness boot failed")?,
    );

    let (session_id, mut rx) = harness
        .run_stream(prompt, cli.session.clone())
        .context("run failed to start")?;
    eprintln!("session: {session_id}");

    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            HarnessEvent::TextDelta(delta) => {
                print!("{delta}");
                let _ = stdout.flush();
            }
            HarnessEvent::TextComplete(_) => println!(),
            HarnessEvent::ToolCallStarted(tc) => {
                eprintln!("→ {}({})", tc.name, tc.args);
            }
            HarnessEvent::ToolCallFinished { tool_name, is_error, .. } => {
                let marker = if is_error { "✗" } else { "✓" };
                eprintln!("{marker} {tool_name}");
            }
            HarnessEvent::ApprovalRequired { call_id, tool_name, args } => {
                if approve_all {
                    eprintln!("! auto-approving {tool_name}({args})");
                    harness.approvals().respond(&call_id, true);
                } else {
                    eprintln!(
                        "! denying {tool_name}({args}) — pass --approve-all to allow"
                    );
                    harness.approvals().respond(&call_id, false);
                }
            }
            HarnessEvent::SubagentStarted { subagent_id, agent_type, .. } => {
                eprintln!("⇒ subagent {subagent_id} ({agent_type}) started");
            }
            HarnessEvent::SubagentCompleted { subagent_id, .. } => {
                eprintln!("⇐ subagent {subagent_id} completed");
            }
            HarnessEvent::SubagentFailed { subagent_id, error } => {
                eprintln!("⇐ subagent {subagent_id} failed: {error}");
            }
            HarnessEvent::ContextCompacted { tokens_before, tokens_after, strategy } => {
                eprintln!("… context {strategy:?}: {tokens_before} → {tokens_after} tokens");
            }
            HarnessEvent::SessionEnd { status, reason, .. } => {
                if status != RunStatus::Completed {
                    eprintln!("run {status:?}: {reason}");
                }
            }
            _ => {}
        }
    }

    match harness.last_outcome(&session_id).map(|o| o.status) {
        Some(RunStatus::Completed) => Ok(()),
        Some(status) => anyhow::bail!("run ended with status {status:?}"),
        None => anyhow::bail!("run produced no outcome"),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
