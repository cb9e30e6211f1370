// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::Parser;

/// Run a prompt through the vel agent harness and stream the result.
#[derive(Debug, Parser)]
#[command(name = "vel", version, about)]
pub struct Cli {
    /// The prompt to run.  Multiple words are joined with spaces.
    #[arg(trailing_var_arg = true)]
    pub prompt: Vec<String>,

    /// Explicit config file (merged over the standard search paths).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Session id to continue; a fresh session is created when omitted.
    #[arg(long, short = 's')]
    pub session: Option<String>,

    /// Directory backing the persistent /memories/ route.
    #[arg(long, default_value = ".vel/state")]
    pub state_dir: PathBuf,

    /// Extra skills directory scanned in addition to the configured ones.
    #[arg(long)]
    pub skills_dir: Option<PathBuf>,

    /// Approve every confirmation-required tool call without asking.
    /// Without this flag such calls are denied.
    #[arg(long)]
    pub approve_all: bool,

    /// Verbose logging to stderr (RUST_LOG still takes precedence).
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl Cli {
    pub fn prompt_text(&self) -> String {
        self.prompt.join(" ")
    }
}
