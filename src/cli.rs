// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

use loom_config::AgentMode;

#[derive(Parser, Debug)]
#[command(
    name = "loom",
    about = "Headless agent orchestration engine: turn scheduler, streaming inference client, tool pipeline",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one headless request against a conversation, draining any
    /// messages already queued for it, and print the assistant's reply to
    /// stdout as it streams.
    Run {
        /// Conversation id. A new conversation is created if it doesn't exist.
        conversation: String,

        /// The message to send. Read from stdin if omitted.
        message: Option<String>,

        /// Agent mode for this run; defaults to the configured default.
        #[arg(long, value_enum)]
        mode: Option<AgentMode>,
    },

    /// List saved conversations, most recently updated first.
    List {
        /// Maximum number of conversations to show.
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Print a conversation's transcript.
    Show {
        /// Conversation id.
        conversation: String,
    },

    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "loom", &mut std::io::stdout());
}
