// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use orc_config::AgentMode;

/// Output format for a headless run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormatArg {
    /// Stream events as plain text to stdout as they arrive (default).
    #[default]
    Text,
    /// Full-fidelity JSONL: one JSON record per event.
    Jsonl,
}

#[derive(Parser, Debug)]
#[command(
    name = "orcd",
    about = "A headless agentic LLM orchestrator",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// The task to hand to the agent. Omit to read from stdin.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Agent mode
    #[arg(long, short = 'm', value_enum, default_value = "agent")]
    pub mode: AgentMode,

    /// Model to use, e.g. "gpt-4o" or "anthropic/claude-opus-4-5"
    #[arg(long, short = 'M', env = "ORCD_MODEL")]
    pub model: Option<String>,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Output format for the event stream
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormatArg,

    /// Maximum tool-call rounds before the loop is forced to a final,
    /// tool-free wrap-up turn. Overrides config.
    #[arg(long)]
    pub max_recursion_depth: Option<u32>,

    /// Gate every tool call behind an interactive y/n/a(ll) prompt on stdin.
    /// Overrides config.
    #[arg(long)]
    pub require_tool_approval: bool,

    /// Disable streaming; print the complete response once the turn finishes.
    #[arg(long)]
    pub no_stream: bool,

    /// Write the final agent response to a file after the run completes.
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output_last_message: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print the effective configuration and exit
    ShowConfig,
    /// List available models for the configured provider(s).
    ListModels {
        /// Filter by provider name (e.g. "openai", "anthropic", "groq")
        #[arg(long, short = 'p')]
        provider: Option<String>,
        /// Query the provider API for the live list of available models
        #[arg(long)]
        refresh: bool,
        /// Output as JSON instead of a formatted table
        #[arg(long)]
        json: bool,
    },
    /// List all supported model providers.
    ListProviders {
        /// Show detailed information for each provider
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "orcd", &mut std::io::stdout());
}
