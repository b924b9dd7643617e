// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

/// Provider-agnostic LLM gateway: one SDK and server for Gemini, Claude,
/// Mistral, and a local mock.
#[derive(Parser, Debug)]
#[command(name = "manifold", version, about)]
pub struct Cli {
    /// Path to an explicit config file (merged over the discovered ones).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr (RUST_LOG overrides the level).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the configured providers.
    Providers {
        #[arg(long)]
        json: bool,
    },

    /// List models, optionally restricted to one provider.
    Models {
        #[arg(long, short = 'p')]
        provider: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// One stateless completion; prints the assistant text to stdout.
    Ask {
        /// The user message.
        prompt: String,
        /// Model reference: `provider/model` or a bare model name.
        #[arg(long, short = 'm')]
        model: Option<String>,
        /// System prompt for this turn.
        #[arg(long, short = 's')]
        system: Option<String>,
        /// Attach a file (image, audio, …); repeatable.
        #[arg(long, short = 'a')]
        attach: Vec<PathBuf>,
        /// Stream the response token by token.
        #[arg(long)]
        stream: bool,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Number of parallel completions.
        #[arg(long, short = 'n')]
        num_completions: Option<u32>,
    },

    /// One turn in a persisted session.
    Chat {
        /// Session id (create one with `manifold sessions new`).
        session: String,
        prompt: String,
        /// Override the session's default model for this turn.
        #[arg(long, short = 'm')]
        model: Option<String>,
        #[arg(long)]
        stream: bool,
    },

    /// Embed one or more texts; prints one JSON vector per line.
    Embed {
        #[arg(required = true)]
        text: Vec<String>,
        #[arg(long, short = 'm')]
        model: Option<String>,
    },

    /// Run a named agent definition.
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },

    /// Inspect and manage persisted sessions.
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Start the HTTP server.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8861")]
        addr: SocketAddr,
    },

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum AgentCommands {
    /// List discovered agent definitions.
    List,
    /// Run an agent with a JSON input.
    Run {
        name: String,
        /// JSON input value (defaults to `{}`).
        #[arg(long, short = 'i')]
        input: Option<String>,
        /// Keep the run's session instead of deleting it.
        #[arg(long)]
        keep_session: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    List,
    /// Print one session as JSON.
    Show { id: String },
    /// Create a session and print its id.
    New {
        #[arg(long, short = 'l', default_value = "")]
        label: String,
        #[arg(long, short = 'm')]
        model: Option<String>,
        #[arg(long, short = 's')]
        system: Option<String>,
    },
    Delete { id: String },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
