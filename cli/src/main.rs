// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # codebroker CLI
//!
//! Operator-facing entry point for the multi-tenant code-execution broker.
//!
//! ## Architecture
//!
//! CLI-first, with an optional daemon:
//!
//! - `codebroker serve` runs the HTTP/MCP daemon in the foreground.
//! - `codebroker serve --daemon` backgrounds it (PID file + log redirection).
//! - `source`/`task`/`policy`/`config` build the same service graph in-process
//!   and act on it directly — the daemon has no admin REST API to delegate to.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod daemon;
mod embedded;

use commands::{ConfigCommand, PolicyCommand, SourceCommand, TaskCommand};

#[derive(Parser)]
#[command(name = "codebroker")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run `serve` as a detached background process
    #[arg(long, global = true)]
    daemon: bool,

    /// Path to the configuration manifest (overrides discovery)
    #[arg(short, long, global = true, env = "CODEBROKER_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP listen port (overrides the manifest's `listen.port`)
    #[arg(long, global = true, env = "CODEBROKER_PORT")]
    port: Option<u16>,

    /// HTTP listen host (overrides the manifest's `listen.host`)
    #[arg(long, global = true, env = "CODEBROKER_HOST")]
    host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CODEBROKER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (foreground, or `--daemon` to background it)
    Serve,

    /// Manage tool sources
    Source {
        #[command(subcommand)]
        command: SourceCommand,
    },

    /// Submit code and inspect task state/output
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Inspect and edit access policy rules
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },

    /// Print or validate the effective configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Serve) => {
            let host = cli.host.clone().unwrap_or_else(|| "127.0.0.1".to_string());
            let port = cli.port.unwrap_or(8787);
            if cli.daemon {
                daemon::spawn_background(cli.config, port, &host).await
            } else {
                daemon::server::start_daemon(cli.config, cli.port, cli.host).await
            }
        }
        Some(Commands::Source { command }) => commands::source::handle_command(command, cli.config).await,
        Some(Commands::Task { command }) => commands::task::handle_command(command, cli.config).await,
        Some(Commands::Policy { command }) => commands::policy::handle_command(command, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("no command specified; run with --help for usage");
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("building the log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
