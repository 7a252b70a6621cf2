// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration inspection commands: `show`, `validate`.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use codebroker_core::infrastructure::config::BrokerConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (after env-var overrides)
    Show,

    /// Validate a manifest without starting the daemon
    Validate {
        /// Path to the manifest to validate (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show => show(config_override).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
    }
}

async fn show(config_path: Option<PathBuf>) -> Result<()> {
    let config = BrokerConfig::load_or_default(config_path.as_deref()).context("loading configuration")?;
    let rendered = serde_yaml::to_string(&config).context("rendering configuration")?;
    println!("{}", "Effective configuration:".bold());
    println!("{rendered}");
    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.context("no manifest path given and none discovered")?;
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let _config: BrokerConfig = serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    println!("{}", format!("✓ {} is a valid configuration manifest", path.display()).green());
    Ok(())
}
