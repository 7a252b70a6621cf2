// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Access policy commands: `list`, `set`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;

use codebroker_core::domain::policy::{AccessPolicy, PolicyDecision};

use crate::daemon::server::DEFAULT_WORKSPACE;
use crate::embedded;

#[derive(Clone, Copy, ValueEnum)]
pub enum DecisionArg {
    Allow,
    RequireApproval,
    Deny,
}

impl From<DecisionArg> for PolicyDecision {
    fn from(value: DecisionArg) -> Self {
        match value {
            DecisionArg::Allow => PolicyDecision::Allow,
            DecisionArg::RequireApproval => PolicyDecision::RequireApproval,
            DecisionArg::Deny => PolicyDecision::Deny,
        }
    }
}

#[derive(Subcommand)]
pub enum PolicyCommand {
    /// List access policy rules
    List,

    /// Add or replace a policy rule
    Set {
        /// Tool path pattern (`stripe.**`, `stripe.*`, or an exact path)
        pattern: String,

        #[arg(value_enum)]
        decision: DecisionArg,

        /// Higher priority wins among overlapping rules
        #[arg(long, default_value_t = 0)]
        priority: i32,

        /// Restrict this rule to one actor
        #[arg(long)]
        actor_id: Option<String>,

        /// Restrict this rule to one OAuth client
        #[arg(long)]
        client_id: Option<String>,
    },
}

pub async fn handle_command(command: PolicyCommand, config_path: Option<PathBuf>) -> Result<()> {
    let graph = embedded::connect(config_path).await?;

    match command {
        PolicyCommand::List => {
            let policies = graph
                .policies
                .list_for_workspace(DEFAULT_WORKSPACE)
                .await
                .context("listing access policies")?;
            if policies.is_empty() {
                println!("{}", "no policy rules configured; every call is allowed by default".yellow());
                return Ok(());
            }
            for policy in policies {
                println!(
                    "  [{:>3}] {} -> {:?}{}{}",
                    policy.priority,
                    policy.tool_path_pattern,
                    policy.decision,
                    policy.actor_id.as_deref().map(|a| format!(" actor={a}")).unwrap_or_default(),
                    policy.client_id.as_deref().map(|c| format!(" client={c}")).unwrap_or_default(),
                );
            }
            Ok(())
        }
        PolicyCommand::Set {
            pattern,
            decision,
            priority,
            actor_id,
            client_id,
        } => {
            let policy = AccessPolicy {
                workspace_id: DEFAULT_WORKSPACE.to_string(),
                actor_id,
                client_id,
                tool_path_pattern: pattern.clone(),
                decision: decision.into(),
                priority,
            };
            graph.policies.save(policy).await.context("saving the access policy")?;
            println!("{}", format!("✓ policy rule set for '{pattern}'").green());
            Ok(())
        }
    }
}
