// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tool source management commands: `add`, `list`, `remove`, `test`.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use codebroker_core::application::tool_registry::ToolRegistry;
use codebroker_core::domain::tool::{GraphqlSourceConfig, McpSourceConfig, OpenApiSourceConfig, ToolSource, ToolSourceConfig};

use crate::daemon::server::{ServiceGraph, DEFAULT_WORKSPACE};
use crate::embedded;

#[derive(Clone, Copy, ValueEnum)]
pub enum SourceKind {
    Openapi,
    Graphql,
    Mcp,
}

#[derive(Subcommand)]
pub enum SourceCommand {
    /// Register a tool source
    Add {
        /// Unique name within the workspace
        name: String,

        #[arg(long, value_enum)]
        kind: SourceKind,

        /// OpenAPI document URL (openapi sources only)
        #[arg(long)]
        spec_url: Option<String>,

        /// Base URL tool calls are issued against (openapi sources only)
        #[arg(long)]
        base_url: Option<String>,

        /// Endpoint URL (graphql/mcp sources only)
        #[arg(long)]
        endpoint_url: Option<String>,

        /// Tolerate a spec that only partially parses (openapi sources only)
        #[arg(long)]
        allow_parse_only: bool,
    },

    /// List registered sources
    List,

    /// Remove a registered source
    Remove {
        name: String,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Load a registered source and report the tools it yields
    Test { name: String },
}

pub async fn handle_command(command: SourceCommand, config_path: Option<PathBuf>) -> Result<()> {
    let graph = embedded::connect(config_path).await?;

    match command {
        SourceCommand::Add {
            name,
            kind,
            spec_url,
            base_url,
            endpoint_url,
            allow_parse_only,
        } => {
            let config = build_config(kind, spec_url, base_url, endpoint_url, allow_parse_only)?;
            let source = ToolSource::new(DEFAULT_WORKSPACE.to_string(), name.clone(), config, &HashMap::new());
            graph.tool_sources.save(&source).await.context("saving the tool source")?;
            println!("{}", format!("✓ registered source '{name}'").green());
            Ok(())
        }
        SourceCommand::List => {
            let sources = graph
                .tool_sources
                .list_for_workspace(DEFAULT_WORKSPACE)
                .await
                .context("listing tool sources")?;
            if sources.is_empty() {
                println!("{}", "no sources registered".yellow());
                return Ok(());
            }
            for source in sources {
                println!("  {} ({}) spec_hash={}", source.name.bold(), source.config.kind(), &source.spec_hash[..12]);
            }
            Ok(())
        }
        SourceCommand::Remove { name, yes } => {
            if !yes {
                let confirmed = dialoguer::Confirm::new()
                    .with_prompt(format!("remove source '{name}'?"))
                    .default(false)
                    .interact()
                    .context("reading confirmation")?;
                if !confirmed {
                    return Ok(());
                }
            }
            graph
                .tool_sources
                .delete(DEFAULT_WORKSPACE, &name)
                .await
                .context("removing the tool source")?;
            println!("{}", format!("✓ removed source '{name}'").green());
            Ok(())
        }
        SourceCommand::Test { name } => test(graph, name).await,
    }
}

async fn test(graph: ServiceGraph, name: String) -> Result<()> {
    let source = graph
        .tool_sources
        .find_by_name(DEFAULT_WORKSPACE, &name)
        .await
        .context("looking up the tool source")?;
    let Some(source) = source else {
        bail!("no source named '{name}' is registered");
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
    spinner.set_message(format!("loading '{name}'..."));
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let probe = ToolRegistry::new();
    let warnings = probe.reload_workspace(DEFAULT_WORKSPACE, std::slice::from_ref(&source)).await;
    let tools = probe.list_tools(DEFAULT_WORKSPACE);

    spinner.finish_and_clear();

    if warnings.is_empty() {
        println!("{}", format!("✓ '{name}' yielded {} tool(s)", tools.len()).green());
    } else {
        println!("{}", format!("⚠ '{name}' yielded {} tool(s) with warnings", tools.len()).yellow());
        for warning in warnings {
            println!("  {warning}");
        }
    }
    for tool in tools {
        println!("  {} ({:?})", tool.path, tool.approval);
    }
    Ok(())
}

fn build_config(
    kind: SourceKind,
    spec_url: Option<String>,
    base_url: Option<String>,
    endpoint_url: Option<String>,
    allow_parse_only: bool,
) -> Result<ToolSourceConfig> {
    match kind {
        SourceKind::Openapi => {
            let base_url = base_url.context("--base-url is required for openapi sources")?;
            validate_url("--base-url", &base_url)?;
            if let Some(spec_url) = &spec_url {
                validate_url("--spec-url", spec_url)?;
            }
            Ok(ToolSourceConfig::Openapi(OpenApiSourceConfig {
                spec_url,
                spec_inline: None,
                base_url,
                approval_overrides: HashMap::new(),
                allow_parse_only,
            }))
        }
        SourceKind::Graphql => {
            let endpoint_url = endpoint_url.context("--endpoint-url is required for graphql sources")?;
            validate_url("--endpoint-url", &endpoint_url)?;
            Ok(ToolSourceConfig::Graphql(GraphqlSourceConfig {
                endpoint_url,
                approval_overrides: HashMap::new(),
            }))
        }
        SourceKind::Mcp => {
            let endpoint_url = endpoint_url.context("--endpoint-url is required for mcp sources")?;
            validate_url("--endpoint-url", &endpoint_url)?;
            Ok(ToolSourceConfig::Mcp(McpSourceConfig {
                endpoint_url,
                approval_overrides: HashMap::new(),
            }))
        }
    }
}

fn validate_url(flag: &str, raw: &str) -> Result<()> {
    url::Url::parse(raw).with_context(|| format!("{flag} is not a valid URL: '{raw}'"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_requires_base_url() {
        let err = build_config(SourceKind::Openapi, None, None, None, false).unwrap_err();
        assert!(err.to_string().contains("--base-url"));
    }

    #[test]
    fn openapi_rejects_an_invalid_base_url() {
        let err = build_config(SourceKind::Openapi, None, Some("not-a-url".to_string()), None, false).unwrap_err();
        assert!(err.to_string().contains("not a valid URL"));
    }

    #[test]
    fn openapi_builds_with_a_valid_base_url() {
        let config = build_config(SourceKind::Openapi, None, Some("https://api.example.com".to_string()), None, true).unwrap();
        match config {
            ToolSourceConfig::Openapi(cfg) => {
                assert_eq!(cfg.base_url, "https://api.example.com");
                assert!(cfg.allow_parse_only);
            }
            _ => panic!("expected an openapi config"),
        }
    }

    #[test]
    fn graphql_and_mcp_require_endpoint_url() {
        assert!(build_config(SourceKind::Graphql, None, None, None, false).is_err());
        assert!(build_config(SourceKind::Mcp, None, None, None, false).is_err());
    }
}
