// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workspace-scoped, cache-friendly view onto loaded tools. Owns the
//! spec-hash/auth-fingerprint binding that guarantees tool path stability,
//! and the single-in-flight-per-URL DTS cache the Typechecker reads from.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::domain::tool::{ToolDescriptor, ToolRunner, ToolSource, ToolSourceConfig};
use crate::infrastructure::{graphql_loader, mcp_loader, openapi_loader, tool_loader::LoadedSource};

/// One workspace's loaded tool set, keyed by tool path.
#[derive(Default)]
struct WorkspaceTools {
    descriptors: Vec<ToolDescriptor>,
    runners: HashMap<String, Arc<dyn ToolRunner>>,
    dts_urls: HashMap<String, Option<String>>,
}

pub struct ToolRegistry {
    workspaces: DashMap<String, Arc<WorkspaceTools>>,
    dts_cache: DashMap<String, Arc<OnceCell<String>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            workspaces: DashMap::new(),
            dts_cache: DashMap::new(),
        }
    }

    /// Loads every configured source for a workspace concurrently. Per-source
    /// failures are isolated into the warnings list; successes are merged.
    pub async fn reload_workspace(&self, workspace_id: &str, sources: &[ToolSource]) -> Vec<String> {
        let mut all_warnings = Vec::new();
        let mut descriptors = Vec::new();
        let mut runners = HashMap::new();

        let loads: Vec<_> = sources
            .iter()
            .map(|source| load_source(&source.name, &source.config))
            .collect();
        let results = futures::future::join_all(loads).await;

        for (source, loaded) in sources.iter().zip(results) {
            match loaded {
                Ok(LoadedSource {
                    descriptors: mut d,
                    runners: r,
                    warnings,
                }) => {
                    descriptors.append(&mut d);
                    runners.extend(r);
                    all_warnings.extend(warnings.into_iter().map(|w| format!("{}: {w}", source.name)));
                }
                Err(err) => all_warnings.push(format!("{}: {err}", source.name)),
            }
        }

        self.workspaces.insert(
            workspace_id.to_string(),
            Arc::new(WorkspaceTools {
                descriptors,
                runners,
                dts_urls: HashMap::new(),
            }),
        );

        all_warnings
    }

    pub fn list_tools(&self, workspace_id: &str) -> Vec<ToolDescriptor> {
        self.workspaces
            .get(workspace_id)
            .map(|tools| tools.descriptors.clone())
            .unwrap_or_default()
    }

    pub fn runner_for(&self, workspace_id: &str, tool_path: &str) -> Option<Arc<dyn ToolRunner>> {
        self.workspaces.get(workspace_id).and_then(|tools| tools.runners.get(tool_path).cloned())
    }

    pub fn list_tools_for_typecheck(&self, workspace_id: &str) -> (Vec<ToolDescriptor>, HashMap<String, Option<String>>) {
        match self.workspaces.get(workspace_id) {
            Some(tools) => (tools.descriptors.clone(), tools.dts_urls.clone()),
            None => (Vec::new(), HashMap::new()),
        }
    }

    /// Fetches and caches a declaration bundle URL, guaranteeing a single
    /// in-flight fetch per URL process-wide.
    pub async fn fetch_dts(&self, url: &str) -> Result<String, String> {
        let cell = self
            .dts_cache
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| async {
            let response = reqwest::get(url).await.map_err(|e| e.to_string())?;
            response.text().await.map_err(|e| e.to_string())
        })
        .await
        .map(|s| s.clone())
    }
}

async fn load_source(name: &str, config: &ToolSourceConfig) -> Result<LoadedSource, String> {
    match config {
        ToolSourceConfig::Openapi(cfg) => openapi_loader::load(name, cfg).await.map_err(|e| e.to_string()),
        ToolSourceConfig::Graphql(cfg) => Ok(graphql_loader::load(name, cfg).await),
        ToolSourceConfig::Mcp(cfg) => Ok(mcp_loader::load(name, cfg).await),
    }
}
