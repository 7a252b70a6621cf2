// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! MCP tool source loader — connects via streamable-HTTP, falling back to
//! SSE on connect failure, and exposes each remote tool as `{source}.{name}`.

use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::RunningService;
use rmcp::transport::sse_client::SseClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::tool::{tool_path, ApprovalRequirement, McpSourceConfig, ToolDescriptor, ToolRunError, ToolRunner};
use crate::infrastructure::tool_loader::LoadedSource;

const TRANSIENT_ERROR_MARKERS: [&str; 4] = ["socket", "closed", "ECONNRESET", "fetch failed"];

fn is_transient(message: &str) -> bool {
    TRANSIENT_ERROR_MARKERS.iter().any(|marker| message.contains(marker))
}

pub struct McpToolRunner {
    client: Arc<RunningService<RoleClient, ()>>,
    remote_tool_name: String,
}

#[async_trait]
impl ToolRunner for McpToolRunner {
    async fn run(&self, input: Value, _credential_headers: &HashMap<String, String>) -> Result<Value, ToolRunError> {
        let arguments = match input {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Some(map)
            }
        };

        let result = self
            .client
            .call_tool(CallToolRequestParam {
                name: self.remote_tool_name.clone().into(),
                arguments,
            })
            .await
            .map_err(|e| ToolRunError::Transport(e.to_string()))?;

        serde_json::to_value(result).map_err(|e| ToolRunError::Transport(e.to_string()))
    }
}

async fn connect(endpoint_url: &str) -> Result<RunningService<RoleClient, ()>, String> {
    match StreamableHttpClientTransport::from_uri(endpoint_url.to_string()) {
        transport => match ().serve(transport).await {
            Ok(service) => return Ok(service),
            Err(err) if is_transient(&err.to_string()) => {
                tracing::warn!(error = %err, "streamable-http mcp connect failed, falling back to sse");
            }
            Err(err) => return Err(err.to_string()),
        },
    }

    let transport = SseClientTransport::start(endpoint_url.to_string())
        .await
        .map_err(|e| e.to_string())?;
    ().serve(transport).await.map_err(|e| e.to_string())
}

async fn connect_with_retry(endpoint_url: &str) -> Result<RunningService<RoleClient, ()>, String> {
    match connect(endpoint_url).await {
        Ok(service) => Ok(service),
        Err(err) if is_transient(&err) => connect(endpoint_url).await,
        Err(err) => Err(err),
    }
}

pub async fn load(source_name: &str, config: &McpSourceConfig) -> LoadedSource {
    let mut descriptors = Vec::new();
    let mut runners: HashMap<String, Arc<dyn ToolRunner>> = HashMap::new();
    let mut warnings = Vec::new();

    let service = match connect_with_retry(&config.endpoint_url).await {
        Ok(service) => Arc::new(service),
        Err(err) => {
            warnings.push(format!("failed to connect to mcp source {source_name}: {err}"));
            return LoadedSource {
                descriptors,
                runners,
                warnings,
            };
        }
    };

    match service.list_all_tools().await {
        Ok(tools) => {
            for tool in tools {
                let path = tool_path(source_name, "default", &tool.name);
                let approval = config
                    .approval_overrides
                    .get(&path)
                    .copied()
                    .unwrap_or(ApprovalRequirement::Required);
                let mut descriptor = ToolDescriptor::new(
                    path.clone(),
                    tool.description.clone().unwrap_or_default().to_string(),
                    approval,
                );
                descriptor.args_type = Some("Record<string, unknown>".to_string());
                descriptor.returns_type = Some("unknown".to_string());
                descriptors.push(descriptor);
                runners.insert(
                    path,
                    Arc::new(McpToolRunner {
                        client: service.clone(),
                        remote_tool_name: tool.name.to_string(),
                    }),
                );
            }
        }
        Err(err) => warnings.push(format!("tools/list failed for mcp source {source_name}: {err}")),
    }

    LoadedSource {
        descriptors,
        runners,
        warnings,
    }
}
