// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool descriptors, tool sources, and the tool-path sanitizer.
//!
//! A [`ToolSource`] is a configured external system (OpenAPI, GraphQL, or MCP)
//! that, once loaded, yields a flat list of [`ToolDescriptor`]s. Tool sources
//! are modeled as a tagged variant at the boundary per the duck-typed-config
//! rewrite rule: callers dispatch on `ToolSourceConfig`'s tag, never probe it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static NON_IDENT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9_]+").unwrap());

/// Lowercases, replaces non-`[a-z0-9_]` runs with a single `_`, strips
/// leading/trailing `_`, and substitutes `"default"` when the result is empty.
pub fn sanitize(segment: &str) -> String {
    let lowered = segment.to_lowercase();
    let collapsed = NON_IDENT_RUN.replace_all(&lowered, "_");
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Builds the dot-joined tool path `sanitize(source).sanitize(tag).sanitize(operation)`.
pub fn tool_path(source_name: &str, tag: &str, operation_id: &str) -> String {
    format!(
        "{}.{}.{}",
        sanitize(source_name),
        sanitize(tag),
        sanitize(operation_id)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRequirement {
    Auto,
    Required,
}

/// HTTP methods eligible for OpenAPI tool-path generation, in selection order.
pub const OPENAPI_METHODS: [&str; 7] = ["get", "post", "put", "delete", "patch", "head", "options"];

pub fn is_read_method(method: &str) -> bool {
    matches!(method, "get" | "head" | "options")
}

pub fn default_approval_for_method(method: &str) -> ApprovalRequirement {
    if is_read_method(method) {
        ApprovalRequirement::Auto
    } else {
        ApprovalRequirement::Required
    }
}

/// A flat, workspace-scoped record naming a callable tool.
///
/// `run` is held by the infrastructure-layer loader that produced this
/// descriptor (an HTTP closure, a GraphQL delegation, or an MCP proxy) and is
/// invoked by the dispatcher; it is intentionally absent from this plain-data
/// type so descriptors stay `Serialize`/`Deserialize` and cacheable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub path: String,
    pub description: String,
    pub approval: ApprovalRequirement,
    pub args_type: Option<String>,
    pub returns_type: Option<String>,
    pub operation_id: Option<String>,
    pub schema_types: Option<HashMap<String, String>>,
    /// Non-`None` for GraphQL pseudo-tools; names the real tool path `run` delegates to.
    pub delegates_to: Option<String>,
}

impl ToolDescriptor {
    pub fn new(path: String, description: String, approval: ApprovalRequirement) -> Self {
        Self {
            path,
            description,
            approval,
            args_type: None,
            returns_type: None,
            operation_id: None,
            schema_types: None,
            delegates_to: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenApiSourceConfig {
    pub spec_url: Option<String>,
    pub spec_inline: Option<String>,
    pub base_url: String,
    pub approval_overrides: HashMap<String, ApprovalRequirement>,
    /// Open question in the source spec; preserved default is `false` (silent
    /// parse-only fallback rather than a hard failure).
    #[serde(default)]
    pub allow_parse_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphqlSourceConfig {
    pub endpoint_url: String,
    pub approval_overrides: HashMap<String, ApprovalRequirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSourceConfig {
    pub endpoint_url: String,
    pub approval_overrides: HashMap<String, ApprovalRequirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSourceConfig {
    Openapi(OpenApiSourceConfig),
    Graphql(GraphqlSourceConfig),
    Mcp(McpSourceConfig),
}

impl ToolSourceConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolSourceConfig::Openapi(_) => "openapi",
            ToolSourceConfig::Graphql(_) => "graphql",
            ToolSourceConfig::Mcp(_) => "mcp",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSource {
    pub workspace_id: String,
    pub name: String,
    pub config: ToolSourceConfig,
    pub spec_hash: String,
    pub auth_fingerprint: String,
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.workspace_id, self.name, self.config.kind())
    }
}

impl ToolSource {
    /// Builds a source record, deriving `spec_hash` from the config body and
    /// `auth_fingerprint` from whatever credential headers are bound at
    /// registration time, so changing either independently is visible to
    /// callers without re-diffing the whole config.
    pub fn new(workspace_id: String, name: String, config: ToolSourceConfig, credential_headers: &HashMap<String, String>) -> Self {
        let spec_hash = digest_hex(serde_json::to_vec(&config).unwrap_or_default());
        let mut auth_material: Vec<_> = credential_headers.iter().collect();
        auth_material.sort_by(|a, b| a.0.cmp(b.0));
        let auth_bytes = auth_material
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n");
        let auth_fingerprint = digest_hex(auth_bytes.into_bytes());

        Self {
            workspace_id,
            name,
            config,
            spec_hash,
            auth_fingerprint,
        }
    }
}

fn digest_hex(bytes: Vec<u8>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

/// Binds auth material to a source; scoped to a workspace or a specific actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCredential {
    pub source_name: String,
    pub workspace_id: String,
    pub actor_id: Option<String>,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum ToolRunError {
    #[error("http error: {status} {status_text}: {body_excerpt}")]
    Http {
        status: u16,
        status_text: String,
        body_excerpt: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

/// The callable side of a [`ToolDescriptor`]. Kept out of the descriptor
/// itself so descriptors stay plain, serializable data; the infrastructure
/// loader that produced a descriptor also produces its runner and the two
/// are paired by tool path in the Tool Registry.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, input: Value, credential_headers: &HashMap<String, String>) -> Result<Value, ToolRunError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_collapses() {
        assert_eq!(sanitize("Stripe API"), "stripe_api");
        assert_eq!(sanitize("get__Customer--By.Id"), "get_customer_by_id");
    }

    #[test]
    fn sanitize_falls_back_to_default() {
        assert_eq!(sanitize("***"), "default");
        assert_eq!(sanitize(""), "default");
    }

    #[test]
    fn tool_path_joins_sanitized_segments() {
        assert_eq!(
            tool_path("Stripe", "Customers", "createCustomer"),
            "stripe.customers.createcustomer"
        );
    }

    #[test]
    fn read_methods_default_to_auto_approval() {
        assert_eq!(default_approval_for_method("get"), ApprovalRequirement::Auto);
        assert_eq!(default_approval_for_method("head"), ApprovalRequirement::Auto);
        assert_eq!(default_approval_for_method("post"), ApprovalRequirement::Required);
        assert_eq!(default_approval_for_method("delete"), ApprovalRequirement::Required);
    }
}
