// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! GraphQL tool source loader — one executable `.graphql` tool plus
//! discovery-only pseudo-tools per introspected root field.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::tool::{tool_path, ApprovalRequirement, GraphqlSourceConfig, ToolDescriptor, ToolRunError, ToolRunner};
use crate::infrastructure::tool_loader::LoadedSource;

const INTROSPECTION_QUERY: &str = r#"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    types {
      name
      kind
      fields {
        name
        args { name type { ...TypeRef } }
        type { ...TypeRef }
      }
    }
  }
}
fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType { kind name }
      }
    }
  }
}
"#;

pub struct GraphqlToolRunner {
    client: Client,
    endpoint_url: String,
}

#[async_trait]
impl ToolRunner for GraphqlToolRunner {
    async fn run(&self, input: Value, credential_headers: &HashMap<String, String>) -> Result<Value, ToolRunError> {
        let mut request = self.client.post(&self.endpoint_url).json(&input);
        for (key, value) in credential_headers {
            request = request.header(key, value);
        }
        let response = request.send().await.map_err(|e| ToolRunError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolRunError::Http {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                body_excerpt: body.chars().take(500).collect(),
            });
        }
        response.json::<Value>().await.map_err(|e| ToolRunError::Transport(e.to_string()))
    }
}

/// A pseudo-tool's run delegates to the source's main `.graphql` tool,
/// auto-building a document from the field name when `query` is absent.
struct PseudoToolRunner {
    delegate: Arc<dyn ToolRunner>,
    operation: &'static str,
    field: String,
}

#[async_trait]
impl ToolRunner for PseudoToolRunner {
    async fn run(&self, input: Value, credential_headers: &HashMap<String, String>) -> Result<Value, ToolRunError> {
        if input.get("query").and_then(Value::as_str).is_some() {
            return self.delegate.run(input, credential_headers).await;
        }
        let variables = input.get("variables").cloned().unwrap_or(json!({}));
        let document = format!("{} {{ {} }}", self.operation, self.field);
        let payload = json!({ "query": document, "variables": variables });
        self.delegate.run(payload, credential_headers).await
    }
}

pub async fn load(source_name: &str, config: &GraphqlSourceConfig) -> LoadedSource {
    let client = Client::new();
    let mut descriptors = Vec::new();
    let mut runners: HashMap<String, Arc<dyn ToolRunner>> = HashMap::new();
    let mut warnings = Vec::new();

    let main_path = format!("{}.graphql", crate::domain::tool::sanitize(source_name));
    let main_runner: Arc<dyn ToolRunner> = Arc::new(GraphqlToolRunner {
        client: client.clone(),
        endpoint_url: config.endpoint_url.clone(),
    });
    let mut main_descriptor = ToolDescriptor::new(
        main_path.clone(),
        format!("Execute an arbitrary GraphQL query or mutation against {source_name}"),
        ApprovalRequirement::Auto,
    );
    main_descriptor.args_type = Some("{ query: string; variables?: Record<string, unknown>; }".to_string());
    main_descriptor.returns_type = Some("unknown".to_string());
    descriptors.push(main_descriptor);
    runners.insert(main_path.clone(), main_runner.clone());

    match introspect(&client, &config.endpoint_url).await {
        Ok(schema) => {
            for (operation, root_type) in [("query", schema.query_type), ("mutation", schema.mutation_type)] {
                let Some(type_name) = root_type else { continue };
                let Some(fields) = schema.fields_by_type.get(&type_name) else { continue };
                for field in fields {
                    let path = tool_path(source_name, operation, field);
                    let approval = config
                        .approval_overrides
                        .get(&path)
                        .copied()
                        .unwrap_or(ApprovalRequirement::Auto);
                    let descriptor = ToolDescriptor::new(path.clone(), format!("{operation} {field}"), approval);
                    let mut descriptor = descriptor;
                    descriptor.delegates_to = Some(main_path.clone());
                    descriptors.push(descriptor);
                    runners.insert(
                        path,
                        Arc::new(PseudoToolRunner {
                            delegate: main_runner.clone(),
                            operation: if operation == "query" { "query" } else { "mutation" },
                            field: field.clone(),
                        }),
                    );
                }
            }
        }
        Err(err) => warnings.push(format!("introspection failed, only the main .graphql tool is available: {err}")),
    }

    LoadedSource {
        descriptors,
        runners,
        warnings,
    }
}

struct IntrospectedSchema {
    query_type: Option<String>,
    mutation_type: Option<String>,
    fields_by_type: HashMap<String, Vec<String>>,
}

async fn introspect(client: &Client, endpoint_url: &str) -> Result<IntrospectedSchema, String> {
    let response = client
        .post(endpoint_url)
        .json(&json!({ "query": INTROSPECTION_QUERY }))
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let body: Value = response.json().await.map_err(|e| e.to_string())?;
    let schema = body
        .get("data")
        .and_then(|d| d.get("__schema"))
        .ok_or_else(|| "malformed introspection response".to_string())?;

    let query_type = schema
        .get("queryType")
        .and_then(|t| t.get("name"))
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    let mutation_type = schema
        .get("mutationType")
        .and_then(|t| t.get("name"))
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    let mut fields_by_type = HashMap::new();
    if let Some(types) = schema.get("types").and_then(Value::as_array) {
        for ty in types {
            let Some(name) = ty.get("name").and_then(Value::as_str) else { continue };
            let fields: Vec<String> = ty
                .get("fields")
                .and_then(Value::as_array)
                .map(|fs| {
                    fs.iter()
                        .filter_map(|f| f.get("name").and_then(Value::as_str).map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            if !fields.is_empty() {
                fields_by_type.insert(name.to_string(), fields);
            }
        }
    }

    Ok(IntrospectedSchema {
        query_type,
        mutation_type,
        fields_by_type,
    })
}
