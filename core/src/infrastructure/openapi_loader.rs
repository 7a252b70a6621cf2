// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! OpenAPI tool source loader and type synthesizer.
//!
//! Parses an OpenAPI 3.x document (falling back to untyped, parse-only tool
//! descriptors for Swagger 2 or otherwise malformed documents), generates a
//! flat tool list, and synthesizes TypeScript-notation `argsType`/`returnsType`
//! strings plus a shared `schemaTypes` alias map.

use openapiv3::{OpenAPI, Operation, Parameter, ParameterSchemaOrContent, PathItem, ReferenceOr, Schema, SchemaKind, Type};
use reqwest::Client;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::domain::tool::{
    default_approval_for_method, tool_path, OpenApiSourceConfig, ToolDescriptor, ToolRunner, OPENAPI_METHODS,
};
use crate::infrastructure::http_adapter::{HttpMethod, HttpToolRunner};
use crate::infrastructure::tool_loader::LoadedSource;

const MAX_RESOLVED_SCHEMAS: usize = 200;
const FALLBACK_MAX_DEPTH: usize = 4;
const FALLBACK_MAX_OBJECT_KEYS: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum OpenApiLoadError {
    #[error("no spec provided: both specUrl and specInline are empty")]
    NoSpec,
    #[error("fetching spec: {0}")]
    Fetch(String),
}

pub async fn load(source_name: &str, config: &OpenApiSourceConfig) -> Result<LoadedSource, OpenApiLoadError> {
    let raw = fetch_spec_text(config).await?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .or_else(|_| serde_yaml::from_str(&raw).map_err(|_| ()))
        .unwrap_or(serde_json::Value::Null);

    match serde_json::from_value::<OpenAPI>(value.clone()) {
        Ok(spec) => Ok(build_from_parsed_spec(source_name, config, &spec)),
        Err(err) => {
            let mut loaded = build_from_raw_fallback(source_name, config, &value);
            loaded
                .warnings
                .push(format!("falling back to parse-only tool descriptors: {err}"));
            Ok(loaded)
        }
    }
}

async fn fetch_spec_text(config: &OpenApiSourceConfig) -> Result<String, OpenApiLoadError> {
    if let Some(inline) = &config.spec_inline {
        return Ok(inline.clone());
    }
    if let Some(url) = &config.spec_url {
        let client = Client::new();
        let resp = client.get(url).send().await.map_err(|e| OpenApiLoadError::Fetch(e.to_string()))?;
        return resp.text().await.map_err(|e| OpenApiLoadError::Fetch(e.to_string()));
    }
    Err(OpenApiLoadError::NoSpec)
}

fn build_from_parsed_spec(source_name: &str, config: &OpenApiSourceConfig, spec: &OpenAPI) -> LoadedSource {
    let mut descriptors = Vec::new();
    let mut runners: HashMap<String, Arc<dyn ToolRunner>> = HashMap::new();
    let mut warnings = Vec::new();
    let mut all_schema_refs: HashSet<String> = HashSet::new();
    let client = Client::new();

    let mut first_tool = true;
    let mut schema_types: HashMap<String, String> = HashMap::new();

    for (raw_path, path_item) in spec.paths.iter() {
        let item = match path_item {
            ReferenceOr::Item(item) => item,
            ReferenceOr::Reference { .. } => continue,
        };

        for method in OPENAPI_METHODS {
            let Some(operation) = operation_for_method(item, method) else {
                continue;
            };
            let operation_id = operation
                .operation_id
                .clone()
                .unwrap_or_else(|| format!("{method}_{raw_path}"));
            let tag = operation.tags.first().cloned().unwrap_or_else(|| "default".to_string());
            let path = tool_path(source_name, &tag, &operation_id);

            let approval = config
                .approval_overrides
                .get(&path)
                .copied()
                .unwrap_or_else(|| default_approval_for_method(method));

            let (args_type, refs_in_args) = synthesize_args_type(operation);
            let (returns_type, refs_in_returns) = synthesize_returns_type(operation);
            all_schema_refs.extend(refs_in_args);
            all_schema_refs.extend(refs_in_returns);

            let mut descriptor = ToolDescriptor::new(path.clone(), operation_description(operation), approval);
            descriptor.args_type = Some(args_type);
            descriptor.returns_type = Some(returns_type);
            descriptor.operation_id = Some(operation_id);

            let (path_params, query_params) = collect_parameters(item, operation);
            let method_enum = HttpMethod::parse(method).expect("method drawn from OPENAPI_METHODS");
            let runner = HttpToolRunner::new(
                client.clone(),
                config.base_url.clone(),
                raw_path.clone(),
                method_enum,
                path_params,
                query_params,
                HashMap::new(),
            );
            runners.insert(path.clone(), Arc::new(runner));
            descriptors.push(descriptor);
        }
    }

    let resolved = resolve_schema_aliases(spec, &all_schema_refs, &mut warnings);
    schema_types.extend(resolved.aliases);

    for descriptor in descriptors.iter_mut() {
        if let Some(args) = descriptor.args_type.take() {
            descriptor.args_type = Some(substitute_schema_refs(&args, &resolved.rename_map));
        }
        if let Some(returns) = descriptor.returns_type.take() {
            descriptor.returns_type = Some(substitute_schema_refs(&returns, &resolved.rename_map));
        }
    }

    if let Some(first) = descriptors.first_mut() {
        if first_tool && !schema_types.is_empty() {
            let renamed: HashMap<String, String> = schema_types
                .iter()
                .map(|(name, body)| (name.clone(), substitute_schema_refs(body, &resolved.rename_map)))
                .collect();
            first.schema_types = Some(renamed);
        }
        first_tool = false;
    }
    let _ = first_tool;

    LoadedSource {
        descriptors,
        runners,
        warnings,
    }
}

fn operation_for_method<'a>(item: &'a PathItem, method: &str) -> Option<&'a Operation> {
    match method {
        "get" => item.get.as_ref(),
        "post" => item.post.as_ref(),
        "put" => item.put.as_ref(),
        "delete" => item.delete.as_ref(),
        "patch" => item.patch.as_ref(),
        "head" => item.head.as_ref(),
        "options" => item.options.as_ref(),
        _ => None,
    }
}

fn operation_description(operation: &Operation) -> String {
    operation
        .summary
        .clone()
        .or_else(|| operation.description.clone())
        .unwrap_or_default()
}

fn collect_parameters(item: &PathItem, operation: &Operation) -> (Vec<String>, Vec<String>) {
    let mut path_params = Vec::new();
    let mut query_params = Vec::new();

    let all_params = item.parameters.iter().chain(operation.parameters.iter());
    for param in all_params {
        let ReferenceOr::Item(param) = param else { continue };
        match param {
            Parameter::Path { parameter_data, .. } => path_params.push(parameter_data.name.clone()),
            Parameter::Query { parameter_data, .. } => query_params.push(parameter_data.name.clone()),
            _ => {}
        }
    }

    (path_params, query_params)
}

/// Synthesizes the merged args object literal: declared parameters plus the
/// JSON request body's properties (or a single `body: <ref>` field when the
/// body schema is a bare reference).
fn synthesize_args_type(operation: &Operation) -> (String, HashSet<String>) {
    let mut refs = HashSet::new();
    let mut fields: Vec<(String, String, bool)> = Vec::new();

    for param in &operation.parameters {
        let ReferenceOr::Item(param) = param else { continue };
        let data = match param {
            Parameter::Path { parameter_data, .. }
            | Parameter::Query { parameter_data, .. }
            | Parameter::Header { parameter_data, .. }
            | Parameter::Cookie { parameter_data, .. } => parameter_data,
        };
        let ty = match &data.format {
            ParameterSchemaOrContent::Schema(schema_ref) => type_literal_for_ref(schema_ref, &mut refs),
            ParameterSchemaOrContent::Content(_) => "unknown".to_string(),
        };
        fields.push((data.name.clone(), ty, data.required));
    }

    if let Some(ReferenceOr::Item(body)) = &operation.request_body {
        if let Some(media) = body.content.get("application/json").or_else(|| body.content.iter().next().map(|(_, v)| v)) {
            if let Some(schema_ref) = &media.schema {
                match schema_ref {
                    ReferenceOr::Reference { reference } => {
                        refs.insert(reference.clone());
                        fields.push(("body".to_string(), ref_type_name(reference), true));
                    }
                    ReferenceOr::Item(schema) => {
                        for (name, ty, required) in object_field_literals(schema, &mut refs) {
                            fields.push((name, ty, required));
                        }
                    }
                }
            }
        }
    }

    (render_object_literal(&fields), refs)
}

fn synthesize_returns_type(operation: &Operation) -> (String, HashSet<String>) {
    let mut refs = HashSet::new();
    for (status, response) in &operation.responses.responses {
        if !status_is_2xx(status) {
            continue;
        }
        let ReferenceOr::Item(response) = response else { continue };
        let media = response
            .content
            .get("application/json")
            .or_else(|| response.content.iter().find(|(k, _)| k.contains("json")).map(|(_, v)| v))
            .or_else(|| response.content.iter().next().map(|(_, v)| v));
        if let Some(media) = media {
            if let Some(schema_ref) = &media.schema {
                return (type_literal_for_ref(schema_ref, &mut refs), refs);
            }
        }
        return ("unknown".to_string(), refs);
    }
    ("unknown".to_string(), refs)
}

fn status_is_2xx(status: &openapiv3::StatusCode) -> bool {
    matches!(status, openapiv3::StatusCode::Code(c) if (200..300).contains(c))
}

fn type_literal_for_ref(schema_ref: &ReferenceOr<Schema>, refs: &mut HashSet<String>) -> String {
    match schema_ref {
        ReferenceOr::Reference { reference } => {
            refs.insert(reference.clone());
            ref_type_name(reference)
        }
        ReferenceOr::Item(schema) => schema_type_literal(schema, refs, 0),
    }
}

fn ref_type_name(reference: &str) -> String {
    pascal_case_from_ref(reference)
}

fn pascal_case_from_ref(reference: &str) -> String {
    let name = reference.rsplit('/').next().unwrap_or(reference);
    name.split(|c: char| c == '.' || c == '_' || c == '-')
        .filter(|seg| !seg.is_empty())
        .map(|seg| {
            let mut chars = seg.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn object_field_literals(schema: &Schema, refs: &mut HashSet<String>) -> Vec<(String, String, bool)> {
    if let SchemaKind::Type(Type::Object(obj)) = &schema.schema_kind {
        obj.properties
            .iter()
            .map(|(name, prop_ref)| {
                let ty = type_literal_for_ref(&prop_ref.clone().unbox(), refs);
                let required = obj.required.contains(name);
                (name.clone(), ty, required)
            })
            .collect()
    } else {
        Vec::new()
    }
}

fn render_object_literal(fields: &[(String, String, bool)]) -> String {
    if fields.is_empty() {
        return "Record<string, unknown>".to_string();
    }
    let body: Vec<String> = fields
        .iter()
        .map(|(name, ty, required)| {
            if *required {
                format!("{name}: {ty};")
            } else {
                format!("{name}?: {ty};")
            }
        })
        .collect();
    format!("{{ {} }}", body.join(" "))
}

fn schema_type_literal(schema: &Schema, refs: &mut HashSet<String>, depth: usize) -> String {
    if depth > FALLBACK_MAX_DEPTH {
        return "unknown".to_string();
    }
    match &schema.schema_kind {
        SchemaKind::Type(Type::String(s)) => {
            if !s.enumeration.is_empty() {
                s.enumeration
                    .iter()
                    .flatten()
                    .map(|v| format!("\"{v}\""))
                    .collect::<Vec<_>>()
                    .join(" | ")
            } else {
                "string".to_string()
            }
        }
        SchemaKind::Type(Type::Number(_)) | SchemaKind::Type(Type::Integer(_)) => "number".to_string(),
        SchemaKind::Type(Type::Boolean(_)) => "boolean".to_string(),
        SchemaKind::Type(Type::Array(arr)) => {
            let item = arr
                .items
                .as_ref()
                .map(|i| type_literal_for_ref(&i.clone().unbox(), refs))
                .unwrap_or_else(|| "unknown".to_string());
            format!("{item}[]")
        }
        SchemaKind::Type(Type::Object(obj)) => {
            let fields: Vec<(String, String, bool)> = obj
                .properties
                .iter()
                .take(FALLBACK_MAX_OBJECT_KEYS)
                .map(|(name, prop_ref)| {
                    let ty = type_literal_for_ref(&prop_ref.clone().unbox(), refs);
                    (name.clone(), ty, obj.required.contains(name))
                })
                .collect();
            render_object_literal(&fields)
        }
        SchemaKind::OneOf { one_of } | SchemaKind::AnyOf { one_of: _, .. } if matches!(&schema.schema_kind, SchemaKind::OneOf { .. }) => {
            let variants: Vec<String> = one_of.iter().map(|s| type_literal_for_ref(s, refs)).collect();
            variants.join(" | ")
        }
        SchemaKind::AnyOf { any_of } => {
            let variants: Vec<String> = any_of.iter().map(|s| type_literal_for_ref(s, refs)).collect();
            variants.join(" | ")
        }
        _ => "unknown".to_string(),
    }
}

struct ResolvedSchemas {
    aliases: HashMap<String, String>,
    rename_map: HashMap<String, String>,
}

/// Breadth-first expansion of every schema transitively referenced by the
/// operations, capped at [`MAX_RESOLVED_SCHEMAS`]. Remaining unresolved refs
/// (and all `components.parameters.*` refs) are left to resolve to `unknown`.
fn resolve_schema_aliases(spec: &OpenAPI, seed_refs: &HashSet<String>, warnings: &mut Vec<String>) -> ResolvedSchemas {
    let mut aliases = HashMap::new();
    let mut rename_map = HashMap::new();
    let mut queue: VecDeque<String> = seed_refs.iter().cloned().collect();
    let mut visited: HashSet<String> = HashSet::new();

    let Some(components) = &spec.components else {
        return ResolvedSchemas { aliases, rename_map };
    };

    while let Some(reference) = queue.pop_front() {
        if visited.contains(&reference) {
            continue;
        }
        if visited.len() >= MAX_RESOLVED_SCHEMAS {
            warnings.push(format!(
                "schema alias resolution capped at {MAX_RESOLVED_SCHEMAS} schemas; remaining refs map to unknown"
            ));
            break;
        }
        visited.insert(reference.clone());

        let Some(name) = reference.strip_prefix("#/components/schemas/") else {
            continue;
        };
        let Some(ReferenceOr::Item(schema)) = components.schemas.get(name) else {
            continue;
        };

        let bare_name = pascal_case_from_ref(&reference);
        rename_map.insert(reference.clone(), bare_name.clone());

        let mut nested_refs = HashSet::new();
        let body = schema_type_literal(schema, &mut nested_refs, 0);
        aliases.insert(bare_name, body);

        for nested in nested_refs {
            if !visited.contains(&nested) {
                queue.push_back(nested);
            }
        }
    }

    ResolvedSchemas { aliases, rename_map }
}

fn substitute_schema_refs(literal: &str, rename_map: &HashMap<String, String>) -> String {
    let mut out = literal.to_string();
    for (reference, bare_name) in rename_map {
        let quoted = format!("components[\"schemas\"][\"{}\"]", reference.rsplit('/').next().unwrap_or(reference));
        out = out.replace(&quoted, bare_name);
    }
    out
}

fn build_from_raw_fallback(source_name: &str, config: &OpenApiSourceConfig, value: &serde_json::Value) -> LoadedSource {
    let mut descriptors = Vec::new();
    let runners: HashMap<String, Arc<dyn ToolRunner>> = HashMap::new();
    let client = Client::new();
    let mut runner_map = HashMap::new();

    let Some(paths) = value.get("paths").and_then(|p| p.as_object()) else {
        return LoadedSource {
            descriptors,
            runners,
            warnings: vec!["spec has no `paths` object; no tools generated".to_string()],
        };
    };

    for (raw_path, item) in paths {
        let Some(item_obj) = item.as_object() else { continue };
        for method in OPENAPI_METHODS {
            let Some(operation) = item_obj.get(method).and_then(|o| o.as_object()) else {
                continue;
            };
            let operation_id = operation
                .get("operationId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("{method}_{raw_path}"));
            let tag = operation
                .get("tags")
                .and_then(|v| v.as_array())
                .and_then(|a| a.first())
                .and_then(|v| v.as_str())
                .unwrap_or("default");
            let path = tool_path(source_name, tag, &operation_id);
            let approval = config
                .approval_overrides
                .get(&path)
                .copied()
                .unwrap_or_else(|| default_approval_for_method(method));

            let mut descriptor = ToolDescriptor::new(
                path.clone(),
                operation
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                approval,
            );
            descriptor.args_type = Some("Record<string, unknown>".to_string());
            descriptor.returns_type = Some("unknown".to_string());
            descriptor.operation_id = Some(operation_id);
            descriptors.push(descriptor);

            let method_enum = HttpMethod::parse(method).expect("method drawn from OPENAPI_METHODS");
            let runner = HttpToolRunner::new(
                client.clone(),
                config.base_url.clone(),
                raw_path.clone(),
                method_enum,
                Vec::new(),
                Vec::new(),
                HashMap::new(),
            );
            runner_map.insert(path, Arc::new(runner) as Arc<dyn ToolRunner>);
        }
    }

    LoadedSource {
        descriptors,
        runners: runner_map,
        warnings: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pascal_case_handles_dotted_and_dashed_refs() {
        assert_eq!(pascal_case_from_ref("#/components/schemas/customer.billing-address"), "CustomerBillingAddress");
    }

    #[test]
    fn render_object_literal_marks_optional_fields() {
        let fields = vec![("id".to_string(), "string".to_string(), true), ("note".to_string(), "string".to_string(), false)];
        assert_eq!(render_object_literal(&fields), "{ id: string; note?: string; }");
    }

    const MINIMAL_SPEC: &str = r#"{
        "openapi": "3.0.0",
        "info": { "title": "test", "version": "1" },
        "paths": {
            "/charges": {
                "post": {
                    "operationId": "createCharge",
                    "tags": ["payments"],
                    "responses": { "200": { "description": "ok" } }
                }
            }
        }
    }"#;

    #[tokio::test]
    async fn load_fetches_and_parses_a_remote_spec() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/spec.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(MINIMAL_SPEC)
            .create_async()
            .await;

        let config = OpenApiSourceConfig {
            spec_url: Some(format!("{}/spec.json", server.url())),
            spec_inline: None,
            base_url: server.url(),
            approval_overrides: HashMap::new(),
            allow_parse_only: false,
        };

        let loaded = load("billing", &config).await.unwrap();
        mock.assert_async().await;

        assert!(loaded.descriptors.iter().any(|d| d.path == "billing.payments.createcharge"));
        assert!(loaded.runners.contains_key("billing.payments.createcharge"));
    }

    #[tokio::test]
    async fn load_errors_when_no_spec_is_configured() {
        let config = OpenApiSourceConfig {
            spec_url: None,
            spec_inline: None,
            base_url: "https://api.example.com".to_string(),
            approval_overrides: HashMap::new(),
            allow_parse_only: false,
        };

        let err = load("billing", &config).await.unwrap_err();
        assert!(matches!(err, OpenApiLoadError::NoSpec));
    }
}
