// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP tool runner — the `run(input, context)` closure semantics behind
//! every OpenAPI-sourced tool: path substitution, query placement, JSON
//! body, auth header merge, response parsing.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::domain::tool::{ToolRunError, ToolRunner};

const BODY_EXCERPT_BYTES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn parse(method: &str) -> Option<Self> {
        Some(match method {
            "get" => Self::Get,
            "post" => Self::Post,
            "put" => Self::Put,
            "delete" => Self::Delete,
            "patch" => Self::Patch,
            "head" => Self::Head,
            "options" => Self::Options,
            _ => return None,
        })
    }

    fn is_read(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options)
    }

    fn as_reqwest(&self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Patch => reqwest::Method::PATCH,
            Self::Head => reqwest::Method::HEAD,
            Self::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// A single OpenAPI operation made callable. `path_params`/`query_params`
/// name the declared parameters of each kind; any input key not claimed by
/// one of them (and not a read method) becomes the JSON body.
pub struct HttpToolRunner {
    client: Client,
    base_url: String,
    path_template: String,
    method: HttpMethod,
    path_params: Vec<String>,
    query_params: Vec<String>,
    static_headers: HashMap<String, String>,
}

impl HttpToolRunner {
    pub fn new(
        client: Client,
        base_url: String,
        path_template: String,
        method: HttpMethod,
        path_params: Vec<String>,
        query_params: Vec<String>,
        static_headers: HashMap<String, String>,
    ) -> Self {
        Self {
            client,
            base_url,
            path_template,
            method,
            path_params,
            query_params,
            static_headers,
        }
    }

    fn build_path(&self, input: &Map<String, Value>) -> String {
        let mut path = self.path_template.clone();
        for name in &self.path_params {
            if let Some(value) = input.get(name) {
                let raw = value_to_path_segment(value);
                let encoded = urlencoding_segment(&raw);
                path = path.replace(&format!("{{{name}}}"), &encoded);
            }
        }
        path
    }
}

fn value_to_path_segment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Percent-encodes everything outside `[A-Za-z0-9_.~-]`, matching the set a
/// URL path segment permits unescaped.
fn urlencoding_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'~' | b'-' => out.push(*byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[async_trait]
impl ToolRunner for HttpToolRunner {
    async fn run(&self, input: Value, credential_headers: &HashMap<String, String>) -> Result<Value, ToolRunError> {
        let input_obj = match input {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        let path = self.build_path(&input_obj);
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let mut request = self.client.request(self.method.as_reqwest(), &url);

        let mut residual = input_obj.clone();
        for name in &self.path_params {
            residual.remove(name);
        }

        let mut query_pairs: Vec<(String, String)> = Vec::new();
        for name in &self.query_params {
            if let Some(value) = residual.remove(name) {
                query_pairs.push((name.clone(), value_to_path_segment(&value)));
            }
        }
        if !query_pairs.is_empty() {
            request = request.query(&query_pairs);
        }

        if !self.method.is_read() && !residual.is_empty() {
            request = request.json(&Value::Object(residual));
        }

        for (key, value) in &self.static_headers {
            request = request.header(key, value);
        }
        for (key, value) in credential_headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolRunError::Transport(e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(BODY_EXCERPT_BYTES).collect();
            return Err(ToolRunError::Http {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                body_excerpt: excerpt,
            });
        }

        if content_type.contains("application/json") || content_type.contains("+json") {
            response
                .json::<Value>()
                .await
                .map_err(|e| ToolRunError::Transport(e.to_string()))
        } else {
            let text = response.text().await.map_err(|e| ToolRunError::Transport(e.to_string()))?;
            Ok(Value::String(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_substitution_url_encodes_segments() {
        let runner = HttpToolRunner::new(
            Client::new(),
            "https://api.example.com".into(),
            "/customers/{id}".into(),
            HttpMethod::Get,
            vec!["id".into()],
            vec![],
            HashMap::new(),
        );
        let mut input = Map::new();
        input.insert("id".into(), Value::String("cus 123".into()));
        assert_eq!(runner.build_path(&input), "/customers/cus%20123");
    }

    #[tokio::test]
    async fn run_posts_the_residual_body_and_merges_credential_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/charges")
            .match_header("authorization", "Bearer test-token")
            .match_body(mockito::Matcher::Json(serde_json::json!({"amount": 100})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "ch_1"}"#)
            .create_async()
            .await;

        let runner = HttpToolRunner::new(
            Client::new(),
            server.url(),
            "/charges".into(),
            HttpMethod::Post,
            vec![],
            vec![],
            HashMap::new(),
        );

        let mut credential_headers = HashMap::new();
        credential_headers.insert("Authorization".to_string(), "Bearer test-token".to_string());

        let result = runner
            .run(serde_json::json!({"amount": 100}), &credential_headers)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result, serde_json::json!({"id": "ch_1"}));
    }

    #[tokio::test]
    async fn run_maps_a_non_success_status_to_a_descriptive_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/customers/cus_1")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let runner = HttpToolRunner::new(
            Client::new(),
            server.url(),
            "/customers/{id}".into(),
            HttpMethod::Get,
            vec!["id".into()],
            vec![],
            HashMap::new(),
        );

        let mut input = Map::new();
        input.insert("id".into(), Value::String("cus_1".into()));
        let err = runner.run(Value::Object(input), &HashMap::new()).await.unwrap_err();

        match err {
            ToolRunError::Http { status, .. } => assert_eq!(status, 404),
            other => panic!("expected an Http error, got {other:?}"),
        }
    }
}
