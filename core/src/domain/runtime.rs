// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The sandbox runtime boundary.
//!
//! The sandbox is a dispatcher, not an isolate — escaping prevention is
//! delegated to whatever concrete runtime implements this trait. This module
//! only specifies the adapter contract and the resource envelope around it;
//! internal isolation guarantees are out of scope.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel prefix a denial — policy or approval — is wrapped in when it
/// crosses the sandbox boundary as stderr, so `TaskService` can tell a
/// denial apart from an ordinary failure without inspecting error types.
pub const APPROVAL_DENIED_PREFIX: &str = "APPROVAL_DENIED: ";

/// Sentinel prefix a stdout line carries when it's a tool-call request from
/// the sandboxed process, rather than ordinary program output.
pub const TOOL_CALL_PREFIX: &str = "__codebroker_tool_call__ ";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_millis: 1_000,
            memory_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub runtime_id: String,
    pub resources: ResourceLimits,
    pub timeout_ms: u64,
}

/// What's handed to a runtime's `execute`: the code to run, the task it
/// belongs to (threaded into every tool call the code makes), and the
/// handler that routes those tool calls back to the dispatcher.
#[derive(Clone)]
pub struct SandboxInput {
    pub run_id: String,
    pub code: String,
    pub handler: Arc<dyn ToolCallHandler>,
}

impl std::fmt::Debug for SandboxInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxInput")
            .field("run_id", &self.run_id)
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Running,
    Exited,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(pub String);

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to spawn sandbox instance: {0}")]
    SpawnFailed(String),
    #[error("sandbox execution failed: {0}")]
    ExecutionFailed(String),
    #[error("sandbox instance not found: {0}")]
    InstanceNotFound(String),
    #[error("sandbox execution exceeded its deadline")]
    TimedOut,
}

/// One call the dispatcher makes into the running sandbox instance's tool
/// proxy. The instance marshals this to the dispatcher and awaits the reply
/// before the user's code advances — tool calls within a task are therefore
/// serialized through the user's code, never reordered by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Populated by the runtime adapter from its `SandboxInput`, not by the
    /// sandboxed process itself — the wire line it sends carries only
    /// `call_id`/`tool_path`/`input`.
    #[serde(default)]
    pub run_id: String,
    pub call_id: String,
    pub tool_path: String,
    pub input: serde_json::Value,
}

/// What the dispatcher hands back across the sandbox boundary for one tool
/// call, encoded over the wire as `{"kind": "ok" | "denied" | "failed", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolCallOutcome {
    Ok { value: serde_json::Value },
    Denied { reason: String },
    Failed { error: String },
}

/// Routes one tool call made by a running sandbox instance back to the
/// dispatcher and returns its outcome. Implemented in the application layer
/// over a `Dispatcher` bound to the task the instance is executing.
#[async_trait]
pub trait ToolCallHandler: Send + Sync {
    async fn handle(&self, request: ToolCallRequest) -> ToolCallOutcome;
}

/// The adapter contract a concrete sandbox implementation must satisfy.
/// A Docker-backed implementation is the default production adapter; a
/// bare-process implementation exists for local and test use.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn spawn(&self, config: &SandboxConfig) -> Result<InstanceId, SandboxError>;
    async fn execute(&self, instance: &InstanceId, input: SandboxInput) -> Result<SandboxOutput, SandboxError>;
    async fn terminate(&self, instance: &InstanceId) -> Result<(), SandboxError>;
    async fn status(&self, instance: &InstanceId) -> Result<InstanceStatus, SandboxError>;
}
