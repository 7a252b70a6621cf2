// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Dispatcher — the boundary between a running task's sandboxed code and the
//! outside world. Every tool call the sandbox makes passes through here:
//! run-mismatch fencing, policy evaluation, approval, invocation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::application::approval_gate::ApprovalGate;
use crate::application::tool_registry::ToolRegistry;
use crate::domain::approval::{Approval, CallId};
use crate::domain::policy::{resolve_policy, AccessPolicy, PolicyDecision};
use crate::domain::repository::{ApprovalRepository, PolicyRepository};
use crate::domain::runtime::{ToolCallHandler, ToolCallOutcome, ToolCallRequest};
use crate::domain::task::TaskId;
use crate::domain::tool::{ApprovalRequirement, ToolDescriptor, ToolRunError};

/// Sentinel prefix the sandbox uses to distinguish a policy/approval denial
/// from an ordinary tool failure, so it can map the former to task status
/// `denied` instead of `failed`. Defined in [`crate::domain::runtime`] so
/// both this module and the infrastructure-layer sandbox adapters can see it
/// without a dependency cycle; re-exported here since this is where callers
/// have always imported it from.
pub use crate::domain::runtime::APPROVAL_DENIED_PREFIX;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Run mismatch")]
    RunMismatch,
    /// An access policy rejected the call outright. Deliberately not
    /// prefixed with [`APPROVAL_DENIED_PREFIX`] — a policy deny and a real
    /// approval refusal surface as different task statuses downstream.
    #[error("denied by access policy: {0}")]
    PolicyDenied(String),
    /// A human refused an in-flight approval request.
    #[error("{APPROVAL_DENIED_PREFIX}{0}")]
    ApprovalDenied(String),
    #[error("recording the approval request failed: {0}")]
    ApprovalRecordFailed(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("tool invocation failed: {0}")]
    ToolFailed(#[from] ToolRunError),
}

pub struct DispatchRequest {
    pub run_id: TaskId,
    pub call_id: CallId,
    pub tool_path: String,
    pub input: Value,
}

pub struct DispatchContext<'a> {
    pub workspace_id: &'a str,
    pub actor_id: Option<&'a str>,
    pub client_id: Option<&'a str>,
    pub credential_headers: &'a HashMap<String, String>,
}

pub struct Dispatcher {
    bound_task: TaskId,
    approvals: Arc<dyn ApprovalRepository>,
    approval_gate: Arc<ApprovalGate>,
}

impl Dispatcher {
    pub fn new(bound_task: TaskId, approvals: Arc<dyn ApprovalRepository>, approval_gate: Arc<ApprovalGate>) -> Self {
        Self {
            bound_task,
            approvals,
            approval_gate,
        }
    }

    pub async fn dispatch(
        &self,
        request: DispatchRequest,
        context: &DispatchContext<'_>,
        descriptor: Option<&ToolDescriptor>,
        policies: &[AccessPolicy],
        runner: Option<Arc<dyn crate::domain::tool::ToolRunner>>,
    ) -> Result<Value, DispatchError> {
        if request.run_id != self.bound_task {
            return Err(DispatchError::RunMismatch);
        }

        let mut decision = resolve_policy(
            policies,
            context.workspace_id,
            context.actor_id,
            context.client_id,
            &request.tool_path,
        )
        .map(|p| p.decision)
        .unwrap_or(PolicyDecision::Allow);

        if decision == PolicyDecision::Allow {
            if let Some(descriptor) = descriptor {
                if descriptor.approval == ApprovalRequirement::Required {
                    decision = PolicyDecision::RequireApproval;
                }
            }
        }

        match decision {
            PolicyDecision::Deny => return Err(DispatchError::PolicyDenied(request.tool_path.clone())),
            PolicyDecision::RequireApproval => {
                let approval = Approval::new(request.run_id, request.call_id, request.tool_path.clone(), request.input.clone());
                let approval_id = approval.id;
                self.approvals.save(&approval).await.map_err(|e| DispatchError::ApprovalRecordFailed(e.to_string()))?;

                let resolved = self
                    .approval_gate
                    .await_decision(approval_id, &request.tool_path, &request.input)
                    .await;

                if resolved != crate::domain::approval::ApprovalStatus::Approved {
                    return Err(DispatchError::ApprovalDenied(format!("approval denied for {}", request.tool_path)));
                }
            }
            PolicyDecision::Allow => {}
        }

        let runner = runner.ok_or_else(|| DispatchError::ToolNotFound(request.tool_path.clone()))?;
        let empty_headers = HashMap::new();
        let headers = if context.credential_headers.is_empty() {
            &empty_headers
        } else {
            context.credential_headers
        };
        runner.run(request.input, headers).await.map_err(DispatchError::from)
    }
}

/// Bridges a running sandbox instance's tool-call wire protocol to a
/// `Dispatcher` bound to the task it belongs to. One instance per task
/// execution, built fresh by `TaskService` so the dispatcher's run-id
/// fencing is scoped correctly.
pub struct DispatchHandler {
    dispatcher: Dispatcher,
    tools: Arc<ToolRegistry>,
    policies: Arc<dyn PolicyRepository>,
    workspace_id: String,
    actor_id: Option<String>,
    client_id: Option<String>,
    credential_headers: HashMap<String, String>,
}

impl DispatchHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dispatcher: Dispatcher,
        tools: Arc<ToolRegistry>,
        policies: Arc<dyn PolicyRepository>,
        workspace_id: String,
        actor_id: Option<String>,
        client_id: Option<String>,
        credential_headers: HashMap<String, String>,
    ) -> Self {
        Self {
            dispatcher,
            tools,
            policies,
            workspace_id,
            actor_id,
            client_id,
            credential_headers,
        }
    }
}

#[async_trait::async_trait]
impl ToolCallHandler for DispatchHandler {
    async fn handle(&self, request: ToolCallRequest) -> ToolCallOutcome {
        let Ok(run_id_uuid) = uuid::Uuid::parse_str(&request.run_id) else {
            return ToolCallOutcome::Failed { error: "malformed run id on tool call".to_string() };
        };
        let run_id = TaskId(run_id_uuid);

        let descriptor = self.tools.list_tools(&self.workspace_id).into_iter().find(|d| d.path == request.tool_path);
        let runner = self.tools.runner_for(&self.workspace_id, &request.tool_path);
        let policies = self.policies.list_for_workspace(&self.workspace_id).await.unwrap_or_default();

        let context = DispatchContext {
            workspace_id: &self.workspace_id,
            actor_id: self.actor_id.as_deref(),
            client_id: self.client_id.as_deref(),
            credential_headers: &self.credential_headers,
        };
        let dispatch_request = DispatchRequest {
            run_id,
            call_id: CallId::new(),
            tool_path: request.tool_path.clone(),
            input: request.input.clone(),
        };

        match self
            .dispatcher
            .dispatch(dispatch_request, &context, descriptor.as_ref(), &policies, runner)
            .await
        {
            Ok(value) => ToolCallOutcome::Ok { value },
            Err(DispatchError::PolicyDenied(reason)) => ToolCallOutcome::Failed { error: format!("denied by access policy: {reason}") },
            Err(DispatchError::ApprovalDenied(reason)) => ToolCallOutcome::Denied { reason },
            Err(other) => ToolCallOutcome::Failed { error: other.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::approval_gate::{ElicitDecision, Elicitor};
    use crate::domain::approval::CallId;
    use crate::domain::tool::ToolRunner;
    use crate::infrastructure::repositories::in_memory::InMemoryApprovalRepository;
    use async_trait::async_trait;

    struct EchoRunner;

    #[async_trait]
    impl ToolRunner for EchoRunner {
        async fn run(&self, input: Value, _headers: &HashMap<String, String>) -> Result<Value, ToolRunError> {
            Ok(input)
        }
    }

    struct FixedElicitor(ElicitDecision);

    #[async_trait]
    impl Elicitor for FixedElicitor {
        async fn elicit(&self, _tool_path: &str, _input: &Value) -> Result<ElicitDecision, String> {
            Ok(self.0)
        }
    }

    fn context<'a>(headers: &'a HashMap<String, String>) -> DispatchContext<'a> {
        DispatchContext {
            workspace_id: "default",
            actor_id: None,
            client_id: None,
            credential_headers: headers,
        }
    }

    fn request(run_id: TaskId) -> DispatchRequest {
        DispatchRequest {
            run_id,
            call_id: CallId::new(),
            tool_path: "stripe.charges.create".to_string(),
            input: serde_json::json!({"amount": 100}),
        }
    }

    #[tokio::test]
    async fn rejects_calls_with_a_mismatched_run_id() {
        let approvals = Arc::new(InMemoryApprovalRepository::new());
        let gate = Arc::new(ApprovalGate::new(approvals.clone(), None));
        let dispatcher = Dispatcher::new(TaskId::new(), approvals, gate);

        let headers = HashMap::new();
        let err = dispatcher
            .dispatch(request(TaskId::new()), &context(&headers), None, &[], Some(Arc::new(EchoRunner)))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::RunMismatch));
    }

    #[tokio::test]
    async fn denies_calls_matched_by_a_deny_policy() {
        let run_id = TaskId::new();
        let approvals = Arc::new(InMemoryApprovalRepository::new());
        let gate = Arc::new(ApprovalGate::new(approvals.clone(), None));
        let dispatcher = Dispatcher::new(run_id, approvals, gate);

        let policies = [AccessPolicy {
            workspace_id: "default".to_string(),
            actor_id: None,
            client_id: None,
            tool_path_pattern: "stripe.**".to_string(),
            decision: PolicyDecision::Deny,
            priority: 0,
        }];

        let headers = HashMap::new();
        let err = dispatcher
            .dispatch(request(run_id), &context(&headers), None, &policies, Some(Arc::new(EchoRunner)))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::PolicyDenied(_)));
    }

    #[tokio::test]
    async fn runs_the_tool_when_approval_is_granted() {
        let run_id = TaskId::new();
        let approvals = Arc::new(InMemoryApprovalRepository::new());
        let gate = Arc::new(ApprovalGate::new(approvals.clone(), Some(Arc::new(FixedElicitor(ElicitDecision::Approved)))));
        let dispatcher = Dispatcher::new(run_id, approvals, gate);

        let descriptor = ToolDescriptor {
            path: "stripe.charges.create".to_string(),
            description: String::new(),
            approval: ApprovalRequirement::Required,
            args_type: None,
            returns_type: None,
            operation_id: None,
            schema_types: None,
            delegates_to: None,
        };

        let headers = HashMap::new();
        let result = dispatcher
            .dispatch(request(run_id), &context(&headers), Some(&descriptor), &[], Some(Arc::new(EchoRunner)))
            .await
            .unwrap();

        assert_eq!(result, serde_json::json!({"amount": 100}));
    }

    #[tokio::test]
    async fn denies_the_tool_when_approval_is_refused() {
        let run_id = TaskId::new();
        let approvals = Arc::new(InMemoryApprovalRepository::new());
        let gate = Arc::new(ApprovalGate::new(approvals.clone(), Some(Arc::new(FixedElicitor(ElicitDecision::Denied)))));
        let dispatcher = Dispatcher::new(run_id, approvals, gate);

        let descriptor = ToolDescriptor {
            path: "stripe.charges.create".to_string(),
            description: String::new(),
            approval: ApprovalRequirement::Required,
            args_type: None,
            returns_type: None,
            operation_id: None,
            schema_types: None,
            delegates_to: None,
        };

        let headers = HashMap::new();
        let err = dispatcher
            .dispatch(request(run_id), &context(&headers), Some(&descriptor), &[], Some(Arc::new(EchoRunner)))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::ApprovalDenied(_)));
    }
}
