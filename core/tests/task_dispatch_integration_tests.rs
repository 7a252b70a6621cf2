// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end exercises across the task lifecycle, dispatcher, approval gate
//! and policy resolution wired together with real in-memory adapters (no
//! mocking framework, fakes only where a process-level sandbox is required).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use codebroker_core::application::approval_gate::{ApprovalGate, ElicitDecision, Elicitor};
use codebroker_core::application::dispatcher::{DispatchContext, DispatchError, DispatchRequest, Dispatcher};
use codebroker_core::application::task_service::TaskService;
use codebroker_core::application::tool_registry::ToolRegistry;
use codebroker_core::application::typechecker::{Checker, NullChecker, RawDiagnostic};
use codebroker_core::domain::approval::CallId;
use codebroker_core::domain::policy::{AccessPolicy, PolicyDecision};
use codebroker_core::domain::runtime::{InstanceId, InstanceStatus, SandboxConfig, SandboxError, SandboxInput, SandboxOutput, SandboxRuntime};
use codebroker_core::domain::task::{TaskId, TaskOrigin, TaskStatus};
use codebroker_core::domain::tool::{ApprovalRequirement, ToolDescriptor, ToolRunError, ToolRunner};
use codebroker_core::infrastructure::event_bus::EventBus;
use codebroker_core::infrastructure::repositories::in_memory::{InMemoryApprovalRepository, InMemoryPolicyRepository, InMemoryTaskRepository};

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

struct AlwaysFailingChecker;

#[async_trait]
impl Checker for AlwaysFailingChecker {
    async fn check(&self, _checked_unit: &str) -> Vec<RawDiagnostic> {
        vec![RawDiagnostic {
            line: Some(6),
            message: "Property 'total' does not exist on type '{ result: number }'.".to_string(),
        }]
    }
}

struct ExitingRuntime {
    exit_code: i32,
}

#[async_trait]
impl SandboxRuntime for ExitingRuntime {
    async fn spawn(&self, _config: &SandboxConfig) -> Result<InstanceId, SandboxError> {
        Ok(InstanceId("integration".to_string()))
    }

    async fn execute(&self, _instance: &InstanceId, _input: SandboxInput) -> Result<SandboxOutput, SandboxError> {
        Ok(SandboxOutput {
            exit_code: self.exit_code,
            stdout: "result: 3".to_string(),
            stderr: String::new(),
        })
    }

    async fn terminate(&self, _instance: &InstanceId) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn status(&self, _instance: &InstanceId) -> Result<InstanceStatus, SandboxError> {
        Ok(InstanceStatus::Exited)
    }
}

fn origin() -> TaskOrigin {
    TaskOrigin {
        workspace_id: "default".to_string(),
        actor_id: None,
        client_id: Some("integration".to_string()),
    }
}

/// Seed scenario 1 (happy path): a task that typechecks cleanly runs to
/// completion through the real `TaskService` against an in-memory repository.
#[tokio::test]
async fn happy_path_completes_with_the_sandbox_output() {
    let service = TaskService::new(
        Arc::new(InMemoryTaskRepository::new()),
        Arc::new(ToolRegistry::new()),
        Arc::new(NullChecker),
        Arc::new(ExitingRuntime { exit_code: 0 }),
        Arc::new(EventBus::with_default_capacity()),
        Arc::new(InMemoryPolicyRepository::new()),
        Arc::new(InMemoryApprovalRepository::new()),
        None,
    );

    let task = service
        .submit(origin(), "const r = await tools.math.add({a:1,b:2}); return r.result;".to_string(), Some(5_000), None, HashMap::new())
        .await
        .unwrap()
        .unwrap();

    let task = service.execute(task).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.stdout.contains("result: 3"));
}

/// Seed scenario 2 (type error): a checker that reports a diagnostic stops
/// submission before a task row is ever created.
#[tokio::test]
async fn type_error_blocks_task_creation() {
    let tasks = Arc::new(InMemoryTaskRepository::new());
    let service = TaskService::new(
        tasks.clone(),
        Arc::new(ToolRegistry::new()),
        Arc::new(AlwaysFailingChecker),
        Arc::new(ExitingRuntime { exit_code: 0 }),
        Arc::new(EventBus::with_default_capacity()),
        Arc::new(InMemoryPolicyRepository::new()),
        Arc::new(InMemoryApprovalRepository::new()),
        None,
    );

    let outcome = service
        .submit(origin(), "tools.math.add({a:\"x\",b:2})".to_string(), None, None, HashMap::new())
        .await
        .unwrap();

    let check = outcome.unwrap_err();
    assert!(!check.ok);
    assert!(!check.errors.is_empty());
}

/// Seed scenario 4 (policy deny): the dispatcher rejects a call matched by a
/// `deny` rule before the runner ever sees it.
#[tokio::test]
async fn policy_deny_rejects_the_call_before_invocation() {
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
    let context = DispatchContext {
        workspace_id: "default",
        actor_id: None,
        client_id: None,
        credential_headers: &headers,
    };
    let request = DispatchRequest {
        run_id,
        call_id: CallId::new(),
        tool_path: "stripe.customers.create".to_string(),
        input: serde_json::json!({"email": "a@example.com"}),
    };

    let err = dispatcher
        .dispatch(request, &context, None, &policies, Some(Arc::new(EchoRunner)))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::PolicyDenied(_)));
}

/// Seed scenario 3 (approval-required denied): a tool descriptor that
/// requires approval, refused via in-band elicitation, surfaces a denial
/// with no runner invocation.
#[tokio::test]
async fn approval_required_tool_is_denied_end_to_end() {
    let run_id = TaskId::new();
    let approvals = Arc::new(InMemoryApprovalRepository::new());
    let gate = Arc::new(ApprovalGate::new(approvals.clone(), Some(Arc::new(FixedElicitor(ElicitDecision::Denied)))));
    let dispatcher = Dispatcher::new(run_id, approvals, gate);

    let descriptor = ToolDescriptor {
        path: "admin.send_announcement".to_string(),
        description: "Broadcast an announcement".to_string(),
        approval: ApprovalRequirement::Required,
        args_type: None,
        returns_type: None,
        operation_id: None,
        schema_types: None,
        delegates_to: None,
    };

    let headers = HashMap::new();
    let context = DispatchContext {
        workspace_id: "default",
        actor_id: None,
        client_id: None,
        credential_headers: &headers,
    };
    let request = DispatchRequest {
        run_id,
        call_id: CallId::new(),
        tool_path: "admin.send_announcement".to_string(),
        input: serde_json::json!({"text": "maintenance window"}),
    };

    let err = dispatcher
        .dispatch(request, &context, Some(&descriptor), &[], Some(Arc::new(EchoRunner)))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::ApprovalDenied(_)));
}

/// Seed scenario 5 (timeout): a sandbox that never returns is raced against
/// the task's deadline and the task lands in `timed_out`, not stuck forever.
#[tokio::test]
async fn timeout_tears_down_a_hung_sandbox() {
    struct HangingRuntime;

    #[async_trait]
    impl SandboxRuntime for HangingRuntime {
        async fn spawn(&self, _config: &SandboxConfig) -> Result<InstanceId, SandboxError> {
            Ok(InstanceId("hang".to_string()))
        }

        async fn execute(&self, _instance: &InstanceId, _input: SandboxInput) -> Result<SandboxOutput, SandboxError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }

        async fn terminate(&self, _instance: &InstanceId) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn status(&self, _instance: &InstanceId) -> Result<InstanceStatus, SandboxError> {
            Ok(InstanceStatus::Running)
        }
    }

    let service = TaskService::new(
        Arc::new(InMemoryTaskRepository::new()),
        Arc::new(ToolRegistry::new()),
        Arc::new(NullChecker),
        Arc::new(HangingRuntime),
        Arc::new(EventBus::with_default_capacity()),
        Arc::new(InMemoryPolicyRepository::new()),
        Arc::new(InMemoryApprovalRepository::new()),
        None,
    );

    let task = service
        .submit(origin(), "while(true){}".to_string(), Some(50), None, HashMap::new())
        .await
        .unwrap()
        .unwrap();

    let task = service.execute(task).await.unwrap();
    assert_eq!(task.status, TaskStatus::TimedOut);
}
