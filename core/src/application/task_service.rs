// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task lifecycle orchestration: typecheck-then-create, execute against the
//! sandbox runtime, and wait-for-terminal polling/subscription.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::application::approval_gate::{ApprovalGate, Elicitor};
use crate::application::dispatcher::{DispatchHandler, Dispatcher};
use crate::application::tool_registry::ToolRegistry;
use crate::application::typechecker::{typecheck_code, Checker, TypecheckResult};
use crate::domain::event::LiveTaskEvent;
use crate::domain::repository::{ApprovalRepository, PolicyRepository, RepositoryError, TaskRepository};
use crate::domain::runtime::{SandboxConfig, SandboxError, SandboxInput, SandboxRuntime, ToolCallHandler};
use crate::domain::task::{Task, TaskError, TaskId, TaskOrigin};
use crate::infrastructure::event_bus::EventBus;

const POLL_INTERVAL: Duration = Duration::from_millis(400);

#[derive(Debug, Error)]
pub enum TaskServiceError {
    #[error("type error: {0}")]
    TypeError(String),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    tools: Arc<ToolRegistry>,
    checker: Arc<dyn Checker>,
    runtime: Arc<dyn SandboxRuntime>,
    events: Arc<EventBus>,
    policies: Arc<dyn PolicyRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    elicitor: Option<Arc<dyn Elicitor>>,
}

impl TaskService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        tools: Arc<ToolRegistry>,
        checker: Arc<dyn Checker>,
        runtime: Arc<dyn SandboxRuntime>,
        events: Arc<EventBus>,
        policies: Arc<dyn PolicyRepository>,
        approvals: Arc<dyn ApprovalRepository>,
        elicitor: Option<Arc<dyn Elicitor>>,
    ) -> Self {
        Self {
            tasks,
            tools,
            checker,
            runtime,
            events,
            policies,
            approvals,
            elicitor,
        }
    }

    /// Typechecks the submitted code; on a type error, no task is created and
    /// the diagnostic text is returned directly to the caller.
    pub async fn submit(
        &self,
        origin: TaskOrigin,
        code: String,
        timeout_ms: Option<u64>,
        runtime_id: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Result<Task, TypecheckResult>, TaskServiceError> {
        let (tools, _dts_urls) = self.tools.list_tools_for_typecheck(&origin.workspace_id);
        let check = typecheck_code(&code, &tools, self.checker.as_ref()).await;
        if !check.ok {
            return Ok(Err(check));
        }

        let task = Task::new(origin, code, timeout_ms, runtime_id, metadata)?;
        self.tasks.save(&task).await?;
        Ok(Ok(task))
    }

    /// Runs a queued task to completion: spawn, execute (raced against the
    /// task's timeout), persist the terminal state, publish the event.
    pub async fn execute(&self, mut task: Task) -> Result<Task, TaskServiceError> {
        task.start()?;
        self.tasks.save(&task).await?;
        self.events.publish(LiveTaskEvent::new(
            task.id,
            "status_changed",
            serde_json::json!({ "status": "running" }),
        ));

        let config = SandboxConfig {
            runtime_id: task.runtime_id.clone().unwrap_or_else(|| "default".to_string()),
            resources: Default::default(),
            timeout_ms: task.timeout_ms,
        };

        let outcome = tokio::time::timeout(Duration::from_millis(task.timeout_ms), self.run_to_completion(&task, &config)).await;

        match outcome {
            Ok(Ok(output)) => {
                if let Some(reason) = output.stderr.strip_prefix(crate::application::dispatcher::APPROVAL_DENIED_PREFIX) {
                    task.deny(reason.to_string(), output.stdout, output.stderr.clone())?;
                } else if output.exit_code == 0 {
                    task.complete(output.exit_code, output.stdout, output.stderr)?;
                } else {
                    task.fail(format!("exited with status {}", output.exit_code), output.stdout, output.stderr)?;
                }
            }
            Ok(Err(err)) => task.fail(err.to_string(), String::new(), String::new())?,
            Err(_) => task.time_out("sandbox execution exceeded its deadline".to_string(), String::new(), String::new())?,
        }

        self.tasks.save(&task).await?;
        self.events.publish(LiveTaskEvent::new(
            task.id,
            "status_changed",
            serde_json::json!({ "status": task.status.to_string() }),
        ));

        metrics::counter!("codebroker_tasks_total", "status" => task.status.to_string()).increment(1);
        if let Some(started) = task.started_at {
            let elapsed = (chrono::Utc::now() - started).num_milliseconds().max(0) as f64;
            metrics::histogram!("codebroker_task_duration_ms").record(elapsed);
        }

        Ok(task)
    }

    async fn run_to_completion(&self, task: &Task, config: &SandboxConfig) -> Result<crate::domain::runtime::SandboxOutput, SandboxError> {
        let gate = Arc::new(ApprovalGate::new(self.approvals.clone(), self.elicitor.clone()));
        let dispatcher = Dispatcher::new(task.id, self.approvals.clone(), gate);
        let handler: Arc<dyn ToolCallHandler> = Arc::new(DispatchHandler::new(
            dispatcher,
            self.tools.clone(),
            self.policies.clone(),
            task.origin.workspace_id.clone(),
            task.origin.actor_id.clone(),
            task.origin.client_id.clone(),
            HashMap::new(),
        ));

        let instance = self.runtime.spawn(config).await?;
        let result = self
            .runtime
            .execute(&instance, SandboxInput { run_id: task.id.to_string(), code: task.code.clone(), handler })
            .await;
        let _ = self.runtime.terminate(&instance).await;
        result
    }

    /// Polls until the task reaches a terminal status or `result_timeout_ms`
    /// elapses, returning whatever state is current either way.
    pub async fn wait_for_terminal(&self, task_id: TaskId, result_timeout_ms: u64) -> Result<Option<Task>, TaskServiceError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(result_timeout_ms);
        loop {
            let task = self.tasks.find_by_id(task_id).await?;
            if let Some(task) = &task {
                if task.is_terminal() {
                    return Ok(Some(task.clone()));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(task);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::runtime::{InstanceStatus, ResourceLimits};
    use crate::infrastructure::repositories::in_memory::InMemoryTaskRepository;
    use async_trait::async_trait;

    struct FakeRuntime {
        exit_code: i32,
        stderr: String,
        hang: bool,
    }

    #[async_trait]
    impl SandboxRuntime for FakeRuntime {
        async fn spawn(&self, _config: &SandboxConfig) -> Result<crate::domain::runtime::InstanceId, SandboxError> {
            Ok(crate::domain::runtime::InstanceId("fake".to_string()))
        }

        async fn execute(
            &self,
            _instance: &crate::domain::runtime::InstanceId,
            _input: SandboxInput,
        ) -> Result<crate::domain::runtime::SandboxOutput, SandboxError> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(crate::domain::runtime::SandboxOutput {
                exit_code: self.exit_code,
                stdout: String::new(),
                stderr: self.stderr.clone(),
            })
        }

        async fn terminate(&self, _instance: &crate::domain::runtime::InstanceId) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn status(&self, _instance: &crate::domain::runtime::InstanceId) -> Result<InstanceStatus, SandboxError> {
            Ok(InstanceStatus::Exited)
        }
    }

    fn origin() -> TaskOrigin {
        TaskOrigin {
            workspace_id: "default".to_string(),
            actor_id: None,
            client_id: Some("test".to_string()),
        }
    }

    fn service(runtime: FakeRuntime) -> TaskService {
        TaskService::new(
            Arc::new(InMemoryTaskRepository::new()),
            Arc::new(ToolRegistry::new()),
            Arc::new(crate::application::typechecker::NullChecker),
            Arc::new(runtime),
            Arc::new(EventBus::with_default_capacity()),
            Arc::new(crate::infrastructure::repositories::in_memory::InMemoryPolicyRepository::new()),
            Arc::new(crate::infrastructure::repositories::in_memory::InMemoryApprovalRepository::new()),
            None,
        )
    }

    #[tokio::test]
    async fn execute_completes_on_zero_exit() {
        let svc = service(FakeRuntime { exit_code: 0, stderr: String::new(), hang: false });
        let task = svc
            .submit(origin(), "return 1;".into(), None, None, HashMap::new())
            .await
            .unwrap()
            .unwrap();
        let task = svc.execute(task).await.unwrap();
        assert!(matches!(task.status, crate::domain::task::TaskStatus::Completed));
        assert_eq!(task.exit_code, Some(0));
    }

    #[tokio::test]
    async fn execute_fails_on_nonzero_exit() {
        let svc = service(FakeRuntime { exit_code: 1, stderr: "boom".into(), hang: false });
        let task = svc
            .submit(origin(), "throw new Error('x');".into(), None, None, HashMap::new())
            .await
            .unwrap()
            .unwrap();
        let task = svc.execute(task).await.unwrap();
        assert!(matches!(task.status, crate::domain::task::TaskStatus::Failed));
    }

    #[tokio::test]
    async fn execute_denies_on_approval_denied_sentinel() {
        let stderr = format!("{}nope", crate::application::dispatcher::APPROVAL_DENIED_PREFIX);
        let svc = service(FakeRuntime { exit_code: 1, stderr, hang: false });
        let task = svc
            .submit(origin(), "tools.stripe.charge({});".into(), None, None, HashMap::new())
            .await
            .unwrap()
            .unwrap();
        let task = svc.execute(task).await.unwrap();
        assert!(matches!(task.status, crate::domain::task::TaskStatus::Denied));
    }

    #[tokio::test]
    async fn execute_times_out_when_sandbox_hangs() {
        let svc = service(FakeRuntime { exit_code: 0, stderr: String::new(), hang: true });
        let task = svc
            .submit(origin(), "while (true) {}".into(), Some(50), None, HashMap::new())
            .await
            .unwrap()
            .unwrap();
        let task = svc.execute(task).await.unwrap();
        assert!(matches!(task.status, crate::domain::task::TaskStatus::TimedOut));
    }

    #[tokio::test]
    async fn wait_for_terminal_returns_current_state_after_deadline() {
        let svc = service(FakeRuntime { exit_code: 0, stderr: String::new(), hang: false });
        let task = svc
            .submit(origin(), "return 1;".into(), None, None, HashMap::new())
            .await
            .unwrap()
            .unwrap();
        // Still queued, never executed: wait_for_terminal should give up at
        // the deadline and return the non-terminal task rather than hang.
        let result = svc.wait_for_terminal(task.id, 50).await.unwrap();
        assert!(result.is_some());
        assert!(!result.unwrap().is_terminal());
    }
}
