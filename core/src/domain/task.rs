// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task aggregate — the durable unit of code execution.
//!
//! A task moves `queued -> running -> {completed|failed|timed_out|denied}`.
//! Terminal states are sinks; only the task's own executor writes to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Lower bound on `timeoutMs`.
pub const MIN_TIMEOUT_MS: u64 = 1;
/// Upper bound on `timeoutMs`.
pub const MAX_TIMEOUT_MS: u64 = 600_000;
/// Default `timeoutMs` when the caller does not supply one.
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Denied,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::TimedOut | TaskStatus::Denied
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Denied => "denied",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid task state transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("task is already terminal ({0})")]
    AlreadyTerminal(TaskStatus),

    #[error("timeoutMs {0} is out of bounds [{MIN_TIMEOUT_MS}, {MAX_TIMEOUT_MS}]")]
    TimeoutOutOfBounds(u64),
}

/// Originating actor/client context for a task. Workspace membership and
/// bearer resolution live outside this crate (see `resolveAccess` in the
/// owning directory service) — a task only remembers the resolved ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOrigin {
    pub workspace_id: String,
    pub actor_id: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub origin: TaskOrigin,
    pub code: String,
    pub timeout_ms: u64,
    pub runtime_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

impl Task {
    pub fn new(
        origin: TaskOrigin,
        code: String,
        timeout_ms: Option<u64>,
        runtime_id: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Self, TaskError> {
        let timeout_ms = timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
            return Err(TaskError::TimeoutOutOfBounds(timeout_ms));
        }
        Ok(Self {
            id: TaskId::new(),
            origin,
            code,
            timeout_ms,
            runtime_id,
            metadata,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            exit_code: None,
            error: None,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), TaskError> {
        let allowed = match self.status {
            TaskStatus::Queued => to == TaskStatus::Running,
            TaskStatus::Running => to.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    fn finish(
        &mut self,
        status: TaskStatus,
        exit_code: Option<i32>,
        error: Option<String>,
        stdout: String,
        stderr: String,
    ) -> Result<(), TaskError> {
        self.transition(status)?;
        self.completed_at = Some(Utc::now());
        self.exit_code = exit_code;
        self.error = error;
        self.stdout = stdout;
        self.stderr = stderr;
        Ok(())
    }

    pub fn complete(&mut self, exit_code: i32, stdout: String, stderr: String) -> Result<(), TaskError> {
        self.finish(TaskStatus::Completed, Some(exit_code), None, stdout, stderr)
    }

    pub fn fail(&mut self, error: String, stdout: String, stderr: String) -> Result<(), TaskError> {
        self.finish(TaskStatus::Failed, None, Some(error), stdout, stderr)
    }

    pub fn time_out(&mut self, error: String, stdout: String, stderr: String) -> Result<(), TaskError> {
        self.finish(TaskStatus::TimedOut, None, Some(error), stdout, stderr)
    }

    pub fn deny(&mut self, reason: String, stdout: String, stderr: String) -> Result<(), TaskError> {
        self.finish(TaskStatus::Denied, None, Some(reason), stdout, stderr)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> TaskOrigin {
        TaskOrigin {
            workspace_id: "ws_1".into(),
            actor_id: Some("actor_1".into()),
            client_id: None,
        }
    }

    #[test]
    fn new_task_defaults_timeout_and_is_queued() {
        let task = Task::new(origin(), "return 1;".into(), None, None, HashMap::new()).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn rejects_out_of_bounds_timeout() {
        let err = Task::new(origin(), "x".into(), Some(0), None, HashMap::new()).unwrap_err();
        assert!(matches!(err, TaskError::TimeoutOutOfBounds(0)));

        let err = Task::new(origin(), "x".into(), Some(MAX_TIMEOUT_MS + 1), None, HashMap::new()).unwrap_err();
        assert!(matches!(err, TaskError::TimeoutOutOfBounds(_)));
    }

    #[test]
    fn happy_path_transitions() {
        let mut task = Task::new(origin(), "x".into(), None, None, HashMap::new()).unwrap();
        task.start().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some());

        task.complete(0, "ok".into(), String::new()).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert_eq!(task.exit_code, Some(0));
    }

    #[test]
    fn cannot_skip_running() {
        let mut task = Task::new(origin(), "x".into(), None, None, HashMap::new()).unwrap();
        let err = task.complete(0, String::new(), String::new()).unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
    }

    #[test]
    fn terminal_is_a_sink() {
        let mut task = Task::new(origin(), "x".into(), None, None, HashMap::new()).unwrap();
        task.start().unwrap();
        task.fail("boom".into(), String::new(), String::new()).unwrap();
        let err = task.start().unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
    }

    #[test]
    fn timeout_and_denied_are_reachable_from_running() {
        let mut a = Task::new(origin(), "x".into(), None, None, HashMap::new()).unwrap();
        a.start().unwrap();
        a.time_out("deadline exceeded".into(), String::new(), String::new()).unwrap();
        assert_eq!(a.status, TaskStatus::TimedOut);

        let mut b = Task::new(origin(), "x".into(), None, None, HashMap::new()).unwrap();
        b.start().unwrap();
        b.deny("policy denied".into(), String::new(), String::new()).unwrap();
        assert_eq!(b.status, TaskStatus::Denied);
    }
}
