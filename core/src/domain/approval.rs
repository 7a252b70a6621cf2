// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Approval aggregate — one human decision gating one dispatcher call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub Uuid);

impl ApprovalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ApprovalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval {0} already resolved")]
    AlreadyResolved(ApprovalId),
}

/// Identifies exactly one dispatcher invocation within a task's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub task_id: TaskId,
    pub call_id: CallId,
    pub tool_path: String,
    pub input: Value,
    pub status: ApprovalStatus,
    pub reviewer_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Approval {
    pub fn new(task_id: TaskId, call_id: CallId, tool_path: String, input: Value) -> Self {
        Self {
            id: ApprovalId::new(),
            task_id,
            call_id,
            tool_path,
            input,
            status: ApprovalStatus::Pending,
            reviewer_id: None,
            reason: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    fn resolve(
        &mut self,
        status: ApprovalStatus,
        reviewer_id: Option<String>,
        reason: Option<String>,
    ) -> Result<(), ApprovalError> {
        if self.status != ApprovalStatus::Pending {
            return Err(ApprovalError::AlreadyResolved(self.id));
        }
        self.status = status;
        self.reviewer_id = reviewer_id;
        self.reason = reason;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }

    pub fn approve(&mut self, reviewer_id: Option<String>, reason: Option<String>) -> Result<(), ApprovalError> {
        self.resolve(ApprovalStatus::Approved, reviewer_id, reason)
    }

    pub fn deny(&mut self, reviewer_id: Option<String>, reason: Option<String>) -> Result<(), ApprovalError> {
        self.resolve(ApprovalStatus::Denied, reviewer_id, reason)
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_exactly_once() {
        let mut a = Approval::new(TaskId::new(), CallId::new(), "stripe.customers.create".into(), Value::Null);
        assert!(a.is_pending());
        a.approve(Some("reviewer_1".into()), None).unwrap();
        assert_eq!(a.status, ApprovalStatus::Approved);
        assert!(a.resolved_at.is_some());

        let err = a.deny(None, Some("too late".into())).unwrap_err();
        assert!(matches!(err, ApprovalError::AlreadyResolved(_)));
    }

    #[test]
    fn denial_carries_a_reason() {
        let mut a = Approval::new(TaskId::new(), CallId::new(), "admin.send_announcement".into(), Value::Null);
        a.deny(Some("reviewer_2".into()), Some("not today".into())).unwrap();
        assert_eq!(a.status, ApprovalStatus::Denied);
        assert_eq!(a.reason.as_deref(), Some("not today"));
    }
}
