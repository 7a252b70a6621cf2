// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Approval gate — blocks a dispatcher call pending a human decision, via
//! either in-band elicitation or an out-of-band polling loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::approval::{ApprovalId, ApprovalStatus};
use crate::domain::repository::ApprovalRepository;

const POLL_INTERVAL: Duration = Duration::from_millis(400);

#[async_trait::async_trait]
pub trait Elicitor: Send + Sync {
    /// Presents an approve/deny prompt and returns the decision, or `Err`
    /// when elicitation itself failed (the gate then latches to disabled).
    async fn elicit(&self, tool_path: &str, input: &Value) -> Result<ElicitDecision, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElicitDecision {
    Approved,
    Denied,
}

pub struct ApprovalGate {
    approvals: Arc<dyn ApprovalRepository>,
    elicitor: Option<Arc<dyn Elicitor>>,
    elicitation_disabled: Mutex<bool>,
}

impl ApprovalGate {
    pub fn new(approvals: Arc<dyn ApprovalRepository>, elicitor: Option<Arc<dyn Elicitor>>) -> Self {
        Self {
            approvals,
            elicitor,
            elicitation_disabled: Mutex::new(false),
        }
    }

    /// Blocks until the approval identified by `approval_id` resolves, trying
    /// in-band elicitation first (unless latched disabled) and falling back
    /// to an out-of-band poll of the repository at the 400ms tick shared with
    /// task terminality checks.
    pub async fn await_decision(&self, approval_id: ApprovalId, tool_path: &str, input: &Value) -> ApprovalStatus {
        if let Some(elicitor) = &self.elicitor {
            if !*self.elicitation_disabled.lock().await {
                match elicitor.elicit(tool_path, input).await {
                    Ok(ElicitDecision::Approved) => return ApprovalStatus::Approved,
                    Ok(ElicitDecision::Denied) => return ApprovalStatus::Denied,
                    Err(reason) => {
                        tracing::warn!(%reason, "in-band elicitation failed, falling back to out-of-band approval for the remainder of the task");
                        *self.elicitation_disabled.lock().await = true;
                    }
                }
            }
        }

        self.poll_until_resolved(approval_id).await
    }

    async fn poll_until_resolved(&self, approval_id: ApprovalId) -> ApprovalStatus {
        loop {
            if let Ok(Some(approval)) = self.approvals.find_by_id(approval_id).await {
                if !approval.is_pending() {
                    return approval.status;
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
