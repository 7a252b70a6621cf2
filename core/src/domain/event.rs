// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Live task events — the append-only journal a task's subscribers read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::task::TaskId;

pub const TERMINAL_STATUSES: [&str; 4] = ["completed", "failed", "timed_out", "denied"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveTaskEvent {
    pub id: Uuid,
    pub task_id: TaskId,
    pub event_name: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl LiveTaskEvent {
    pub fn new(task_id: TaskId, event_name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            event_name: event_name.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Whether `payload.status` names one of the four terminal task statuses.
    pub fn is_terminal(&self) -> bool {
        self.payload
            .get("status")
            .and_then(Value::as_str)
            .map(|s| TERMINAL_STATUSES.contains(&s))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_detection_reads_payload_status() {
        let e = LiveTaskEvent::new(TaskId::new(), "status_changed", json!({"status": "completed"}));
        assert!(e.is_terminal());

        let e = LiveTaskEvent::new(TaskId::new(), "status_changed", json!({"status": "running"}));
        assert!(!e.is_terminal());

        let e = LiveTaskEvent::new(TaskId::new(), "output", json!({"stream": "stdout"}));
        assert!(!e.is_terminal());
    }
}
