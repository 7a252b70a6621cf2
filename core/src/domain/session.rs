// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transport-level session — a binding between a client and the broker that
//! survives many RPC requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub workspace_id: String,
    pub actor_id: Option<String>,
    pub client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Session {
    pub fn new(workspace_id: String, actor_id: Option<String>, client_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            workspace_id,
            actor_id,
            client_id,
            created_at: now,
            last_seen_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }
}
