// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session transport — routes streamable requests by `mcp-session-id`,
//! serializes dispatch per session, and falls back to a stateless handler on
//! a session-map miss.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::domain::session::{Session, SessionId};

/// A session's monotonic dispatch chain. Wrapping each session's handler
/// calls in a mutex serializes them FIFO; a request that fails still
/// releases the lock so one broken request never poisons the chain.
pub struct SessionHandle {
    pub session: Mutex<Session>,
    pub chain: Mutex<()>,
    pub last_seen_at: Mutex<Instant>,
}

#[derive(Default)]
pub struct SessionMap {
    sessions: Mutex<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, workspace_id: String, actor_id: Option<String>, client_id: Option<String>) -> Arc<SessionHandle> {
        let session = Session::new(workspace_id, actor_id, client_id);
        let id = session.id;
        let handle = Arc::new(SessionHandle {
            session: Mutex::new(session),
            chain: Mutex::new(()),
            last_seen_at: Mutex::new(Instant::now()),
        });
        self.sessions.lock().await.insert(id, handle.clone());
        handle
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().await.get(&id).cloned()
    }

    pub async fn close(&self, id: SessionId) {
        self.sessions.lock().await.remove(&id);
    }

    /// Runs `work` serialized against this session's chain, touching
    /// `last_seen_at` first. Failures are swallowed at the call site, not
    /// here, by construction: the lock is released via the guard's `Drop`
    /// regardless of what `work` returns.
    pub async fn dispatch<F, Fut, T>(handle: &Arc<SessionHandle>, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _guard = handle.chain.lock().await;
        {
            let mut session = handle.session.lock().await;
            session.touch();
        }
        *handle.last_seen_at.lock().await = Instant::now();
        work().await
    }
}

pub fn parse_session_id(header_value: Option<&str>) -> Option<SessionId> {
    let raw = header_value?;
    let uuid = uuid::Uuid::parse_str(raw).ok()?;
    Some(SessionId(uuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_lookup_round_trips() {
        let map = SessionMap::new();
        let handle = map.create("ws_1".into(), None, None).await;
        let id = handle.session.lock().await.id;
        assert!(map.get(id).await.is_some());
        map.close(id).await;
        assert!(map.get(id).await.is_none());
    }

    #[test]
    fn parse_session_id_rejects_non_uuid() {
        assert!(parse_session_id(Some("not-a-uuid")).is_none());
        assert!(parse_session_id(None).is_none());
    }
}
