// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory repository implementations used for tests and single-node
//! operation without a configured database.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::approval::{Approval, ApprovalId};
use crate::domain::policy::AccessPolicy;
use crate::domain::repository::{ApprovalRepository, PolicyRepository, RepositoryError, TaskRepository, ToolSourceRepository};
use crate::domain::task::{Task, TaskId};
use crate::domain::tool::ToolSource;

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: &Task) -> Result<(), RepositoryError> {
        self.tasks.write().unwrap().insert(task.id, task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        Ok(self.tasks.read().unwrap().get(&id).cloned())
    }

    async fn find_by_workspace(&self, workspace_id: &str, limit: usize) -> Result<Vec<Task>, RepositoryError> {
        let tasks = self.tasks.read().unwrap();
        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|t| t.origin.workspace_id == workspace_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    approvals: RwLock<HashMap<ApprovalId, Approval>>,
}

impl InMemoryApprovalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn save(&self, approval: &Approval) -> Result<(), RepositoryError> {
        self.approvals.write().unwrap().insert(approval.id, approval.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        Ok(self.approvals.read().unwrap().get(&id).cloned())
    }

    async fn find_pending_for_task(&self, task_id: TaskId) -> Result<Vec<Approval>, RepositoryError> {
        Ok(self
            .approvals
            .read()
            .unwrap()
            .values()
            .filter(|a| a.task_id == task_id && a.is_pending())
            .cloned()
            .collect())
    }

    async fn find_all_pending(&self, workspace_id: &str) -> Result<Vec<Approval>, RepositoryError> {
        // The in-memory store does not track workspace on the approval
        // itself (it is reachable via the owning task); callers that need
        // the workspace filter join against TaskRepository.
        let _ = workspace_id;
        Ok(self
            .approvals
            .read()
            .unwrap()
            .values()
            .filter(|a| a.is_pending())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryToolSourceRepository {
    sources: RwLock<HashMap<(String, String), ToolSource>>,
}

impl InMemoryToolSourceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolSourceRepository for InMemoryToolSourceRepository {
    async fn save(&self, source: &ToolSource) -> Result<(), RepositoryError> {
        self.sources
            .write()
            .unwrap()
            .insert((source.workspace_id.clone(), source.name.clone()), source.clone());
        Ok(())
    }

    async fn find_by_name(&self, workspace_id: &str, name: &str) -> Result<Option<ToolSource>, RepositoryError> {
        Ok(self
            .sources
            .read()
            .unwrap()
            .get(&(workspace_id.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_for_workspace(&self, workspace_id: &str) -> Result<Vec<ToolSource>, RepositoryError> {
        Ok(self
            .sources
            .read()
            .unwrap()
            .values()
            .filter(|s| s.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, workspace_id: &str, name: &str) -> Result<(), RepositoryError> {
        self.sources
            .write()
            .unwrap()
            .remove(&(workspace_id.to_string(), name.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPolicyRepository {
    policies: RwLock<Vec<AccessPolicy>>,
}

impl InMemoryPolicyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn save(&self, policy: AccessPolicy) -> Result<(), RepositoryError> {
        self.policies.write().unwrap().push(policy);
        Ok(())
    }

    async fn list_for_workspace(&self, workspace_id: &str) -> Result<Vec<AccessPolicy>, RepositoryError> {
        Ok(self
            .policies
            .read()
            .unwrap()
            .iter()
            .filter(|p| p.workspace_id == workspace_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskOrigin;
    use std::collections::HashMap as Map;

    #[tokio::test]
    async fn task_repository_round_trips() {
        let repo = InMemoryTaskRepository::new();
        let origin = TaskOrigin {
            workspace_id: "ws_1".into(),
            actor_id: None,
            client_id: None,
        };
        let task = Task::new(origin, "x".into(), None, None, Map::new()).unwrap();
        let id = task.id;
        repo.save(&task).await.unwrap();
        let found = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.id, id);
    }

    #[tokio::test]
    async fn find_by_workspace_filters_and_limits() {
        let repo = InMemoryTaskRepository::new();
        for _ in 0..3 {
            let origin = TaskOrigin {
                workspace_id: "ws_1".into(),
                actor_id: None,
                client_id: None,
            };
            let task = Task::new(origin, "x".into(), None, None, Map::new()).unwrap();
            repo.save(&task).await.unwrap();
        }
        let found = repo.find_by_workspace("ws_1", 2).await.unwrap();
        assert_eq!(found.len(), 2);
        let found = repo.find_by_workspace("ws_other", 10).await.unwrap();
        assert!(found.is_empty());
    }
}
