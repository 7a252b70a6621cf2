// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository abstractions over the reactive document store. Only the
//! indexes and transaction granularity the application layer actually needs
//! are specified here; the persistence engine itself is an external
//! collaborator.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::approval::{Approval, ApprovalId};
use crate::domain::policy::AccessPolicy;
use crate::domain::task::{Task, TaskId};
use crate::domain::tool::ToolSource;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unknown repository error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound,
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(e: serde_json::Error) -> Self {
        RepositoryError::Serialization(e.to_string())
    }
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn save(&self, task: &Task) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError>;
    async fn find_by_workspace(&self, workspace_id: &str, limit: usize) -> Result<Vec<Task>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn save(&self, approval: &Approval) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: ApprovalId) -> Result<Option<Approval>, RepositoryError>;
    async fn find_pending_for_task(&self, task_id: TaskId) -> Result<Vec<Approval>, RepositoryError>;
    async fn find_all_pending(&self, workspace_id: &str) -> Result<Vec<Approval>, RepositoryError>;
}

#[async_trait]
pub trait ToolSourceRepository: Send + Sync {
    async fn save(&self, source: &ToolSource) -> Result<(), RepositoryError>;
    async fn find_by_name(&self, workspace_id: &str, name: &str) -> Result<Option<ToolSource>, RepositoryError>;
    async fn list_for_workspace(&self, workspace_id: &str) -> Result<Vec<ToolSource>, RepositoryError>;
    async fn delete(&self, workspace_id: &str, name: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn save(&self, policy: AccessPolicy) -> Result<(), RepositoryError>;
    async fn list_for_workspace(&self, workspace_id: &str) -> Result<Vec<AccessPolicy>, RepositoryError>;
}
