// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed repository implementations, used when a
//! `CODEBROKER_DATABASE_URL` is configured. Schema is a relational shadow of
//! the document-store model the domain layer specifies: one row per
//! aggregate, JSON columns for nested fields that don't need their own index.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::approval::{Approval, ApprovalId, ApprovalStatus};
use crate::domain::policy::{AccessPolicy, PolicyDecision};
use crate::domain::repository::{ApprovalRepository, PolicyRepository, RepositoryError, TaskRepository, ToolSourceRepository};
use crate::domain::task::{Task, TaskId, TaskOrigin, TaskStatus};
use crate::domain::tool::ToolSource;

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn task_status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::TimedOut => "timed_out",
        TaskStatus::Denied => "denied",
    }
}

fn task_status_from_str(s: &str) -> Result<TaskStatus, RepositoryError> {
    Ok(match s {
        "queued" => TaskStatus::Queued,
        "running" => TaskStatus::Running,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "timed_out" => TaskStatus::TimedOut,
        "denied" => TaskStatus::Denied,
        other => return Err(RepositoryError::Database(format!("unknown task status: {other}"))),
    })
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn save(&self, task: &Task) -> Result<(), RepositoryError> {
        let origin_json = serde_json::to_value(&task.origin)?;
        let metadata_json = serde_json::to_value(&task.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, workspace_id, origin, code, timeout_ms, runtime_id, metadata,
                status, created_at, started_at, completed_at, exit_code, error, stdout, stderr
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                exit_code = EXCLUDED.exit_code,
                error = EXCLUDED.error,
                stdout = EXCLUDED.stdout,
                stderr = EXCLUDED.stderr
            "#,
        )
        .bind(task.id.0)
        .bind(&task.origin.workspace_id)
        .bind(origin_json)
        .bind(&task.code)
        .bind(task.timeout_ms as i64)
        .bind(&task.runtime_id)
        .bind(metadata_json)
        .bind(task_status_str(task.status))
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.exit_code)
        .bind(&task.error)
        .bind(&task.stdout)
        .bind(&task.stderr)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(row_to_task).transpose()
    }

    async fn find_by_workspace(&self, workspace_id: &str, limit: usize) -> Result<Vec<Task>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE workspace_id = $1 ORDER BY created_at DESC LIMIT $2")
            .bind(workspace_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        rows.into_iter().map(row_to_task).collect()
    }
}

fn row_to_task(row: sqlx::postgres::PgRow) -> Result<Task, RepositoryError> {
    let origin: serde_json::Value = row.try_get("origin").map_err(RepositoryError::from)?;
    let origin: TaskOrigin = serde_json::from_value(origin)?;
    let metadata: serde_json::Value = row.try_get("metadata").map_err(RepositoryError::from)?;
    let metadata = serde_json::from_value(metadata)?;
    let status: String = row.try_get("status").map_err(RepositoryError::from)?;

    Ok(Task {
        id: TaskId(row.try_get("id").map_err(RepositoryError::from)?),
        origin,
        code: row.try_get("code").map_err(RepositoryError::from)?,
        timeout_ms: row.try_get::<i64, _>("timeout_ms").map_err(RepositoryError::from)? as u64,
        runtime_id: row.try_get("runtime_id").map_err(RepositoryError::from)?,
        metadata,
        status: task_status_from_str(&status)?,
        created_at: row.try_get("created_at").map_err(RepositoryError::from)?,
        started_at: row.try_get("started_at").map_err(RepositoryError::from)?,
        completed_at: row.try_get("completed_at").map_err(RepositoryError::from)?,
        exit_code: row.try_get("exit_code").map_err(RepositoryError::from)?,
        error: row.try_get("error").map_err(RepositoryError::from)?,
        stdout: row.try_get("stdout").map_err(RepositoryError::from)?,
        stderr: row.try_get("stderr").map_err(RepositoryError::from)?,
    })
}

pub struct PostgresApprovalRepository {
    pool: PgPool,
}

impl PostgresApprovalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn approval_status_str(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Denied => "denied",
    }
}

#[async_trait]
impl ApprovalRepository for PostgresApprovalRepository {
    async fn save(&self, approval: &Approval) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO approvals (
                id, task_id, call_id, tool_path, input, status,
                reviewer_id, reason, created_at, resolved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                reviewer_id = EXCLUDED.reviewer_id,
                reason = EXCLUDED.reason,
                resolved_at = EXCLUDED.resolved_at
            "#,
        )
        .bind(approval.id.0)
        .bind(approval.task_id.0)
        .bind(approval.call_id.0)
        .bind(&approval.tool_path)
        .bind(&approval.input)
        .bind(approval_status_str(approval.status))
        .bind(&approval.reviewer_id)
        .bind(&approval.reason)
        .bind(approval.created_at)
        .bind(approval.resolved_at)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn find_by_id(&self, id: ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        sqlx::query_as::<_, ApprovalRow>("SELECT * FROM approvals WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn find_pending_for_task(&self, task_id: TaskId) -> Result<Vec<Approval>, RepositoryError> {
        let rows = sqlx::query_as::<_, ApprovalRow>(
            "SELECT * FROM approvals WHERE task_id = $1 AND status = 'pending'",
        )
        .bind(task_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_all_pending(&self, workspace_id: &str) -> Result<Vec<Approval>, RepositoryError> {
        let rows = sqlx::query_as::<_, ApprovalRow>(
            r#"
            SELECT a.* FROM approvals a
            JOIN tasks t ON t.id = a.task_id
            WHERE t.workspace_id = $1 AND a.status = 'pending'
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    id: uuid::Uuid,
    task_id: uuid::Uuid,
    call_id: uuid::Uuid,
    tool_path: String,
    input: serde_json::Value,
    status: String,
    reviewer_id: Option<String>,
    reason: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    resolved_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<ApprovalRow> for Approval {
    type Error = RepositoryError;

    fn try_from(row: ApprovalRow) -> Result<Self, Self::Error> {
        let status = match row.status.as_str() {
            "pending" => ApprovalStatus::Pending,
            "approved" => ApprovalStatus::Approved,
            "denied" => ApprovalStatus::Denied,
            other => return Err(RepositoryError::Database(format!("unknown approval status: {other}"))),
        };
        Ok(Approval {
            id: ApprovalId(row.id),
            task_id: TaskId(row.task_id),
            call_id: crate::domain::approval::CallId(row.call_id),
            tool_path: row.tool_path,
            input: row.input,
            status,
            reviewer_id: row.reviewer_id,
            reason: row.reason,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

pub struct PostgresToolSourceRepository {
    pool: PgPool,
}

impl PostgresToolSourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ToolSourceRepository for PostgresToolSourceRepository {
    async fn save(&self, source: &ToolSource) -> Result<(), RepositoryError> {
        let config_json = serde_json::to_value(&source.config)?;
        sqlx::query(
            r#"
            INSERT INTO tool_sources (workspace_id, name, config, spec_hash, auth_fingerprint)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (workspace_id, name) DO UPDATE SET
                config = EXCLUDED.config,
                spec_hash = EXCLUDED.spec_hash,
                auth_fingerprint = EXCLUDED.auth_fingerprint
            "#,
        )
        .bind(&source.workspace_id)
        .bind(&source.name)
        .bind(config_json)
        .bind(&source.spec_hash)
        .bind(&source.auth_fingerprint)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn find_by_name(&self, workspace_id: &str, name: &str) -> Result<Option<ToolSource>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM tool_sources WHERE workspace_id = $1 AND name = $2")
            .bind(workspace_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(row_to_tool_source).transpose()
    }

    async fn list_for_workspace(&self, workspace_id: &str) -> Result<Vec<ToolSource>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM tool_sources WHERE workspace_id = $1")
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        rows.into_iter().map(row_to_tool_source).collect()
    }

    async fn delete(&self, workspace_id: &str, name: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM tool_sources WHERE workspace_id = $1 AND name = $2")
            .bind(workspace_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }
}

fn row_to_tool_source(row: sqlx::postgres::PgRow) -> Result<ToolSource, RepositoryError> {
    let config: serde_json::Value = row.try_get("config").map_err(RepositoryError::from)?;
    Ok(ToolSource {
        workspace_id: row.try_get("workspace_id").map_err(RepositoryError::from)?,
        name: row.try_get("name").map_err(RepositoryError::from)?,
        config: serde_json::from_value(config)?,
        spec_hash: row.try_get("spec_hash").map_err(RepositoryError::from)?,
        auth_fingerprint: row.try_get("auth_fingerprint").map_err(RepositoryError::from)?,
    })
}

pub struct PostgresPolicyRepository {
    pool: PgPool,
}

impl PostgresPolicyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyRepository for PostgresPolicyRepository {
    async fn save(&self, policy: AccessPolicy) -> Result<(), RepositoryError> {
        let decision = match policy.decision {
            PolicyDecision::Allow => "allow",
            PolicyDecision::RequireApproval => "require_approval",
            PolicyDecision::Deny => "deny",
        };
        sqlx::query(
            r#"
            INSERT INTO access_policies (workspace_id, actor_id, client_id, tool_path_pattern, decision, priority)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&policy.workspace_id)
        .bind(&policy.actor_id)
        .bind(&policy.client_id)
        .bind(&policy.tool_path_pattern)
        .bind(decision)
        .bind(policy.priority)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn list_for_workspace(&self, workspace_id: &str) -> Result<Vec<AccessPolicy>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM access_policies WHERE workspace_id = $1")
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(|row| {
                let decision: String = row.try_get("decision").map_err(RepositoryError::from)?;
                let decision = match decision.as_str() {
                    "allow" => PolicyDecision::Allow,
                    "require_approval" => PolicyDecision::RequireApproval,
                    "deny" => PolicyDecision::Deny,
                    other => return Err(RepositoryError::Database(format!("unknown decision: {other}"))),
                };
                Ok(AccessPolicy {
                    workspace_id: row.try_get("workspace_id").map_err(RepositoryError::from)?,
                    actor_id: row.try_get("actor_id").map_err(RepositoryError::from)?,
                    client_id: row.try_get("client_id").map_err(RepositoryError::from)?,
                    tool_path_pattern: row.try_get("tool_path_pattern").map_err(RepositoryError::from)?,
                    decision,
                    priority: row.try_get("priority").map_err(RepositoryError::from)?,
                })
            })
            .collect()
    }
}
