//! Durable work queue.
//!
//! Each row is one unit of work identified by `(tenant_id, idempotency_key)`.
//! Enqueueing the same key twice is a no-op, which is what makes duplicate
//! event delivery harmless.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_db_time, parse_column, parse_tenant, to_db_time, DatabaseError};
use crate::model::Stage;
use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Runs one stage of one file. Subject is the file id.
    Stage,
    /// Runs the cross-file pass of a batch. Subject is the batch id.
    CrossFile,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Stage => "stage",
            TaskKind::CrossFile => "cross_file",
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stage" => Ok(TaskKind::Stage),
            "cross_file" => Ok(TaskKind::CrossFile),
            _ => Err(format!("Unknown task kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub tenant_id: TenantId,
    pub kind: TaskKind,
    pub subject_id: String,
    pub stage: Option<Stage>,
    pub idempotency_key: String,
    pub status: TaskStatus,
    /// Number of times the task has been claimed, including the current run.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Task {
    pub(super) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let tenant: String = row.get("tenant_id")?;
        let kind: String = row.get("kind")?;
        let stage: Option<String> = row.get("stage")?;
        let status: String = row.get("status")?;
        let decode = |e: DatabaseError| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        };

        Ok(Self {
            id: row.get("id")?,
            tenant_id: parse_tenant(tenant).map_err(decode)?,
            kind: parse_column("kind", &kind).map_err(decode)?,
            subject_id: row.get("subject_id")?,
            stage: stage
                .map(|s| parse_column("stage", &s))
                .transpose()
                .map_err(decode)?,
            idempotency_key: row.get("idempotency_key")?,
            status: parse_column("status", &status).map_err(decode)?,
            attempts: row.get("attempts")?,
            last_error: row.get("last_error")?,
        })
    }
}

/// Idempotency key of a file stage: `(file id, stage)`.
pub fn stage_key(file_id: &str, stage: Stage) -> String {
    format!("stage:{}:{}", file_id, stage.as_str())
}

pub fn cross_file_key(batch_id: &str) -> String {
    format!("cross_file:{}", batch_id)
}

/// Enqueues a stage task. Returns false if the key was already queued or run.
pub fn enqueue_stage(
    conn: &Connection,
    tenant: &TenantId,
    file_id: &str,
    stage: Stage,
) -> Result<bool, DatabaseError> {
    enqueue(
        conn,
        tenant,
        TaskKind::Stage,
        file_id,
        Some(stage),
        &stage_key(file_id, stage),
    )
}

pub fn enqueue_cross_file(
    conn: &Connection,
    tenant: &TenantId,
    batch_id: &str,
) -> Result<bool, DatabaseError> {
    enqueue(
        conn,
        tenant,
        TaskKind::CrossFile,
        batch_id,
        None,
        &cross_file_key(batch_id),
    )
}

fn enqueue(
    conn: &Connection,
    tenant: &TenantId,
    kind: TaskKind,
    subject_id: &str,
    stage: Option<Stage>,
    key: &str,
) -> Result<bool, DatabaseError> {
    let now = now_db_time();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO tasks (id, tenant_id, kind, subject_id, stage, idempotency_key,
         status, attempts, run_after, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', 0, ?7, ?7, ?7)",
        params![
            uuid::Uuid::new_v4().to_string(),
            tenant.as_str(),
            kind.as_str(),
            subject_id,
            stage.map(|s| s.as_str()),
            key,
            now
        ],
    )?;
    Ok(inserted == 1)
}

pub fn complete(conn: &Connection, tenant: &TenantId, id: &str) -> Result<(), DatabaseError> {
    set_final(conn, tenant, id, TaskStatus::Done, None)
}

pub fn fail(
    conn: &Connection,
    tenant: &TenantId,
    id: &str,
    error: &str,
) -> Result<(), DatabaseError> {
    set_final(conn, tenant, id, TaskStatus::Failed, Some(error))
}

fn set_final(
    conn: &Connection,
    tenant: &TenantId,
    id: &str,
    status: TaskStatus,
    error: Option<&str>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE tasks SET status = ?3, last_error = COALESCE(?4, last_error), updated_at = ?5
         WHERE tenant_id = ?1 AND id = ?2",
        params![tenant.as_str(), id, status.as_str(), error, now_db_time()],
    )?;
    Ok(())
}

/// Puts a running task back on the queue, runnable at `run_after`.
pub fn reschedule(
    conn: &Connection,
    tenant: &TenantId,
    id: &str,
    run_after: DateTime<Utc>,
    error: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE tasks SET status = 'queued', run_after = ?3, last_error = ?4, updated_at = ?5
         WHERE tenant_id = ?1 AND id = ?2 AND status = 'running'",
        params![tenant.as_str(), id, to_db_time(run_after), error, now_db_time()],
    )?;
    Ok(())
}

pub fn find_by_key(
    conn: &Connection,
    tenant: &TenantId,
    key: &str,
) -> Result<Option<Task>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM tasks WHERE tenant_id = ?1 AND idempotency_key = ?2",
            params![tenant.as_str(), key],
            Task::from_row,
        )
        .optional()?)
}
