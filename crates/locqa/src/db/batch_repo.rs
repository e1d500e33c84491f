//! Batch repository.
//!
//! The two batch flags are each set by one conditional UPDATE. Whoever gets
//! `1` back from SQLite owns the follow-up work; everyone else gets `false`.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_db_time, parse_column, parse_db_time, parse_opt_db_time, parse_tenant, task_repo, DatabaseError};
use crate::model::{Batch, ProcessingMode};
use crate::tenant::TenantId;

/// Registration data for a batch.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub id: String,
    pub tenant_id: TenantId,
    pub project_id: String,
    pub mode: ProcessingMode,
    pub glossary_id: Option<String>,
}

struct BatchRow {
    id: String,
    tenant_id: String,
    project_id: String,
    mode: String,
    glossary_id: Option<String>,
    completed: bool,
    completed_at: Option<String>,
    cross_file_analyzed: bool,
    created_at: String,
}

impl BatchRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            project_id: row.get("project_id")?,
            mode: row.get("mode")?,
            glossary_id: row.get("glossary_id")?,
            completed: row.get("completed")?,
            completed_at: row.get("completed_at")?,
            cross_file_analyzed: row.get("cross_file_analyzed")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_batch(self, file_ids: Vec<String>) -> Result<Batch, DatabaseError> {
        Ok(Batch {
            tenant_id: parse_tenant(self.tenant_id)?,
            mode: parse_column("mode", &self.mode)?,
            completed_at: parse_opt_db_time("completed_at", self.completed_at)?,
            created_at: parse_db_time("created_at", &self.created_at)?,
            id: self.id,
            project_id: self.project_id,
            glossary_id: self.glossary_id,
            file_ids,
            completed: self.completed,
            cross_file_analyzed: self.cross_file_analyzed,
        })
    }
}

/// Creates the batch row. Returns false if it already exists.
pub fn insert_if_absent(conn: &Connection, batch: &NewBatch) -> Result<bool, DatabaseError> {
    let now = now_db_time();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO batches (id, tenant_id, project_id, mode, glossary_id,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            batch.id,
            batch.tenant_id.as_str(),
            batch.project_id,
            batch.mode.as_str(),
            batch.glossary_id,
            now
        ],
    )?;
    Ok(inserted == 1)
}

pub fn find(conn: &Connection, tenant: &TenantId, id: &str) -> Result<Option<Batch>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM batches WHERE tenant_id = ?1 AND id = ?2",
            params![tenant.as_str(), id],
            BatchRow::from_row,
        )
        .optional()?;
    match row {
        Some(row) => {
            let file_ids = member_ids(conn, tenant, id)?;
            Ok(Some(row.into_batch(file_ids)?))
        }
        None => Ok(None),
    }
}

pub fn get(conn: &Connection, tenant: &TenantId, id: &str) -> Result<Batch, DatabaseError> {
    find(conn, tenant, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "batch",
        id: id.to_string(),
    })
}

pub fn member_ids(
    conn: &Connection,
    tenant: &TenantId,
    batch_id: &str,
) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM files WHERE tenant_id = ?1 AND batch_id = ?2 ORDER BY created_at, id",
    )?;
    let ids = stmt
        .query_map(params![tenant.as_str(), batch_id], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// The batch completion guard.
///
/// Sets `completed` only if it is still unset, the batch has members, and
/// none of them is outside a terminal status. On success the single
/// cross-file task is enqueued in the same transaction. Returns true exactly
/// once per batch no matter how often or how concurrently it is called.
pub fn try_complete(conn: &Connection, tenant: &TenantId, id: &str) -> Result<bool, DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    let now = now_db_time();
    let changed = tx.execute(
        "UPDATE batches SET completed = 1, completed_at = ?3, updated_at = ?3
         WHERE tenant_id = ?1 AND id = ?2 AND completed = 0
           AND EXISTS (SELECT 1 FROM files f WHERE f.tenant_id = ?1 AND f.batch_id = ?2)
           AND NOT EXISTS (
               SELECT 1 FROM files f
               WHERE f.tenant_id = ?1 AND f.batch_id = ?2
                 AND f.status NOT IN ('scored', 'error'))",
        params![tenant.as_str(), id, now],
    )?;

    if changed == 1 {
        task_repo::enqueue_cross_file(&tx, tenant, id)?;
    }
    tx.commit()?;
    Ok(changed == 1)
}

/// Sets `cross_file_analyzed`. Returns false if it was already set.
pub fn mark_cross_file_analyzed(
    conn: &Connection,
    tenant: &TenantId,
    id: &str,
) -> Result<bool, DatabaseError> {
    let now = now_db_time();
    let changed = conn.execute(
        "UPDATE batches SET cross_file_analyzed = 1, cross_file_analyzed_at = ?3, updated_at = ?3
         WHERE tenant_id = ?1 AND id = ?2 AND completed = 1 AND cross_file_analyzed = 0",
        params![tenant.as_str(), id, now],
    )?;
    Ok(changed == 1)
}
