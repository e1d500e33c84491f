//! File repository: lifecycle rows for the `files` table.
//!
//! Status changes go through [`transition`], a single conditional UPDATE whose
//! affected-row count tells the caller whether it won.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{now_db_time, parse_column, parse_db_time, parse_tenant, DatabaseError};
use crate::model::{FileStatus, NewFile, ProcessingMode, QaFile};
use crate::tenant::TenantId;

struct FileRow {
    id: String,
    tenant_id: String,
    project_id: String,
    batch_id: Option<String>,
    file_name: String,
    status: String,
    mode: String,
    segment_count: u32,
    retry_count: u32,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            project_id: row.get("project_id")?,
            batch_id: row.get("batch_id")?,
            file_name: row.get("file_name")?,
            status: row.get("status")?,
            mode: row.get("mode")?,
            segment_count: row.get("segment_count")?,
            retry_count: row.get("retry_count")?,
            last_error: row.get("last_error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_file(self) -> Result<QaFile, DatabaseError> {
        Ok(QaFile {
            tenant_id: parse_tenant(self.tenant_id)?,
            status: parse_column("status", &self.status)?,
            mode: parse_column("mode", &self.mode)?,
            created_at: parse_db_time("created_at", &self.created_at)?,
            updated_at: parse_db_time("updated_at", &self.updated_at)?,
            id: self.id,
            project_id: self.project_id,
            batch_id: self.batch_id,
            file_name: self.file_name,
            segment_count: self.segment_count,
            retry_count: self.retry_count,
            last_error: self.last_error,
        })
    }
}

/// Registers a file in `uploaded` status. Returns false if it already exists.
pub fn insert_if_absent(conn: &Connection, file: &NewFile) -> Result<bool, DatabaseError> {
    let now = now_db_time();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO files (id, tenant_id, project_id, file_name, status, mode,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'uploaded', ?5, ?6, ?6)",
        params![
            file.id,
            file.tenant_id.as_str(),
            file.project_id,
            file.file_name,
            file.mode.as_str(),
            now
        ],
    )?;
    Ok(inserted == 1)
}

pub fn find(conn: &Connection, tenant: &TenantId, id: &str) -> Result<Option<QaFile>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM files WHERE tenant_id = ?1 AND id = ?2",
            params![tenant.as_str(), id],
            FileRow::from_row,
        )
        .optional()?;
    row.map(FileRow::into_file).transpose()
}

/// Like [`find`], but a missing file is an error.
pub fn get(conn: &Connection, tenant: &TenantId, id: &str) -> Result<QaFile, DatabaseError> {
    find(conn, tenant, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity: "file",
        id: id.to_string(),
    })
}

/// Moves a file from any of `from` to `to` in one statement.
///
/// Resets the per-stage retry counter. Returns false when the file was not in
/// one of the expected statuses, which callers treat as "someone else won".
pub fn transition(
    conn: &Connection,
    tenant: &TenantId,
    id: &str,
    from: &[FileStatus],
    to: FileStatus,
) -> Result<bool, DatabaseError> {
    if from.is_empty() {
        return Ok(false);
    }
    let placeholders = (0..from.len())
        .map(|i| format!("?{}", i + 5))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE files SET status = ?1, retry_count = 0, last_error = NULL, updated_at = ?2
         WHERE tenant_id = ?3 AND id = ?4 AND status IN ({})",
        placeholders
    );

    let now = now_db_time();
    let mut values: Vec<&str> = vec![to.as_str(), now.as_str(), tenant.as_str(), id];
    values.extend(from.iter().map(|s| s.as_str()));

    let changed = conn.execute(&sql, params_from_iter(values))?;
    Ok(changed == 1)
}

pub fn set_segment_count(
    conn: &Connection,
    tenant: &TenantId,
    id: &str,
    segment_count: u32,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE files SET segment_count = ?3, updated_at = ?4 WHERE tenant_id = ?1 AND id = ?2",
        params![tenant.as_str(), id, segment_count, now_db_time()],
    )?;
    Ok(())
}

/// Overrides the processing mode while the file has not started.
pub fn set_mode_if_uploaded(
    conn: &Connection,
    tenant: &TenantId,
    id: &str,
    mode: ProcessingMode,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE files SET mode = ?3, updated_at = ?4
         WHERE tenant_id = ?1 AND id = ?2 AND status = 'uploaded'",
        params![tenant.as_str(), id, mode.as_str(), now_db_time()],
    )?;
    Ok(changed == 1)
}

/// Records a failed attempt of the current stage. Returns the new count.
pub fn record_retry(
    conn: &Connection,
    tenant: &TenantId,
    id: &str,
    error: &str,
) -> Result<u32, DatabaseError> {
    conn.execute(
        "UPDATE files SET retry_count = retry_count + 1, last_error = ?3, updated_at = ?4
         WHERE tenant_id = ?1 AND id = ?2",
        params![tenant.as_str(), id, error, now_db_time()],
    )?;
    let count = conn.query_row(
        "SELECT retry_count FROM files WHERE tenant_id = ?1 AND id = ?2",
        params![tenant.as_str(), id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Moves a non-terminal file to `error`. Returns false if it was already terminal.
pub fn mark_error(
    conn: &Connection,
    tenant: &TenantId,
    id: &str,
    error: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE files SET status = 'error', last_error = ?3, updated_at = ?4
         WHERE tenant_id = ?1 AND id = ?2 AND status NOT IN ('scored', 'error')",
        params![tenant.as_str(), id, error, now_db_time()],
    )?;
    Ok(changed == 1)
}

/// Attaches a file to a batch.
///
/// Membership is fixed once the batch has completed: a new file is only
/// attached while `batches.completed = 0`, in the same statement that checks
/// it. Re-attaching an existing member always succeeds. Returns false when
/// the file belongs to another batch or the batch is missing or completed.
pub fn assign_batch(
    conn: &Connection,
    tenant: &TenantId,
    id: &str,
    batch_id: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE files SET batch_id = ?3, updated_at = ?4
         WHERE tenant_id = ?1 AND id = ?2
           AND (batch_id = ?3
                OR (batch_id IS NULL AND EXISTS (
                        SELECT 1 FROM batches b
                        WHERE b.tenant_id = ?1 AND b.id = ?3 AND b.completed = 0)))",
        params![tenant.as_str(), id, batch_id, now_db_time()],
    )?;
    Ok(changed == 1)
}

pub fn list_by_batch(
    conn: &Connection,
    tenant: &TenantId,
    batch_id: &str,
) -> Result<Vec<QaFile>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM files WHERE tenant_id = ?1 AND batch_id = ?2 ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map(params![tenant.as_str(), batch_id], FileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(FileRow::into_file).collect()
}
