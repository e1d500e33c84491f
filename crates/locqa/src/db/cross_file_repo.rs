//! Batch-scoped cross-file findings.

use rusqlite::{params, Connection, Row};

use super::{now_db_time, parse_column, parse_db_time, parse_tenant, DatabaseError};
use crate::model::{CrossFileFinding, CrossFileKind};
use crate::tenant::TenantId;

/// A cross-file finding before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCrossFileFinding {
    pub kind: CrossFileKind,
    pub source_text: String,
    pub description: String,
    pub file_ids: Vec<String>,
    pub segment_ids: Vec<String>,
    pub dedup_key: String,
}

struct CrossFileRow {
    id: String,
    tenant_id: String,
    batch_id: String,
    kind: String,
    source_text: String,
    description: String,
    file_ids: String,
    segment_ids: String,
    dedup_key: String,
    created_at: String,
}

impl CrossFileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            batch_id: row.get("batch_id")?,
            kind: row.get("kind")?,
            source_text: row.get("source_text")?,
            description: row.get("description")?,
            file_ids: row.get("file_ids")?,
            segment_ids: row.get("segment_ids")?,
            dedup_key: row.get("dedup_key")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_finding(self) -> Result<CrossFileFinding, DatabaseError> {
        let decode_ids = |column: &'static str, raw: &str| {
            serde_json::from_str::<Vec<String>>(raw).map_err(|e| DatabaseError::InvalidColumn {
                column,
                reason: e.to_string(),
            })
        };
        Ok(CrossFileFinding {
            tenant_id: parse_tenant(self.tenant_id)?,
            kind: parse_column("kind", &self.kind)?,
            file_ids: decode_ids("file_ids", &self.file_ids)?,
            segment_ids: decode_ids("segment_ids", &self.segment_ids)?,
            created_at: parse_db_time("created_at", &self.created_at)?,
            id: self.id,
            batch_id: self.batch_id,
            source_text: self.source_text,
            description: self.description,
            dedup_key: self.dedup_key,
        })
    }
}

/// Inserts findings, ignoring keys already present for the batch.
pub fn insert_many(
    conn: &Connection,
    tenant: &TenantId,
    batch_id: &str,
    findings: &[NewCrossFileFinding],
) -> Result<usize, DatabaseError> {
    let now = now_db_time();
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO cross_file_findings (id, tenant_id, batch_id, kind, source_text,
         description, file_ids, segment_ids, dedup_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    let mut inserted = 0;
    for finding in findings {
        let file_ids = serde_json::to_string(&finding.file_ids).map_err(|e| {
            DatabaseError::InvalidColumn {
                column: "file_ids",
                reason: e.to_string(),
            }
        })?;
        let segment_ids = serde_json::to_string(&finding.segment_ids).map_err(|e| {
            DatabaseError::InvalidColumn {
                column: "segment_ids",
                reason: e.to_string(),
            }
        })?;
        inserted += stmt.execute(params![
            uuid::Uuid::new_v4().to_string(),
            tenant.as_str(),
            batch_id,
            finding.kind.as_str(),
            finding.source_text,
            finding.description,
            file_ids,
            segment_ids,
            finding.dedup_key,
            now
        ])?;
    }
    Ok(inserted)
}

pub fn list_by_batch(
    conn: &Connection,
    tenant: &TenantId,
    batch_id: &str,
) -> Result<Vec<CrossFileFinding>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM cross_file_findings WHERE tenant_id = ?1 AND batch_id = ?2
         ORDER BY created_at, dedup_key",
    )?;
    let rows = stmt
        .query_map(params![tenant.as_str(), batch_id], CrossFileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(CrossFileRow::into_finding).collect()
}
