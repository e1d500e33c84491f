//! Finding repository.
//!
//! Findings are upserted on `(tenant_id, file_id, dedup_key)`. An upsert
//! refreshes the descriptive columns but never touches `review_status`, so
//! re-running a stage cannot undo a reviewer's decision.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_db_time, parse_column, parse_db_time, parse_tenant, DatabaseError};
use crate::model::{Category, Finding, NewFinding, ReviewStatus};
use crate::tenant::TenantId;

struct FindingRow {
    id: String,
    tenant_id: String,
    file_id: String,
    segment_id: Option<String>,
    layer: String,
    rule: String,
    category: String,
    severity: String,
    description: String,
    ambiguous: bool,
    review_status: String,
    dedup_key: String,
    created_at: String,
    updated_at: String,
}

impl FindingRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            file_id: row.get("file_id")?,
            segment_id: row.get("segment_id")?,
            layer: row.get("layer")?,
            rule: row.get("rule")?,
            category: row.get("category")?,
            severity: row.get("severity")?,
            description: row.get("description")?,
            ambiguous: row.get("ambiguous")?,
            review_status: row.get("review_status")?,
            dedup_key: row.get("dedup_key")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_finding(self) -> Result<Finding, DatabaseError> {
        Ok(Finding {
            tenant_id: parse_tenant(self.tenant_id)?,
            layer: parse_column("layer", &self.layer)?,
            category: Category::from_label(&self.category),
            severity: parse_column("severity", &self.severity)?,
            review_status: parse_column("review_status", &self.review_status)?,
            created_at: parse_db_time("created_at", &self.created_at)?,
            updated_at: parse_db_time("updated_at", &self.updated_at)?,
            id: self.id,
            file_id: self.file_id,
            segment_id: self.segment_id,
            rule: self.rule,
            description: self.description,
            ambiguous: self.ambiguous,
            dedup_key: self.dedup_key,
        })
    }
}

fn collect(rows: Vec<FindingRow>) -> Result<Vec<Finding>, DatabaseError> {
    rows.into_iter().map(FindingRow::into_finding).collect()
}

/// Upserts a file's findings. Returns how many rows were newly inserted.
pub fn upsert_many(
    conn: &Connection,
    tenant: &TenantId,
    file_id: &str,
    findings: &[NewFinding],
) -> Result<usize, DatabaseError> {
    let now = now_db_time();
    let mut inserted = 0;
    let mut stmt = conn.prepare(
        "INSERT INTO findings (id, tenant_id, file_id, segment_id, layer, rule, category,
         severity, description, ambiguous, review_status, dedup_key, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'open', ?11, ?12, ?12)
         ON CONFLICT (tenant_id, file_id, dedup_key) DO UPDATE SET
             category = excluded.category,
             severity = excluded.severity,
             description = excluded.description,
             ambiguous = excluded.ambiguous,
             updated_at = excluded.updated_at",
    )?;
    let mut exists = conn.prepare(
        "SELECT 1 FROM findings WHERE tenant_id = ?1 AND file_id = ?2 AND dedup_key = ?3",
    )?;

    for finding in findings {
        let key = finding.dedup_key(file_id);
        if !exists.exists(params![tenant.as_str(), file_id, key])? {
            inserted += 1;
        }
        stmt.execute(params![
            uuid::Uuid::new_v4().to_string(),
            tenant.as_str(),
            file_id,
            finding.segment_id,
            finding.layer.as_str(),
            finding.rule,
            finding.category.as_str(),
            finding.severity.as_str(),
            finding.description,
            finding.ambiguous,
            key,
            now
        ])?;
    }
    Ok(inserted)
}

pub fn find(conn: &Connection, tenant: &TenantId, id: &str) -> Result<Option<Finding>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM findings WHERE tenant_id = ?1 AND id = ?2",
            params![tenant.as_str(), id],
            FindingRow::from_row,
        )
        .optional()?;
    row.map(FindingRow::into_finding).transpose()
}

pub fn list_by_file(
    conn: &Connection,
    tenant: &TenantId,
    file_id: &str,
) -> Result<Vec<Finding>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM findings WHERE tenant_id = ?1 AND file_id = ?2
         ORDER BY created_at, dedup_key",
    )?;
    let rows = stmt
        .query_map(params![tenant.as_str(), file_id], FindingRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    collect(rows)
}

/// All findings of the files in a batch.
pub fn list_by_batch(
    conn: &Connection,
    tenant: &TenantId,
    batch_id: &str,
) -> Result<Vec<Finding>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT fi.* FROM findings fi
         JOIN files f ON f.tenant_id = fi.tenant_id AND f.id = fi.file_id
         WHERE fi.tenant_id = ?1 AND f.batch_id = ?2
         ORDER BY f.created_at, f.id, fi.created_at, fi.dedup_key",
    )?;
    let rows = stmt
        .query_map(params![tenant.as_str(), batch_id], FindingRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    collect(rows)
}

/// Segment ids that carry an L1 finding flagged as ambiguous.
pub fn ambiguous_segment_ids(
    conn: &Connection,
    tenant: &TenantId,
    file_id: &str,
) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT segment_id FROM findings
         WHERE tenant_id = ?1 AND file_id = ?2 AND layer = 'L1' AND ambiguous = 1
           AND segment_id IS NOT NULL",
    )?;
    let ids = stmt
        .query_map(params![tenant.as_str(), file_id], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Sets a finding's review status. Returns false if the finding does not exist.
pub fn update_review_status(
    conn: &Connection,
    tenant: &TenantId,
    id: &str,
    status: ReviewStatus,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE findings SET review_status = ?3, updated_at = ?4 WHERE tenant_id = ?1 AND id = ?2",
        params![tenant.as_str(), id, status.as_str(), now_db_time()],
    )?;
    Ok(changed == 1)
}
