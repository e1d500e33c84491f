//! Persisted L2 decisions, read back by the L3 stage.

use rusqlite::{params, Connection};

use super::{now_db_time, DatabaseError};
use crate::model::Category;
use crate::tenant::TenantId;

/// One screening decision for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreeningResult {
    pub segment_id: String,
    pub escalate: bool,
    pub category: Option<Category>,
}

pub fn upsert_many(
    conn: &Connection,
    tenant: &TenantId,
    file_id: &str,
    results: &[ScreeningResult],
) -> Result<(), DatabaseError> {
    let now = now_db_time();
    let mut stmt = conn.prepare(
        "INSERT INTO screening_results (tenant_id, file_id, segment_id, escalate, category, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (tenant_id, file_id, segment_id) DO UPDATE SET
             escalate = excluded.escalate,
             category = excluded.category,
             updated_at = excluded.updated_at",
    )?;
    for result in results {
        stmt.execute(params![
            tenant.as_str(),
            file_id,
            result.segment_id,
            result.escalate,
            result.category.map(|c| c.as_str()),
            now
        ])?;
    }
    Ok(())
}

pub fn list_by_file(
    conn: &Connection,
    tenant: &TenantId,
    file_id: &str,
) -> Result<Vec<ScreeningResult>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT segment_id, escalate, category FROM screening_results
         WHERE tenant_id = ?1 AND file_id = ?2 ORDER BY segment_id",
    )?;
    let results = stmt
        .query_map(params![tenant.as_str(), file_id], |r| {
            let category: Option<String> = r.get(2)?;
            Ok(ScreeningResult {
                segment_id: r.get(0)?,
                escalate: r.get(1)?,
                category: category.map(|c| Category::from_label(&c)),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(results)
}

pub fn escalated_segment_ids(
    conn: &Connection,
    tenant: &TenantId,
    file_id: &str,
) -> Result<Vec<String>, DatabaseError> {
    Ok(list_by_file(conn, tenant, file_id)?
        .into_iter()
        .filter(|r| r.escalate)
        .map(|r| r.segment_id)
        .collect())
}
