//! Append-only audit log.

use rusqlite::{params, Connection};

use super::{now_db_time, DatabaseError};
use crate::tenant::TenantId;

/// One audit record.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub tenant_id: TenantId,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub details: serde_json::Value,
}

pub fn insert(conn: &Connection, entry: &AuditEntry) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO audit_log (tenant_id, actor, action, entity_type, entity_id, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.tenant_id.as_str(),
            entry.actor,
            entry.action,
            entry.entity_type,
            entry.entity_id,
            entry.details.to_string(),
            now_db_time()
        ],
    )?;
    Ok(())
}

/// Entries for one entity, oldest first.
pub fn list_for_entity(
    conn: &Connection,
    tenant: &TenantId,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<AuditEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT actor, action, entity_type, entity_id, details FROM audit_log
         WHERE tenant_id = ?1 AND entity_type = ?2 AND entity_id = ?3 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![tenant.as_str(), entity_type, entity_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(actor, action, entity_type, entity_id, details)| {
            let details = serde_json::from_str(&details).map_err(|e| DatabaseError::InvalidColumn {
                column: "details",
                reason: e.to_string(),
            })?;
            Ok::<_, DatabaseError>(AuditEntry {
                tenant_id: tenant.clone(),
                actor,
                action,
                entity_type,
                entity_id,
                details,
            })
        })
        .collect()
}
