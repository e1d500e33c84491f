//! Durable debounce schedule: at most one pending recompute per file.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{to_db_time, DatabaseError};
use crate::tenant::TenantId;

/// Schedules a recompute at `fire_at`, replacing any earlier schedule.
pub fn schedule(
    conn: &Connection,
    tenant: &TenantId,
    file_id: &str,
    fire_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO score_schedule (tenant_id, file_id, fire_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (tenant_id, file_id) DO UPDATE SET fire_at = excluded.fire_at",
        params![tenant.as_str(), file_id, to_db_time(fire_at)],
    )?;
    Ok(())
}

pub fn clear(conn: &Connection, tenant: &TenantId, file_id: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM score_schedule WHERE tenant_id = ?1 AND file_id = ?2",
        params![tenant.as_str(), file_id],
    )?;
    Ok(())
}
