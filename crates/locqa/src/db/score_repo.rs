//! Derived per-file scores.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_db_time, parse_column, parse_opt_db_time, parse_tenant, DatabaseError};
use crate::model::Score;
use crate::tenant::TenantId;

struct ScoreRow {
    tenant_id: String,
    file_id: String,
    mqm_score: f64,
    critical_count: u32,
    major_count: u32,
    minor_count: u32,
    segment_count: u32,
    passed: bool,
    status: String,
    computed_at: Option<String>,
}

impl ScoreRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            tenant_id: row.get("tenant_id")?,
            file_id: row.get("file_id")?,
            mqm_score: row.get("mqm_score")?,
            critical_count: row.get("critical_count")?,
            major_count: row.get("major_count")?,
            minor_count: row.get("minor_count")?,
            segment_count: row.get("segment_count")?,
            passed: row.get("passed")?,
            status: row.get("status")?,
            computed_at: row.get("computed_at")?,
        })
    }

    fn into_score(self) -> Result<Score, DatabaseError> {
        Ok(Score {
            tenant_id: parse_tenant(self.tenant_id)?,
            status: parse_column("status", &self.status)?,
            computed_at: parse_opt_db_time("computed_at", self.computed_at)?,
            file_id: self.file_id,
            mqm_score: self.mqm_score,
            critical_count: self.critical_count,
            major_count: self.major_count,
            minor_count: self.minor_count,
            segment_count: self.segment_count,
            passed: self.passed,
        })
    }
}

pub fn find(conn: &Connection, tenant: &TenantId, file_id: &str) -> Result<Option<Score>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM scores WHERE tenant_id = ?1 AND file_id = ?2",
            params![tenant.as_str(), file_id],
            ScoreRow::from_row,
        )
        .optional()?;
    row.map(ScoreRow::into_score).transpose()
}

/// Writes a freshly computed score with status `computed`.
pub fn save(conn: &Connection, score: &Score) -> Result<(), DatabaseError> {
    let now = now_db_time();
    conn.execute(
        "INSERT INTO scores (tenant_id, file_id, mqm_score, critical_count, major_count,
         minor_count, segment_count, passed, status, computed_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'computed', ?9, ?9)
         ON CONFLICT (tenant_id, file_id) DO UPDATE SET
             mqm_score = excluded.mqm_score,
             critical_count = excluded.critical_count,
             major_count = excluded.major_count,
             minor_count = excluded.minor_count,
             segment_count = excluded.segment_count,
             passed = excluded.passed,
             status = 'computed',
             computed_at = excluded.computed_at,
             updated_at = excluded.updated_at",
        params![
            score.tenant_id.as_str(),
            score.file_id,
            score.mqm_score,
            score.critical_count,
            score.major_count,
            score.minor_count,
            score.segment_count,
            score.passed,
            now
        ],
    )?;
    Ok(())
}

/// Flags the score as out of date, creating the row if needed.
pub fn mark_stale(conn: &Connection, tenant: &TenantId, file_id: &str) -> Result<(), DatabaseError> {
    let now = now_db_time();
    conn.execute(
        "INSERT INTO scores (tenant_id, file_id, status, updated_at)
         VALUES (?1, ?2, 'stale', ?3)
         ON CONFLICT (tenant_id, file_id) DO UPDATE SET status = 'stale', updated_at = excluded.updated_at",
        params![tenant.as_str(), file_id, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::cross_tenant::stale_score_keys;
    use crate::model::ScoreStatus;
    use crate::db::Database;

    fn score(tenant: &TenantId, mqm: f64) -> Score {
        Score {
            tenant_id: tenant.clone(),
            file_id: "f1".to_string(),
            mqm_score: mqm,
            critical_count: 0,
            major_count: 1,
            minor_count: 2,
            segment_count: 10,
            passed: false,
            status: ScoreStatus::Computed,
            computed_at: None,
        }
    }

    #[test]
    fn test_stale_then_recomputed() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId::new("acme").unwrap();
        db.with_conn(|conn| {
            mark_stale(conn, &tenant, "f1")?;
            assert_eq!(find(conn, &tenant, "f1")?.unwrap().status, ScoreStatus::Stale);
            assert_eq!(stale_score_keys(conn)?, vec![(tenant.clone(), "f1".to_string())]);

            save(conn, &score(&tenant, 93.0))?;
            let stored = find(conn, &tenant, "f1")?.unwrap();
            assert_eq!(stored.status, ScoreStatus::Computed);
            assert_eq!(stored.mqm_score, 93.0);
            assert!(stored.computed_at.is_some());
            assert!(stale_score_keys(conn)?.is_empty());

            mark_stale(conn, &tenant, "f1")?;
            let stale = find(conn, &tenant, "f1")?.unwrap();
            assert_eq!(stale.status, ScoreStatus::Stale);
            assert_eq!(stale.mqm_score, 93.0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_scores_are_tenant_scoped() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId::new("acme").unwrap();
        db.with_conn(|conn| {
            save(conn, &score(&tenant, 99.0))?;
            assert!(find(conn, &TenantId::new("globex").unwrap(), "f1")?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
