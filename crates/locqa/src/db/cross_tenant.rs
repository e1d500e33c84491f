//! Infrastructure queries that read across tenants.
//!
//! Every other repository function takes a [`TenantId`] and filters on it.
//! The queue claim, crash recovery and the reconciliation sweeps cannot: they
//! discover work before knowing whose it is. Those queries live here and only
//! here. Each returns the tenant of every row it yields, and callers carry
//! that tenant into all later queries.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::task_repo::Task;
use super::{now_db_time, parse_tenant, to_db_time, DatabaseError};
use crate::model::ScoreStatus;
use crate::tenant::TenantId;

/// Claims the oldest runnable task of any tenant.
///
/// Skips subjects that already have a running task, so the stages of one file
/// never run side by side even with many workers.
pub fn claim_next(conn: &Connection, now: DateTime<Utc>) -> Result<Option<Task>, DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    let candidate: Option<String> = tx
        .query_row(
            "SELECT t.id FROM tasks t
             WHERE t.status = 'queued' AND t.run_after <= ?1
               AND NOT EXISTS (
                   SELECT 1 FROM tasks r
                   WHERE r.tenant_id = t.tenant_id AND r.subject_id = t.subject_id
                     AND r.status = 'running')
             ORDER BY t.run_after, t.created_at, t.rowid
             LIMIT 1",
            params![to_db_time(now)],
            |r| r.get(0),
        )
        .optional()?;

    let Some(id) = candidate else {
        return Ok(None);
    };

    tx.execute(
        "UPDATE tasks SET status = 'running', attempts = attempts + 1, updated_at = ?2
         WHERE id = ?1 AND status = 'queued'",
        params![id, now_db_time()],
    )?;
    let task = tx.query_row("SELECT * FROM tasks WHERE id = ?1", params![id], Task::from_row)?;
    tx.commit()?;
    Ok(Some(task))
}

/// Returns tasks interrupted by a previous process to the queue.
///
/// Stages are never cancelled mid-flight, so a `running` row at startup means
/// the process died. Re-running is safe because every stage is idempotent.
pub fn requeue_running(conn: &Connection) -> Result<usize, DatabaseError> {
    let now = now_db_time();
    let count = conn.execute(
        "UPDATE tasks SET status = 'queued', run_after = ?1, updated_at = ?1 WHERE status = 'running'",
        params![now],
    )?;
    Ok(count)
}

/// Queued or running tasks over all tenants.
pub fn count_pending(conn: &Connection) -> Result<u64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE status IN ('queued', 'running')",
        [],
        |r| r.get(0),
    )?)
}

/// Every `(tenant, file)` whose score is stale.
pub fn stale_score_keys(conn: &Connection) -> Result<Vec<(TenantId, String)>, DatabaseError> {
    tenant_pairs(
        conn,
        "SELECT tenant_id, file_id FROM scores WHERE status = ?1 ORDER BY updated_at",
        ScoreStatus::Stale.as_str(),
    )
}

/// Debounce schedules whose fire time has passed.
pub fn due_schedules(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<(TenantId, String)>, DatabaseError> {
    tenant_pairs(
        conn,
        "SELECT tenant_id, file_id FROM score_schedule WHERE fire_at <= ?1 ORDER BY fire_at",
        &to_db_time(now),
    )
}

/// Every `(tenant, batch)` that has not completed yet.
pub fn open_batches(conn: &Connection) -> Result<Vec<(TenantId, String)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT tenant_id, id FROM batches WHERE completed = 0 ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    into_tenant_pairs(rows)
}

fn tenant_pairs(conn: &Connection, sql: &str, arg: &str) -> Result<Vec<(TenantId, String)>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![arg], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    into_tenant_pairs(rows)
}

fn into_tenant_pairs(rows: Vec<(String, String)>) -> Result<Vec<(TenantId, String)>, DatabaseError> {
    rows.into_iter()
        .map(|(tenant, id)| Ok((parse_tenant(tenant)?, id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::batch_repo::{self, NewBatch};
    use crate::db::{score_repo, task_repo, Database};
    use crate::model::{ProcessingMode, Stage};

    fn tenant(name: &str) -> TenantId {
        TenantId::new(name).unwrap()
    }

    #[test]
    fn test_claim_returns_the_owning_tenant() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            task_repo::enqueue_stage(conn, &tenant("acme"), "f1", Stage::Parse)?;
            task_repo::enqueue_stage(conn, &tenant("globex"), "f1", Stage::Parse)?;

            let first = claim_next(conn, Utc::now())?.unwrap();
            let second = claim_next(conn, Utc::now())?.unwrap();
            assert_eq!(first.tenant_id, tenant("acme"));
            // Same subject id under another tenant is a different subject.
            assert_eq!(second.tenant_id, tenant("globex"));
            assert_eq!(count_pending(conn)?, 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_sweep_keys_span_tenants() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            score_repo::mark_stale(conn, &tenant("acme"), "f1")?;
            score_repo::mark_stale(conn, &tenant("globex"), "f9")?;
            let mut keys = stale_score_keys(conn)?;
            keys.sort();
            assert_eq!(
                keys,
                vec![
                    (tenant("acme"), "f1".to_string()),
                    (tenant("globex"), "f9".to_string())
                ]
            );
            assert!(due_schedules(conn, Utc::now())?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_batches_excludes_completed() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            for (t, id) in [("acme", "b1"), ("globex", "b2")] {
                batch_repo::insert_if_absent(
                    conn,
                    &NewBatch {
                        id: id.to_string(),
                        tenant_id: tenant(t),
                        project_id: "p1".to_string(),
                        mode: ProcessingMode::Economy,
                        glossary_id: None,
                    },
                )?;
            }
            conn.execute("UPDATE batches SET completed = 1 WHERE id = 'b2'", [])?;

            assert_eq!(open_batches(conn)?, vec![(tenant("acme"), "b1".to_string())]);
            Ok(())
        })
        .unwrap();
    }
}
