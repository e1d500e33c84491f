//! Versioned SQL scripts for the QA schema.

use std::collections::HashSet;

use rusqlite::Connection;

use super::error::DatabaseError;
use super::now_db_time;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_batches_and_files",
        sql: include_str!("sql/001_create_batches_and_files.sql"),
    },
    Migration {
        version: 2,
        description: "create_findings",
        sql: include_str!("sql/002_create_findings.sql"),
    },
    Migration {
        version: 3,
        description: "create_scores",
        sql: include_str!("sql/003_create_scores.sql"),
    },
    Migration {
        version: 4,
        description: "create_tasks",
        sql: include_str!("sql/004_create_tasks.sql"),
    },
    Migration {
        version: 5,
        description: "create_audit_log",
        sql: include_str!("sql/005_create_audit_log.sql"),
    },
];

/// Brings the schema up to date.
///
/// Applied versions are recorded in `_migrations`. Each pending script and
/// its ledger row commit together, so a failed script leaves no trace.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    let applied: HashSet<u32> = {
        let mut stmt = conn.prepare("SELECT version FROM _migrations")?;
        let versions = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<HashSet<u32>, _>>()?;
        versions
    };

    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .collect();
    if pending.is_empty() {
        log::debug!("QA schema is current ({} migrations)", MIGRATIONS.len());
        return Ok(());
    }

    for migration in pending {
        log::info!("Applying schema v{} ({})", migration.version, migration.description);

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.description, now_db_time()],
        )?;
        tx.commit()?;
    }

    Ok(())
}
