//! Score persistence, debounced triggering and the stale-score sweep.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::compute::{compute_score, ScoringWeights};
use super::debounce::{RecomputeSink, ScoreDebouncer};
use crate::config::ScoringConfig;
use crate::db::{cross_tenant, file_repo, finding_repo, schedule_repo, score_repo, Database, DatabaseError};
use crate::error::PipelineError;
use crate::model::{Score, ScoreStatus};
use crate::tenant::TenantId;

/// Recomputes a file's score from the findings as they are right now.
pub struct ScoreRecomputer {
    db: Database,
    weights: ScoringWeights,
    pass_threshold: f64,
}

impl ScoreRecomputer {
    pub fn new(db: Database, weights: ScoringWeights, pass_threshold: f64) -> Self {
        Self {
            db,
            weights,
            pass_threshold,
        }
    }

    /// Recomputes and stores the score in one transaction.
    pub fn recompute_now(&self, tenant: &TenantId, file_id: &str) -> Result<Score, PipelineError> {
        self.db
            .with_tx(|tx| recompute_in(tx, tenant, file_id, &self.weights, self.pass_threshold))
            .map_err(PipelineError::from)
    }

    /// Same as [`Self::recompute_now`] on a connection the caller already
    /// holds, so a stage can score and transition atomically.
    pub(crate) fn recompute_in(
        &self,
        conn: &Connection,
        tenant: &TenantId,
        file_id: &str,
    ) -> Result<Score, DatabaseError> {
        recompute_in(conn, tenant, file_id, &self.weights, self.pass_threshold)
    }
}

#[async_trait]
impl RecomputeSink for ScoreRecomputer {
    async fn recompute(&self, tenant: &TenantId, file_id: &str) -> Result<(), PipelineError> {
        self.recompute_now(tenant, file_id).map(|_| ())
    }
}

fn recompute_in(
    conn: &Connection,
    tenant: &TenantId,
    file_id: &str,
    weights: &ScoringWeights,
    pass_threshold: f64,
) -> Result<Score, DatabaseError> {
    let file = file_repo::get(conn, tenant, file_id)?;
    let findings = finding_repo::list_by_file(conn, tenant, file_id)?;
    let summary = compute_score(&findings, file.segment_count, weights);

    let score = Score {
        tenant_id: tenant.clone(),
        file_id: file_id.to_string(),
        mqm_score: summary.mqm_score,
        critical_count: summary.counts.critical,
        major_count: summary.counts.major,
        minor_count: summary.counts.minor,
        segment_count: summary.segment_count,
        passed: summary.mqm_score >= pass_threshold,
        status: ScoreStatus::Computed,
        computed_at: Some(Utc::now()),
    };
    score_repo::save(conn, &score)?;
    schedule_repo::clear(conn, tenant, file_id)?;

    debug!(
        tenant = %tenant,
        file_id,
        mqm = score.mqm_score,
        findings = findings.len(),
        "Score recomputed"
    );
    Ok(score)
}

/// Entry point for everything that invalidates a score.
pub struct ScoringService {
    db: Database,
    recomputer: Arc<ScoreRecomputer>,
    debouncer: ScoreDebouncer,
}

impl ScoringService {
    pub fn from_config(db: Database, config: &ScoringConfig) -> Self {
        let recomputer = Arc::new(ScoreRecomputer::new(
            db.clone(),
            config.weights,
            config.pass_threshold,
        ));
        Self::new(db, recomputer, config.debounce())
    }

    pub fn new(db: Database, recomputer: Arc<ScoreRecomputer>, window: Duration) -> Self {
        let sink: Arc<dyn RecomputeSink> = recomputer.clone();
        Self::with_sink(db, recomputer, sink, window)
    }

    /// Routes debounced recomputes to `sink` instead of the recomputer.
    pub fn with_sink(
        db: Database,
        recomputer: Arc<ScoreRecomputer>,
        sink: Arc<dyn RecomputeSink>,
        window: Duration,
    ) -> Self {
        Self {
            db,
            recomputer,
            debouncer: ScoreDebouncer::new(window, sink),
        }
    }

    pub fn recomputer(&self) -> &Arc<ScoreRecomputer> {
        &self.recomputer
    }

    pub fn debouncer(&self) -> &ScoreDebouncer {
        &self.debouncer
    }

    /// Records a durable schedule for the file and (re)starts its timer.
    ///
    /// Without a tokio runtime only the durable schedule is written and the
    /// sweep picks it up. Must not be called while the database lock is held.
    pub fn request_recompute(&self, tenant: &TenantId, file_id: &str) -> Result<(), PipelineError> {
        let window = self.debouncer.window();
        let fire_at = Utc::now()
            + chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        self.db
            .with_conn(|conn| schedule_repo::schedule(conn, tenant, file_id, fire_at))?;

        if tokio::runtime::Handle::try_current().is_ok() {
            self.debouncer.trigger(tenant, file_id);
        } else {
            debug!(file_id, "No runtime, leaving score recompute to the sweep");
        }
        Ok(())
    }

    /// Recomputes every stale score and every overdue schedule,
    /// whether or not a timer is pending for it.
    ///
    /// Returns the number of scores recomputed. One file failing does not stop
    /// the others.
    pub fn sweep_stale(&self) -> Result<usize, PipelineError> {
        let keys: BTreeSet<(TenantId, String)> = self.db.with_conn(|conn| {
            let mut keys: BTreeSet<(TenantId, String)> =
                cross_tenant::stale_score_keys(conn)?.into_iter().collect();
            keys.extend(cross_tenant::due_schedules(conn, Utc::now())?);
            Ok(keys)
        })?;

        let mut recomputed = 0;
        for (tenant, file_id) in &keys {
            match self.recomputer.recompute_now(tenant, file_id) {
                Ok(_) => recomputed += 1,
                Err(e) => {
                    warn!(tenant = %tenant, file_id = %file_id, error = %e, "Sweep recompute failed")
                }
            }
        }

        if recomputed > 0 {
            info!(recomputed, candidates = keys.len(), "Stale score sweep finished");
        }
        Ok(recomputed)
    }
}
