//! Periodic reconciliation of stale scores.
//!
//! Runs [`ScoringService::sweep_stale`] on a fixed interval and on manual
//! trigger via broadcast channel. Correctness of scores never depends on the
//! debounce timers; this loop is the backstop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::service::ScoringService;

pub struct StaleScoreSweeper {
    scoring: Arc<ScoringService>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl StaleScoreSweeper {
    pub fn new(scoring: Arc<ScoringService>, interval: Duration) -> Self {
        Self {
            scoring,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the sweep loop on the current runtime.
    /// Accepts a trigger receiver for manual sweep requests.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let scoring = Arc::clone(&self.scoring);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.tick().await; // skip immediate first tick

            loop {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    _ = interval_timer.tick() => {},
                    Ok(()) = trigger_rx.recv() => {
                        tracing::info!("Manual score sweep triggered");
                    },
                }

                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                // The sweep holds the database lock per file; keep it off the reactor.
                let scoring = Arc::clone(&scoring);
                match tokio::task::spawn_blocking(move || scoring.sweep_stale()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::error!(error = %e, "Score sweep failed"),
                    Err(e) => tracing::error!(error = %e, "Score sweep task panicked"),
                }
            }
            tracing::debug!("Score sweeper stopped");
        })
    }

    /// Signals the sweeper to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::db::{file_repo, score_repo, Database};
    use crate::model::{NewFile, ProcessingMode, ScoreStatus};
    use crate::tenant::TenantId;

    #[tokio::test]
    async fn test_sweeper_recomputes_on_trigger_and_stops() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId::new("t1").unwrap();
        db.with_conn(|conn| {
            file_repo::insert_if_absent(
                conn,
                &NewFile {
                    id: "f1".into(),
                    tenant_id: tenant.clone(),
                    project_id: "p1".into(),
                    file_name: "a.po".into(),
                    mode: ProcessingMode::Economy,
                },
            )?;
            score_repo::mark_stale(conn, &tenant, "f1")
        })
        .unwrap();

        let scoring = Arc::new(ScoringService::from_config(db.clone(), &ScoringConfig::default()));
        let sweeper = StaleScoreSweeper::new(scoring, Duration::from_secs(3600));
        let (trigger_tx, trigger_rx) = broadcast::channel(4);
        let handle = sweeper.start(trigger_rx);

        trigger_tx.send(()).unwrap();
        let mut computed = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let score = db
                .with_conn(|conn| score_repo::find(conn, &tenant, "f1"))
                .unwrap()
                .unwrap();
            if score.status == ScoreStatus::Computed {
                computed = true;
                break;
            }
        }
        assert!(computed);

        sweeper.stop();
        // Wake the select loop so it sees the shutdown
        let _ = trigger_tx.send(());
        handle.await.unwrap();
    }
}
