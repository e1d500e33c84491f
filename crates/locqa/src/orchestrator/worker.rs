use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Orchestrator;
use crate::events::PipelineEvent;

/// Workers pulling tasks from the durable queue.
///
/// Tasks of different files run side by side; the queue never hands out two
/// tasks of the same file at once.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl WorkerPool {
    /// Starts `worker_count` workers. Must be called inside a tokio runtime.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(orchestrator: Arc<Orchestrator>, worker_count: usize, poll_interval: Duration) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let shutdown = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());

        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&orchestrator),
                    Arc::clone(&shutdown),
                    Arc::clone(&wake),
                    poll_interval,
                ))
            })
            .collect();

        info!("Started {} workers", worker_count);

        Self {
            workers,
            shutdown,
            wake,
        }
    }

    /// Wakes idle workers, e.g. right after new work was enqueued.
    pub fn notify(&self) {
        self.wake.notify_waiters();
    }

    /// Asks workers to stop after their current task. A running stage is
    /// never interrupted.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
        self.wake.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub async fn wait(self) {
        let results = join_all(self.workers).await;
        for (i, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    orchestrator: Arc<Orchestrator>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    poll_interval: Duration,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match orchestrator.run_next_task().await {
            Ok(true) => continue,
            Ok(false) => {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                error!(worker_id, error_kind = e.kind(), error = %e, "Task execution failed");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Feeds events from the bus into [`Orchestrator::handle_event`].
///
/// Stops when the bus is closed. A lagging listener logs the gap and goes on;
/// batch completion does not depend on the event because the guard enqueues
/// the cross-file task itself.
pub fn spawn_event_listener(
    orchestrator: Arc<Orchestrator>,
    mut events: broadcast::Receiver<PipelineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = orchestrator.handle_event(&event) {
                        warn!(event = event.name(), error = %e, "Event rejected");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event listener lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, listener stopping");
                    break;
                }
            }
        }
    })
}
