//! Per-file, single-flight recompute timers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::tenant::TenantId;

/// Receiver of debounced recompute requests.
#[async_trait]
pub trait RecomputeSink: Send + Sync {
    async fn recompute(&self, tenant: &TenantId, file_id: &str) -> Result<(), PipelineError>;
}

type Key = (TenantId, String);
type PendingMap = HashMap<Key, (u64, JoinHandle<()>)>;

/// Collapses bursts of triggers into one recompute per file.
///
/// Each trigger replaces the pending timer for its file. When a timer fires
/// it only proceeds if it is still the latest one for that file, so at most
/// one logical timer exists per file at any time.
pub struct ScoreDebouncer {
    window: Duration,
    sink: Arc<dyn RecomputeSink>,
    pending: Arc<Mutex<PendingMap>>,
    generation: AtomicU64,
}

impl ScoreDebouncer {
    pub fn new(window: Duration, sink: Arc<dyn RecomputeSink>) -> Self {
        Self {
            window,
            sink,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Starts or restarts the quiet window for a file.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger(&self, tenant: &TenantId, file_id: &str) {
        let key: Key = (tenant.clone(), file_id.to_string());
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let Ok(mut pending) = self.pending.lock() else {
            warn!(file_id, "Debounce map poisoned, leaving recompute to the sweep");
            return;
        };

        let handle = tokio::spawn(fire_after(
            self.window,
            key.clone(),
            generation,
            Arc::clone(&self.pending),
            Arc::clone(&self.sink),
        ));

        if let Some((_, previous)) = pending.insert(key, (generation, handle)) {
            previous.abort();
            debug!(tenant = %tenant, file_id, "Replaced pending score recompute");
        }
    }

    /// Number of files with a pending timer.
    pub fn pending(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Drops every pending timer. Durable schedules remain for the sweep.
    pub fn cancel_all(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            for (_, (_, handle)) in pending.drain() {
                handle.abort();
            }
        }
    }
}

impl Drop for ScoreDebouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn fire_after(
    window: Duration,
    key: Key,
    generation: u64,
    pending: Arc<Mutex<PendingMap>>,
    sink: Arc<dyn RecomputeSink>,
) {
    tokio::time::sleep(window).await;

    {
        let Ok(mut map) = pending.lock() else {
            return;
        };
        match map.get(&key) {
            Some((current, _)) if *current == generation => {
                map.remove(&key);
            }
            // Superseded by a later trigger.
            _ => return,
        }
    }

    let (tenant, file_id) = key;
    debug!(tenant = %tenant, file_id = %file_id, "Debounce window elapsed, recomputing score");
    if let Err(e) = sink.recompute(&tenant, &file_id).await {
        warn!(tenant = %tenant, file_id = %file_id, error = %e, "Debounced score recompute failed");
    }
}
