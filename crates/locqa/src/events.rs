//! Event signals consumed and produced by the pipeline.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::ProcessingMode;
use crate::tenant::TenantId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PipelineEvent {
    #[serde(rename_all = "camelCase")]
    ProcessFile {
        file_id: String,
        project_id: String,
        tenant_id: TenantId,
        mode: ProcessingMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch_id: Option<String>,
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    BatchStarted {
        batch_id: String,
        project_id: String,
        tenant_id: TenantId,
        file_ids: Vec<String>,
        mode: ProcessingMode,
    },
    /// Published exactly once per batch, by the completion guard.
    #[serde(rename_all = "camelCase")]
    BatchCompleted {
        batch_id: String,
        project_id: String,
        tenant_id: TenantId,
        file_ids: Vec<String>,
    },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::ProcessFile { .. } => "process-file",
            PipelineEvent::BatchStarted { .. } => "batch-started",
            PipelineEvent::BatchCompleted { .. } => "batch-completed",
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        match self {
            PipelineEvent::ProcessFile { tenant_id, .. }
            | PipelineEvent::BatchStarted { tenant_id, .. }
            | PipelineEvent::BatchCompleted { tenant_id, .. } => tenant_id,
        }
    }
}

/// Fan-out of pipeline events to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: PipelineEvent) {
        tracing::debug!(event = event.name(), tenant = %event.tenant_id(), "Publishing event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
