use crate::domain::job::{ItemError, ItemStatus, JobId, JobStatus};
use serde::Serialize;
use tokio::sync::broadcast;

/// Progress notifications pushed by the orchestrator while jobs execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum BatchEvent {
    JobStatusChanged {
        job_id: JobId,
        status: JobStatus,
    },
    ItemClaimed {
        job_id: JobId,
        item_index: u32,
    },
    /// A retryable attempt failed and the item will be tried again.
    ItemAttempted {
        job_id: JobId,
        item_index: u32,
        attempt: u32,
        error: ItemError,
    },
    ItemFinished {
        job_id: JobId,
        item_index: u32,
        status: ItemStatus,
    },
    JobDegraded {
        job_id: JobId,
        reason: String,
    },
    /// Every worker of the job has stopped; nothing is in flight any more.
    JobSettled {
        job_id: JobId,
        status: JobStatus,
    },
}

pub type EventSender = broadcast::Sender<BatchEvent>;

pub(crate) fn publish(events: &EventSender, event: BatchEvent) {
    // No subscribers is fine.
    let _ = events.send(event);
}
