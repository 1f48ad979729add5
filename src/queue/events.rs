//! Job lifecycle events.

use super::{JobId, Priority};
use serde::Serialize;
use tokio::sync::broadcast;

/// A job lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job entered the heap.
    Enqueued {
        /// Job identifier.
        id: JobId,
        /// Job type string.
        job_type: &'static str,
        /// Dispatch priority.
        priority: Priority,
    },
    /// The worker started an attempt.
    Started {
        /// Job identifier.
        id: JobId,
        /// Job type string.
        job_type: &'static str,
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// An attempt failed and the job will run again after `delay_ms`.
    RetryScheduled {
        /// Job identifier.
        id: JobId,
        /// Attempt that failed.
        attempt: u32,
        /// Backoff delay.
        delay_ms: u64,
        /// Failure message.
        error: String,
    },
    /// The job finished successfully.
    Completed {
        /// Job identifier.
        id: JobId,
        /// Job type string.
        job_type: &'static str,
        /// Attempts used.
        attempts: u32,
    },
    /// The job failed permanently.
    Failed {
        /// Job identifier.
        id: JobId,
        /// Job type string.
        job_type: &'static str,
        /// Attempts used.
        attempts: u32,
        /// Failure message.
        error: String,
    },
    /// Pending jobs were discarded.
    Cleared {
        /// Number of discarded jobs.
        count: usize,
    },
}

impl JobEvent {
    /// Short name of the event, matching its serialized tag.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Started { .. } => "started",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cleared { .. } => "cleared",
        }
    }

    /// The job this event concerns, if any.
    #[must_use]
    pub const fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Enqueued { id, .. }
            | Self::Started { id, .. }
            | Self::RetryScheduled { id, .. }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. } => Some(*id),
            Self::Cleared { .. } => None,
        }
    }
}

/// Broadcast channel for job events.
///
/// Publishing never blocks and never fails the caller; with no subscribers
/// events are dropped.
#[derive(Debug, Clone)]
pub(crate) struct EventChannel {
    sender: broadcast::Sender<JobEvent>,
}

impl EventChannel {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn publish(&self, event: JobEvent) {
        metrics::counter!("feedgate_job_events_total", "event" => event.event_type()).increment(1);
        if self.sender.send(event).is_err() {
            metrics::counter!("feedgate_job_events_dropped_total").increment(1);
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}
