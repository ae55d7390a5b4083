//! Job outcome events for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::EntityKind;
use crate::jobs::JobKind;

/// How a run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Completed,
    Failed,
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventOutcome::Completed => write!(f, "Completed"),
            EventOutcome::Failed => write!(f, "Failed"),
        }
    }
}

/// Outcome of one run against one entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub outcome: EventOutcome,
    /// Human-readable summary or error.
    pub message: String,
    /// Absent for runs failed by the stale-run sweep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_kind: Option<JobKind>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn completed(kind: JobKind, entity_type: EntityKind, entity_id: &str, message: &str) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.to_string(),
            outcome: EventOutcome::Completed,
            message: message.to_string(),
            job_kind: Some(kind),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        kind: Option<JobKind>,
        entity_type: EntityKind,
        entity_id: &str,
        error: &str,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.to_string(),
            outcome: EventOutcome::Failed,
            message: error.to_string(),
            job_kind: kind,
            timestamp: Utc::now(),
        }
    }
}

/// Receives job outcome events. Publishing never fails the job.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: JobEvent);
}

/// Fans job events out to any number of subscribers.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

impl NotificationSink for JobEventBroadcaster {
    fn publish(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}
