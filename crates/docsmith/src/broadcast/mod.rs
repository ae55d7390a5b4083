//! Completion and failure notifications for job runs.

pub mod job_events;

pub use job_events::{EventOutcome, JobEvent, JobEventBroadcaster, NotificationSink};
