//! Periodic recovery of runs left `running` by a crashed or killed process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broadcast::{JobEvent, NotificationSink};
use crate::config::SweepSettings;
use crate::workflow::{StatusTarget, WorkflowError, WorkflowStateMachine};

pub struct SweepScheduler {
    workflow: WorkflowStateMachine,
    notifications: Arc<dyn NotificationSink>,
    interval: Duration,
    stale_after: Duration,
}

impl SweepScheduler {
    pub fn new(
        workflow: WorkflowStateMachine,
        notifications: Arc<dyn NotificationSink>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            workflow,
            notifications,
            interval: Duration::from_secs(settings.interval_secs.max(1)),
            stale_after: Duration::from_secs(settings.stale_after_secs),
        }
    }

    /// Fails every stale run and publishes a failure event for each.
    pub fn sweep_once(&self) -> Result<Vec<StatusTarget>, WorkflowError> {
        let reaped = self.workflow.reap_stale(self.stale_after)?;
        let message = format!(
            "Run did not finish within {}s and was marked failed",
            self.stale_after.as_secs()
        );
        for target in &reaped {
            self.notifications.publish(JobEvent::failed(
                None,
                target.entity_kind(),
                &target.id,
                &message,
            ));
        }
        if !reaped.is_empty() {
            log::warn!("Stale-run sweep failed {} runs", reaped.len());
        }
        Ok(reaped)
    }

    /// Sweeps immediately, then every interval until `shutdown` flips.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {},
                    _ = shutdown.changed() => {},
                }
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = self.sweep_once() {
                    log::error!("Stale-run sweep failed: {}", e);
                }
            }
            log::debug!("Stale-run sweep stopped");
        })
    }
}
