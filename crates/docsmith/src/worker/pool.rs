use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::WorkerError;
use crate::jobs::{JobQueue, JobReport, JobRequest, JobRunner};

/// Cloneable handle for submitting jobs to the pool.
#[derive(Clone)]
pub struct JobSender {
    tx: mpsc::UnboundedSender<JobRequest>,
}

impl JobQueue for JobSender {
    fn enqueue(&self, request: JobRequest) -> Result<(), WorkerError> {
        self.tx
            .send(request)
            .map_err(|_| WorkerError::ChannelClosed)
    }
}

/// Receiving side of the job channel, consumed by [`WorkerPool::start`].
pub struct JobIntake {
    rx: mpsc::UnboundedReceiver<JobRequest>,
}

/// Creates the job channel. The sender exists before the pool so the runner
/// can use it for cascades.
pub fn job_channel() -> (JobSender, JobIntake) {
    let (tx, rx) = mpsc::unbounded_channel();
    (JobSender { tx }, JobIntake { rx })
}

/// Finished-job reports buffered per worker. Reports beyond the buffer are
/// dropped; job events are the durable signal.
pub const REPORTS_PER_WORKER: usize = 2;

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    reports: mpsc::Receiver<JobReport>,
}

impl WorkerPool {
    /// Spawns `worker_count` tasks on the current runtime.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(runner: Arc<JobRunner>, intake: JobIntake, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let intake = Arc::new(Mutex::new(intake.rx));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (report_tx, reports) = mpsc::channel(Self::report_capacity(worker_count));

        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&intake),
                    shutdown_rx.clone(),
                    Arc::clone(&runner),
                    report_tx.clone(),
                ))
            })
            .collect();

        info!("Started {} workers", worker_count);

        Self {
            workers,
            shutdown,
            reports,
        }
    }

    pub fn report_capacity(worker_count: usize) -> usize {
        worker_count * REPORTS_PER_WORKER
    }

    /// Waits for the next finished job.
    pub async fn recv_report(&mut self) -> Option<JobReport> {
        self.reports.recv().await
    }

    pub fn try_recv_report(&mut self) -> Option<JobReport> {
        self.reports.try_recv().ok()
    }

    /// Stops taking new jobs. Jobs already running finish.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        let _ = self.shutdown.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        info!("All workers have stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    intake: Arc<Mutex<mpsc::UnboundedReceiver<JobRequest>>>,
    mut shutdown: watch::Receiver<bool>,
    runner: Arc<JobRunner>,
    reports: mpsc::Sender<JobReport>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if *shutdown.borrow() {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        let next = {
            let mut rx = intake.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                request = rx.recv() => request,
            }
        };

        let Some(request) = next else {
            debug!("Worker {} stopping", worker_id);
            break;
        };

        debug!("Worker {} processing {:?}", worker_id, request);
        let report = runner.run(request).await;
        match reports.try_send(report) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(report)) => {
                debug!(
                    "Worker {} dropped report for {} {}: report buffer full",
                    worker_id, report.kind, report.target_id
                );
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
