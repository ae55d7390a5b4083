//! Wires settings, storage, the sandbox and the worker pool into one handle.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::broadcast::{JobEvent, JobEventBroadcaster};
use crate::config::{validate_settings, Settings, SourceHostSettings};
use crate::db::{self, Database};
use crate::domain::ReviewStatus;
use crate::error::{ConfigError, Result};
use crate::jobs::{JobEnv, JobQueue, JobReport, JobRequest, JobRunner};
use crate::sandbox::{ProcessSandbox, SandboxExecutor};
use crate::upstream::{
    CachedTokenProvider, GitHubClient, RepoTokenProvider, SourceHost, StaticTokenProvider,
    TokenIssuer,
};
use crate::worker::{job_channel, JobSender, SweepScheduler, WorkerPool};
use crate::workflow::WorkflowStateMachine;

/// External collaborators of the pipeline. Production code builds them from
/// settings; tests substitute fakes.
pub struct ServiceComponents {
    pub db: Database,
    pub sandbox: Arc<dyn SandboxExecutor>,
    pub source_host: Arc<dyn SourceHost>,
    pub tokens: Arc<dyn RepoTokenProvider>,
    pub api_key: Option<SecretString>,
}

impl ServiceComponents {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let path = match settings.database_path.clone() {
            Some(path) => path,
            None => db::default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "No databasePath configured and no home directory found".into(),
            })?,
        };
        let db = Database::open(&path)?;
        let api_key = settings.api_key.resolve_optional()?;
        if api_key.is_none() {
            log::warn!("No API key resolved; generation jobs will fail until one is configured");
        }

        Ok(Self {
            db,
            sandbox: Arc::new(ProcessSandbox::new(&settings.sandbox)),
            source_host: Arc::new(GitHubClient::new(&settings.source_host)?),
            tokens: Arc::new(StaticTokenProvider::from_settings(&settings.source_host)?),
            api_key,
        })
    }

    /// Replaces the configured repository tokens with short-lived ones minted
    /// by `issuer` (for example app installation tokens), cached until
    /// `tokenExpiryBufferSecs` before they expire.
    pub fn with_token_issuer<I>(mut self, issuer: I, settings: &SourceHostSettings) -> Self
    where
        I: TokenIssuer + 'static,
    {
        self.tokens = Arc::new(CachedTokenProvider::new(
            issuer,
            Duration::from_secs(settings.token_expiry_buffer_secs),
        ));
        self
    }
}

/// Running pipeline: worker pool, sweep task and event fan-out.
pub struct DocsmithService {
    runner: Arc<JobRunner>,
    sender: JobSender,
    pool: WorkerPool,
    events: JobEventBroadcaster,
    sweep: Option<JoinHandle<()>>,
    sweep_shutdown: watch::Sender<bool>,
}

impl DocsmithService {
    /// Loads components from settings and starts the service. Must be called
    /// inside a tokio runtime.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        validate_settings(&settings)?;
        let components = ServiceComponents::from_settings(&settings)?;
        Ok(Self::start(settings, components))
    }

    pub fn start(settings: Settings, components: ServiceComponents) -> Self {
        let settings = Arc::new(settings);
        let events = JobEventBroadcaster::default();
        let (sender, intake) = job_channel();

        let runner = Arc::new(JobRunner::new(JobEnv {
            db: components.db,
            settings: Arc::clone(&settings),
            sandbox: components.sandbox,
            source_host: components.source_host,
            tokens: components.tokens,
            notifications: Arc::new(events.clone()),
            queue: Arc::new(sender.clone()),
            api_key: components.api_key,
        }));

        let pool = WorkerPool::start(
            Arc::clone(&runner),
            intake,
            settings.worker_count.max(1),
        );

        let (sweep_shutdown, sweep_rx) = watch::channel(false);
        let sweep = settings.sweep.enabled.then(|| {
            SweepScheduler::new(
                runner.workflow().clone(),
                Arc::new(events.clone()),
                settings.sweep,
            )
            .start(sweep_rx)
        });

        log::info!(
            "docsmith started with {} workers (sweep {})",
            settings.worker_count.max(1),
            if sweep.is_some() { "on" } else { "off" }
        );

        Self {
            runner,
            sender,
            pool,
            events,
            sweep,
            sweep_shutdown,
        }
    }

    pub fn enqueue(&self, request: JobRequest) -> Result<()> {
        self.sender.enqueue(request)?;
        Ok(())
    }

    /// Queue handle for triggers that outlive a borrow of the service.
    pub fn sender(&self) -> JobSender {
        self.sender.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Waits for the next finished job.
    pub async fn next_report(&mut self) -> Option<JobReport> {
        self.pool.recv_report().await
    }

    /// Takes a buffered report without waiting.
    pub fn try_next_report(&mut self) -> Option<JobReport> {
        self.pool.try_recv_report()
    }

    pub fn database(&self) -> &Database {
        self.runner.database()
    }

    pub fn workflow(&self) -> &WorkflowStateMachine {
        self.runner.workflow()
    }

    pub fn set_review_status(&self, article_id: &str, review: ReviewStatus) -> Result<()> {
        self.workflow().set_review_status(article_id, review)?;
        Ok(())
    }

    /// Stops the sweep and the workers, waiting for in-flight jobs.
    pub async fn shutdown(self) {
        let _ = self.sweep_shutdown.send(true);
        if let Some(sweep) = self.sweep {
            if let Err(e) = sweep.await {
                log::error!("Sweep task failed: {}", e);
            }
        }
        self.pool.shutdown();
        self.pool.wait().await;
    }
}
