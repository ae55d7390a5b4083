pub mod broadcast;
pub mod config;
pub mod context;
pub mod db;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod output;
pub mod persist;
pub mod sandbox;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod upstream;
pub mod usage;
pub mod worker;
pub mod workflow;

pub use broadcast::{EventOutcome, JobEvent, JobEventBroadcaster, NotificationSink};
pub use config::{load_settings, load_settings_from_str, Settings};
pub use db::Database;
pub use error::{ConfigError, DocsmithError, Result, WorkerError};
pub use jobs::{FailureKind, JobFailure, JobKind, JobOutcome, JobQueue, JobReport, JobRequest, JobRunner};
pub use logging::{init_logging, LogFormat};
pub use output::{ParseFailure, ParseOutcome};
pub use sandbox::{EntryPoint, ProcessSandbox, SandboxError, SandboxExecutor};
pub use secrets::{SecretError, SecretSource};
pub use service::{DocsmithService, ServiceComponents};
pub use upstream::{GitHubClient, SourceHost, UpstreamError};
pub use workflow::{StatusTarget, WorkflowError, WorkflowStateMachine};
