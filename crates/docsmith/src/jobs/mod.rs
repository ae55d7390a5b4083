//! Job orchestration: one run of one job kind against one target.
//!
//! [`JobRunner::run`] owns the run's life cycle (claim, execute, resolve,
//! publish); the per-kind bodies in `handlers` only gather context and map
//! results onto the persister.

mod handlers;
mod request;
mod runner;

use std::time::Duration;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::output::ParseFailure;
use crate::persist::PersistError;
use crate::sandbox::SandboxError;
use crate::upstream::UpstreamError;
use crate::workflow::WorkflowError;

pub use request::{JobKind, JobQueue, JobRequest};
pub use runner::{JobEnv, JobRunner};

/// Failure categories, as reported to users and in telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A required secret or setting was missing.
    Configuration,
    Timeout,
    /// The sandbox could not be prepared, spawned, or exited non-zero.
    Subprocess,
    OutputParse,
    Persistence,
    Upstream,
    Panic,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::Configuration => "configuration",
            FailureKind::Timeout => "timeout",
            FailureKind::Subprocess => "subprocess",
            FailureKind::OutputParse => "output_parse",
            FailureKind::Persistence => "persistence",
            FailureKind::Upstream => "upstream",
            FailureKind::Panic => "panic",
        };
        f.write_str(label)
    }
}

/// Why a run failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    /// The target disappeared mid-run. Not reported as a failure.
    pub target_missing: bool,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            target_missing: false,
        }
    }

    pub(crate) fn staging(error: impl std::fmt::Display) -> Self {
        Self::new(
            FailureKind::Subprocess,
            format!("Failed to stage sandbox input: {error}"),
        )
    }
}

impl From<SandboxError> for JobFailure {
    fn from(err: SandboxError) -> Self {
        let kind = match &err {
            SandboxError::Configuration { .. } => FailureKind::Configuration,
            SandboxError::Timeout { .. } => FailureKind::Timeout,
            SandboxError::NonZeroExit { .. }
            | SandboxError::Spawn { .. }
            | SandboxError::Image { .. }
            | SandboxError::Workspace(_) => FailureKind::Subprocess,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ParseFailure> for JobFailure {
    fn from(failure: ParseFailure) -> Self {
        Self::new(FailureKind::OutputParse, failure.reason)
    }
}

impl From<PersistError> for JobFailure {
    fn from(err: PersistError) -> Self {
        let target_missing = matches!(err, PersistError::TargetMissing { .. });
        Self {
            target_missing,
            ..Self::new(FailureKind::Persistence, err.to_string())
        }
    }
}

impl From<DatabaseError> for JobFailure {
    fn from(err: DatabaseError) -> Self {
        Self::new(FailureKind::Persistence, err.to_string())
    }
}

impl From<WorkflowError> for JobFailure {
    fn from(err: WorkflowError) -> Self {
        Self::new(FailureKind::Persistence, err.to_string())
    }
}

impl From<UpstreamError> for JobFailure {
    fn from(err: UpstreamError) -> Self {
        Self::new(FailureKind::Upstream, err.to_string())
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { summary: String },
    Failed(JobFailure),
    /// The target was gone or there was nothing to do.
    Skipped { reason: String },
    /// Another run holds the target's status.
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub kind: JobKind,
    pub target_id: String,
    pub outcome: JobOutcome,
    pub duration: Duration,
}

impl JobReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed { .. })
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.outcome {
            JobOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}
