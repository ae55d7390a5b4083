//! Bounded, isolated execution of one generation capability.
//!
//! A run gets a fresh [`SandboxWorkspace`], a structured
//! [`SandboxInvocation`] and a wall-clock timeout. Only the workspace's
//! `output/` directory is a result channel; captured stdout/stderr are for
//! diagnostics.

mod entry_point;
mod invocation;
mod process;
mod workspace;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use entry_point::EntryPoint;
pub use invocation::{
    SandboxInvocation, API_KEY_ENV, MODEL_ENV, REPOSITORIES_ENV, REPOSITORY_TOKENS_ENV,
    REPOSITORY_TOKEN_ENV,
};
pub use process::ProcessSandbox;
pub use workspace::SandboxWorkspace;

/// Bytes of stderr kept in error values.
pub const DIAGNOSTIC_TAIL_BYTES: usize = 4096;

/// Runs one invocation against a prepared workspace.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn execute(
        &self,
        invocation: &SandboxInvocation,
        workspace: &SandboxWorkspace,
    ) -> Result<ExecutionReport, SandboxError>;
}

/// A run that exited with status zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionReport {
    pub fn stderr_tail(&self) -> String {
        crate::sanitize::tail(&self.stderr, DIAGNOSTIC_TAIL_BYTES)
    }
}

#[derive(Error, Debug)]
pub enum SandboxError {
    /// A required secret was unavailable. Raised before anything is spawned.
    #[error("Missing required secrets for {entry_point}: {}", .missing.join(", "))]
    Configuration {
        entry_point: EntryPoint,
        missing: Vec<String>,
    },

    #[error("{entry_point} timed out after {}s", .timeout.as_secs())]
    Timeout {
        entry_point: EntryPoint,
        timeout: Duration,
        stderr_tail: String,
    },

    #[error("{entry_point} exited with {}: {stderr_tail}", exit_label(.code))]
    NonZeroExit {
        entry_point: EntryPoint,
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sandbox image '{image}' unavailable: {reason}")]
    Image { image: String, reason: String },

    #[error("Failed to prepare sandbox workspace: {0}")]
    Workspace(#[source] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}
