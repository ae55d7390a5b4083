//! Narrow access to the repository host: head commits and diffs.

mod github;
mod retry;
mod tokens;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

use crate::domain::RepositoryRef;

pub use github::GitHubClient;
pub use retry::{backoff_delay, with_backoff};
pub use tokens::{CachedTokenProvider, IssuedToken, RepoTokenProvider, StaticTokenProvider, TokenIssuer};

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Request to {url} failed with HTTP {status}: {body}")]
    Http { status: u16, url: String, body: String },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid repository name '{0}' (expected owner/name)")]
    InvalidRepository(String),

    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("No access token for repository '{repository}': {reason}")]
    Token { repository: String, reason: String },
}

impl UpstreamError {
    /// Transport failures, rate limiting and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Transport(e) => !e.is_builder(),
            UpstreamError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// The operations the pipeline needs from the repository host.
#[async_trait]
pub trait SourceHost: Send + Sync {
    /// SHA at the tip of the repository's configured branch.
    async fn head_commit(
        &self,
        repo: &RepositoryRef,
        token: Option<&SecretString>,
    ) -> Result<String, UpstreamError>;

    /// Unified diff of a single commit.
    async fn commit_diff(
        &self,
        repo: &RepositoryRef,
        sha: &str,
        token: Option<&SecretString>,
    ) -> Result<String, UpstreamError>;

    /// Unified diff between two commits.
    async fn compare(
        &self,
        repo: &RepositoryRef,
        base: &str,
        head: &str,
        token: Option<&SecretString>,
    ) -> Result<String, UpstreamError>;

    async fn pull_request_diff(
        &self,
        repo: &RepositoryRef,
        number: u64,
        token: Option<&SecretString>,
    ) -> Result<String, UpstreamError>;
}
