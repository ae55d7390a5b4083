use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::{with_backoff, SourceHost, UpstreamError};
use crate::config::{RetrySettings, SourceHostSettings};
use crate::domain::RepositoryRef;

const ACCEPT_SHA: &str = "application/vnd.github.sha";
const ACCEPT_DIFF: &str = "application/vnd.github.diff";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Error bodies quoted in errors are cut to this many bytes.
const ERROR_BODY_BYTES: usize = 512;

/// [`SourceHost`] backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    api_base: String,
    user_agent: String,
    retry: RetrySettings,
}

impl GitHubClient {
    pub fn new(settings: &SourceHostSettings) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;
        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            user_agent: settings.user_agent.clone(),
            retry: settings.retry,
        })
    }

    fn repo_url(&self, repo: &RepositoryRef, path: &str) -> Result<String, UpstreamError> {
        let (owner, name) = repo
            .owner_and_name()
            .ok_or_else(|| UpstreamError::InvalidRepository(repo.full_name.clone()))?;
        Ok(format!("{}/repos/{owner}/{name}/{path}", self.api_base))
    }

    async fn get_text(
        &self,
        url: &str,
        accept: &'static str,
        token: Option<&SecretString>,
    ) -> Result<String, UpstreamError> {
        with_backoff(self.retry, url, || async {
            let mut request = self
                .client
                .get(url)
                .header(ACCEPT, accept)
                .header(USER_AGENT, &self.user_agent);
            if let Some(token) = token {
                request = request.bearer_auth(token.expose_secret());
            }
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(UpstreamError::Http {
                    status: status.as_u16(),
                    url: url.to_string(),
                    body: crate::sanitize::mask_credentials(&crate::sanitize::excerpt(
                        &body,
                        ERROR_BODY_BYTES,
                    )),
                });
            }
            Ok::<_, UpstreamError>(response.text().await?)
        })
        .await
    }
}

#[async_trait]
impl SourceHost for GitHubClient {
    async fn head_commit(
        &self,
        repo: &RepositoryRef,
        token: Option<&SecretString>,
    ) -> Result<String, UpstreamError> {
        let url = self.repo_url(repo, &format!("commits/{}", repo.branch))?;
        let sha = self.get_text(&url, ACCEPT_SHA, token).await?;
        debug!(repository = %repo.full_name, "Resolved head commit");
        Ok(sha.trim().to_string())
    }

    async fn commit_diff(
        &self,
        repo: &RepositoryRef,
        sha: &str,
        token: Option<&SecretString>,
    ) -> Result<String, UpstreamError> {
        let url = self.repo_url(repo, &format!("commits/{sha}"))?;
        self.get_text(&url, ACCEPT_DIFF, token).await
    }

    async fn compare(
        &self,
        repo: &RepositoryRef,
        base: &str,
        head: &str,
        token: Option<&SecretString>,
    ) -> Result<String, UpstreamError> {
        let url = self.repo_url(repo, &format!("compare/{base}...{head}"))?;
        self.get_text(&url, ACCEPT_DIFF, token).await
    }

    async fn pull_request_diff(
        &self,
        repo: &RepositoryRef,
        number: u64,
        token: Option<&SecretString>,
    ) -> Result<String, UpstreamError> {
        let url = self.repo_url(repo, &format!("pulls/{number}"))?;
        self.get_text(&url, ACCEPT_DIFF, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GitHubClient {
        let settings = SourceHostSettings {
            api_base: "https://git.example.test/api/".into(),
            ..Default::default()
        };
        GitHubClient::new(&settings).unwrap()
    }

    #[test]
    fn test_repo_url() {
        let repo = RepositoryRef::new("acme/widgets", "main");
        assert_eq!(
            client().repo_url(&repo, "compare/a...b").unwrap(),
            "https://git.example.test/api/repos/acme/widgets/compare/a...b"
        );
    }

    #[tokio::test]
    async fn test_malformed_repository_fails_without_request() {
        let repo = RepositoryRef::new("no-slash", "main");
        let result = client().commit_diff(&repo, "abc", None).await;
        assert!(matches!(result, Err(UpstreamError::InvalidRepository(name)) if name == "no-slash"));
    }
}
