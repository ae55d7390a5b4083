use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use secrecy::SecretString;
use tracing::debug;

use super::UpstreamError;
use crate::config::SourceHostSettings;
use crate::domain::RepositoryRef;
use crate::secrets::{duplicate_secret, SecretError};

/// Supplies the access token for a repository, if one is needed.
#[async_trait]
pub trait RepoTokenProvider: Send + Sync {
    async fn token_for(&self, repo: &RepositoryRef) -> Result<Option<SecretString>, UpstreamError>;
}

/// Tokens resolved once from settings: per-repository entries first, then
/// the default token.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    default: Option<SecretString>,
    per_repo: BTreeMap<String, SecretString>,
}

impl StaticTokenProvider {
    pub fn new(default: Option<SecretString>) -> Self {
        Self {
            default,
            per_repo: BTreeMap::new(),
        }
    }

    pub fn with_repository(mut self, full_name: impl Into<String>, token: SecretString) -> Self {
        self.per_repo.insert(full_name.into(), token);
        self
    }

    pub fn from_settings(settings: &SourceHostSettings) -> Result<Self, SecretError> {
        let mut provider = Self::new(settings.token.resolve_optional()?);
        for (name, source) in &settings.repository_tokens {
            if let Some(token) = source.resolve_optional()? {
                provider.per_repo.insert(name.clone(), token);
            }
        }
        Ok(provider)
    }
}

#[async_trait]
impl RepoTokenProvider for StaticTokenProvider {
    async fn token_for(&self, repo: &RepositoryRef) -> Result<Option<SecretString>, UpstreamError> {
        Ok(self
            .per_repo
            .get(&repo.full_name)
            .or(self.default.as_ref())
            .map(duplicate_secret))
    }
}

/// A short-lived token and when it stops working.
#[derive(Debug)]
pub struct IssuedToken {
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// Mints short-lived repository tokens (for example app installation tokens).
///
/// Implemented outside this crate; plug one in with
/// [`ServiceComponents::with_token_issuer`](crate::service::ServiceComponents::with_token_issuer).
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, repo: &RepositoryRef) -> Result<IssuedToken, UpstreamError>;
}

/// Caches issued tokens per repository and reissues them once they are
/// within `expiry_buffer` of expiring.
pub struct CachedTokenProvider<I> {
    issuer: I,
    cache: Cache<String, Arc<IssuedToken>>,
    expiry_buffer: chrono::Duration,
}

impl<I: TokenIssuer> CachedTokenProvider<I> {
    pub fn new(issuer: I, expiry_buffer: Duration) -> Self {
        Self {
            issuer,
            cache: Cache::new(1024),
            expiry_buffer: chrono::Duration::from_std(expiry_buffer)
                .unwrap_or(chrono::Duration::zero()),
        }
    }

    fn fresh(&self, full_name: &str) -> Option<Arc<IssuedToken>> {
        let cached = self.cache.get(full_name)?;
        (cached.expires_at - self.expiry_buffer > Utc::now()).then_some(cached)
    }
}

#[async_trait]
impl<I: TokenIssuer> RepoTokenProvider for CachedTokenProvider<I> {
    async fn token_for(&self, repo: &RepositoryRef) -> Result<Option<SecretString>, UpstreamError> {
        if let Some(cached) = self.fresh(&repo.full_name) {
            return Ok(Some(duplicate_secret(&cached.token)));
        }
        let issued = Arc::new(self.issuer.issue(repo).await?);
        debug!(repository = %repo.full_name, expires_at = %issued.expires_at, "Issued repository token");
        let token = duplicate_secret(&issued.token);
        self.cache.insert(repo.full_name.clone(), issued);
        Ok(Some(token))
    }
}
