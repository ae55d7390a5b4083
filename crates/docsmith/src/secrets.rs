//! Secret resolution for credentials handed to the sandbox.
//!
//! Settings never embed secrets directly in long-lived state. Each secret is
//! described by a [`SecretSource`] and resolved at the moment it is needed,
//! in priority order:
//!
//! 1. **Direct value** (`"value": "..."`), for local testing
//! 2. **File reference** (`"file": "/run/secrets/api_key"`), for mounted secrets
//! 3. **Env var reference** (`"envVar": "DOCSMITH_API_KEY"`), for deployments

use std::fs;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where to find one secret. All three fields are optional; the first
/// non-empty one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecretSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl SecretSource {
    /// A source that reads the named environment variable.
    pub fn env(name: impl Into<String>) -> Self {
        Self {
            env_var: Some(name.into()),
            ..Default::default()
        }
    }

    /// Resolves the secret, failing if no source yields a value.
    pub fn resolve(&self) -> Result<SecretString> {
        resolve_secret(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }

    /// Resolves the secret, treating an unset source as absent.
    ///
    /// An unset environment variable is also absent here: a deployment that
    /// configures no token simply runs without one.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>> {
        match self.resolve() {
            Ok(secret) => Ok(Some(secret)),
            Err(SecretError::NoSourceProvided | SecretError::EnvVarNotSet { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn is_configured(&self) -> bool {
        has_secret_source(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }
}

/// Resolves a secret from a direct value, then a file, then an env var.
/// Empty strings count as "not provided".
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return fs::read_to_string(&expanded)
            .map(|content| SecretString::from(content.trim().to_string()))
            .map_err(|source| SecretError::FileReadError {
                path: expanded,
                source,
            });
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            // Env vars set from files often carry a trailing newline.
            Ok(value) => Ok(SecretString::from(value.trim())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Makes an independent copy of a secret without leaving the wrapper.
pub fn duplicate_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret())
}

/// Checks if at least one secret source is configured (non-empty).
pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    direct.is_some_and(|s| !s.is_empty())
        || file_path.is_some_and(|s| !s.is_empty())
        || env_var.is_some_and(|s| !s.is_empty())
}

/// Expands a leading `~` or `~/` to the current user's home directory.
/// `~user/...` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}
