use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use secrecy::SecretString;

use super::EntryPoint;

/// Credential for the generation capability.
pub const API_KEY_ENV: &str = "DOCSMITH_API_KEY";
/// Model identifier.
pub const MODEL_ENV: &str = "DOCSMITH_MODEL";
/// JSON list of `owner/name` repositories the project spans.
pub const REPOSITORIES_ENV: &str = "DOCSMITH_REPOSITORIES";
/// Access token for the primary repository.
pub const REPOSITORY_TOKEN_ENV: &str = "GITHUB_TOKEN";
/// JSON object of `owner/name` to token, for multi-repository projects.
pub const REPOSITORY_TOKENS_ENV: &str = "DOCSMITH_REPOSITORY_TOKENS";

/// Everything needed to run one entry point, without any command-line
/// string building. Secrets stay wrapped until the moment they are handed to
/// the child process environment.
#[derive(Debug)]
pub struct SandboxInvocation {
    pub entry_point: EntryPoint,
    pub timeout: Duration,
    secrets: BTreeMap<String, SecretString>,
    config: BTreeMap<String, String>,
    required: BTreeSet<String>,
}

impl SandboxInvocation {
    pub fn new(entry_point: EntryPoint, timeout: Duration) -> Self {
        Self {
            entry_point,
            timeout,
            secrets: BTreeMap::new(),
            config: BTreeMap::new(),
            required: BTreeSet::new(),
        }
    }

    /// Adds a secret. `None` leaves it unset (which fails the invocation
    /// only if the name is also required).
    pub fn secret(mut self, name: &str, value: Option<SecretString>) -> Self {
        if let Some(value) = value {
            self.secrets.insert(name.to_string(), value);
        }
        self
    }

    /// Marks a secret as mandatory for this entry point.
    pub fn require(mut self, name: &str) -> Self {
        self.required.insert(name.to_string());
        self
    }

    /// Adds a non-secret configuration value.
    pub fn config(mut self, name: &str, value: impl Into<String>) -> Self {
        self.config.insert(name.to_string(), value.into());
        self
    }

    /// Required secret names that have no value, in name order.
    pub fn missing_secrets(&self) -> Vec<String> {
        self.required
            .iter()
            .filter(|name| !self.secrets.contains_key(*name))
            .cloned()
            .collect()
    }

    pub fn secrets(&self) -> &BTreeMap<String, SecretString> {
        &self.secrets
    }

    pub fn config_values(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    /// Every variable name the child will see, secrets and config alike.
    pub fn env_names(&self) -> impl Iterator<Item = &str> {
        self.secrets
            .keys()
            .chain(self.config.keys())
            .map(String::as_str)
    }
}
