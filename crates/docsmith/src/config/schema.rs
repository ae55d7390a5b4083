use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;
use crate::sandbox::EntryPoint;
use crate::secrets::SecretSource;

/// Runtime settings for the generation pipeline.
///
/// Every field has a default, so `{}` is a valid (if minimal) settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: String,
    /// SQLite file. Defaults to `~/.docsmith/data/docsmith.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Parent directory for per-invocation sandbox workspaces. Defaults to
    /// the system temp directory.
    #[serde(default)]
    pub staging_directory: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Model identifier passed to the sandbox.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_key")]
    pub api_key: SecretSource,
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub source_host: SourceHostSettings,
    #[serde(default)]
    pub sweep: SweepSettings,
    #[serde(default)]
    pub features: FeatureSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_api_key() -> SecretSource {
    SecretSource::env("DOCSMITH_API_KEY")
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            database_path: None,
            staging_directory: None,
            worker_count: default_worker_count(),
            model: None,
            api_key: default_api_key(),
            sandbox: SandboxSettings::default(),
            source_host: SourceHostSettings::default(),
            sweep: SweepSettings::default(),
            features: FeatureSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSettings {
    #[serde(default)]
    pub backend: SandboxBackend,
    /// Per-entry-point timeout overrides in seconds, keyed by entry point
    /// name (e.g. `"generate-article": 120`).
    #[serde(default)]
    pub timeouts: BTreeMap<String, u64>,
    /// Upper bound on raw output quoted in parse failures.
    #[serde(default = "default_excerpt_bytes")]
    pub output_excerpt_bytes: usize,
    /// Diffs beyond this size are truncated before staging.
    #[serde(default = "default_max_diff_bytes")]
    pub max_diff_bytes: usize,
    /// Upper bound on captured stdout/stderr per stream.
    #[serde(default = "default_max_capture_bytes")]
    pub max_capture_bytes: usize,
}

fn default_excerpt_bytes() -> usize {
    2000
}

fn default_max_diff_bytes() -> usize {
    200_000
}

fn default_max_capture_bytes() -> usize {
    1024 * 1024
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::default(),
            timeouts: BTreeMap::new(),
            output_excerpt_bytes: default_excerpt_bytes(),
            max_diff_bytes: default_max_diff_bytes(),
            max_capture_bytes: default_max_capture_bytes(),
        }
    }
}

impl SandboxSettings {
    /// Wall-clock budget for one invocation of `entry`.
    pub fn timeout_for(&self, entry: EntryPoint) -> Duration {
        self.timeouts
            .get(entry.as_str())
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or_else(|| entry.default_timeout())
    }
}

/// How sandboxed work is executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SandboxBackend {
    /// One throwaway container per invocation.
    #[serde(rename_all = "camelCase")]
    Docker {
        #[serde(default = "default_docker_binary")]
        binary: String,
        #[serde(default = "default_image")]
        image: String,
        /// Directory with a Dockerfile, used to build `image` when missing.
        #[serde(default)]
        build_context: Option<PathBuf>,
        /// Extra `docker run` flags (resource limits, network).
        #[serde(default)]
        run_args: Vec<String>,
    },
    /// A local program, for development and tests.
    #[serde(rename_all = "camelCase")]
    Local {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "docsmith-sandbox:latest".to_string()
}

impl Default for SandboxBackend {
    fn default() -> Self {
        SandboxBackend::Docker {
            binary: default_docker_binary(),
            image: default_image(),
            build_context: None,
            run_args: Vec::new(),
        }
    }
}

/// Access to the repository host (diffs, commits, pull requests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHostSettings {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Token for the primary repository.
    #[serde(default = "default_host_token")]
    pub token: SecretSource,
    /// Tokens for additional repositories, keyed by `owner/name`.
    #[serde(default)]
    pub repository_tokens: BTreeMap<String, SecretSource>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Issued tokens are renewed this long before they expire.
    #[serde(default = "default_expiry_buffer")]
    pub token_expiry_buffer_secs: u64,
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_host_token() -> SecretSource {
    SecretSource::env("GITHUB_TOKEN")
}

fn default_user_agent() -> String {
    concat!("docsmith/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_expiry_buffer() -> u64 {
    300
}

impl Default for SourceHostSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: default_host_token(),
            repository_tokens: BTreeMap::new(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            token_expiry_buffer_secs: default_expiry_buffer(),
            retry: RetrySettings::default(),
        }
    }
}

/// Exponential backoff for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    8000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

/// Periodic recovery of runs left `running` by a crashed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    /// Must exceed the longest sandbox timeout.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_stale_after() -> u64 {
    1800
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval(),
            stale_after_secs: default_stale_after(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSettings {
    /// Enqueue section suggestions when a codebase analysis completes.
    #[serde(default = "default_true")]
    pub cascade_section_suggestions: bool,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            cascade_section_suggestions: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}
