use std::path::Path;

use crate::config::schema::{SandboxBackend, Settings};
use crate::error::ConfigError;
use crate::sandbox::EntryPoint;

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_json::from_str(content)?;

    validate_settings(&settings)?;

    Ok(settings)
}

/// Checks constraints serde cannot express.
pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported settings version: {}",
            settings.version
        )));
    }

    if settings.worker_count == 0 {
        return Err(invalid("workerCount must be at least 1"));
    }

    let sandbox = &settings.sandbox;
    match &sandbox.backend {
        SandboxBackend::Docker { binary, image, .. } => {
            if binary.trim().is_empty() || image.trim().is_empty() {
                return Err(invalid("docker backend needs a binary and an image"));
            }
        }
        SandboxBackend::Local { program, .. } => {
            if program.as_os_str().is_empty() {
                return Err(invalid("local backend needs a program"));
            }
        }
    }

    for (name, secs) in &sandbox.timeouts {
        if EntryPoint::parse(name).is_none() {
            return Err(ConfigError::InvalidTimeout {
                entry_point: name.clone(),
                reason: "unknown entry point".to_string(),
            });
        }
        if *secs == 0 {
            return Err(ConfigError::InvalidTimeout {
                entry_point: name.clone(),
                reason: "timeout must be positive".to_string(),
            });
        }
    }

    if sandbox.output_excerpt_bytes == 0 || sandbox.max_capture_bytes == 0 {
        return Err(invalid("output limits must be positive"));
    }

    let host = &settings.source_host;
    reqwest::Url::parse(&host.api_base)
        .map_err(|e| invalid(format!("Invalid sourceHost.apiBase '{}': {}", host.api_base, e)))?;
    for repository in host.repository_tokens.keys() {
        let repo = crate::domain::RepositoryRef::new(repository.as_str(), "main");
        if repo.owner_and_name().is_none() {
            return Err(invalid(format!(
                "repositoryTokens key '{}' is not owner/name",
                repository
            )));
        }
    }

    let retry = &host.retry;
    if retry.max_attempts == 0 {
        return Err(invalid("retry.maxAttempts must be at least 1"));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(invalid("retry.baseDelayMs exceeds retry.maxDelayMs"));
    }

    let sweep = &settings.sweep;
    if sweep.enabled {
        if sweep.interval_secs == 0 {
            return Err(invalid("sweep.intervalSecs must be positive"));
        }
        let longest = EntryPoint::ALL
            .iter()
            .map(|e| sandbox.timeout_for(*e).as_secs())
            .max()
            .unwrap_or(0);
        if sweep.stale_after_secs <= longest {
            return Err(invalid(format!(
                "sweep.staleAfterSecs ({}) must exceed the longest sandbox timeout ({}s)",
                sweep.stale_after_secs, longest
            )));
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
