//! Execution telemetry: one usage row per sandbox attempt.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::db::usage_repo::{self, UsageRow};
use crate::db::Database;

/// Token and cost figures reported by the sandboxed process in `usage.json`.
///
/// Every field is optional in the file; key spellings vary between
/// generator versions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct UsageReport {
    pub model: Option<String>,
    #[serde(alias = "inputTokens")]
    pub input_tokens: u64,
    #[serde(alias = "outputTokens")]
    pub output_tokens: u64,
    #[serde(alias = "cache_read_input_tokens", alias = "cacheReadTokens")]
    pub cache_read_tokens: u64,
    #[serde(alias = "cache_creation_input_tokens", alias = "cacheWriteTokens")]
    pub cache_write_tokens: u64,
    #[serde(alias = "total_cost_usd", alias = "costUsd")]
    pub cost_usd: f64,
}

/// One sandbox attempt, as far as telemetry is concerned.
#[derive(Debug, Clone)]
pub struct UsageAttempt {
    pub project_id: String,
    pub job_type: &'static str,
    /// Which article/section/update the attempt was for.
    pub metadata: Value,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

/// Writes usage rows. Failures are logged and swallowed so telemetry can
/// never change a job's outcome.
#[derive(Clone)]
pub struct UsageTracker {
    db: Database,
    default_model: Option<String>,
}

impl UsageTracker {
    pub fn new(db: Database, default_model: Option<String>) -> Self {
        Self { db, default_model }
    }

    pub fn record(&self, attempt: UsageAttempt, report: UsageReport) {
        let mut row = UsageRow::new(attempt.project_id, attempt.job_type, attempt.success);
        row.model = report.model.or_else(|| self.default_model.clone());
        row.input_tokens = report.input_tokens;
        row.output_tokens = report.output_tokens;
        row.cache_read_tokens = report.cache_read_tokens;
        row.cache_write_tokens = report.cache_write_tokens;
        row.cost_usd = if report.cost_usd.is_finite() && report.cost_usd >= 0.0 {
            report.cost_usd
        } else {
            0.0
        };
        row.duration_ms = u64::try_from(attempt.duration.as_millis()).unwrap_or(u64::MAX);
        row.error = attempt.error;
        row.metadata = Some(attempt.metadata);

        match usage_repo::insert(&self.db, &row) {
            Ok(()) => debug!(
                job_type = attempt.job_type,
                success = row.success,
                cost_usd = row.cost_usd,
                "Recorded usage"
            ),
            Err(e) => warn!(job_type = attempt.job_type, error = %e, "Failed to record usage"),
        }
    }
}
