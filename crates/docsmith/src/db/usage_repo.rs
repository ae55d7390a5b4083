//! Usage repository: append-only execution telemetry.
//!
//! Rows are never updated. There is no foreign key to `projects`, so cost
//! history survives deletion of the entity a run was for.

use rusqlite::{params, Row};
use serde_json::Value;

use super::{from_json, now, to_json, Database, DatabaseError};

/// A usage row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRow {
    pub id: String,
    pub project_id: String,
    pub job_type: String,
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    /// Which article/section/update the attempt was for.
    pub metadata: Option<Value>,
    pub created_at: String,
}

impl UsageRow {
    pub fn new(project_id: impl Into<String>, job_type: impl Into<String>, success: bool) -> Self {
        Self {
            id: super::new_id(),
            project_id: project_id.into(),
            job_type: job_type.into(),
            model: None,
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_write_tokens: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            success,
            error: None,
            metadata: None,
            created_at: now(),
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let metadata: Option<String> = row.get("metadata")?;
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            job_type: row.get("job_type")?,
            model: row.get("model")?,
            input_tokens: unsigned(row.get("input_tokens")?),
            output_tokens: unsigned(row.get("output_tokens")?),
            cache_read_tokens: unsigned(row.get("cache_read_tokens")?),
            cache_write_tokens: unsigned(row.get("cache_write_tokens")?),
            cost_usd: row.get("cost_usd")?,
            duration_ms: unsigned(row.get("duration_ms")?),
            success: row.get("success")?,
            error: row.get("error")?,
            metadata: metadata.map(|m| from_json("metadata", &m)).transpose()?,
            created_at: row.get("created_at")?,
        })
    }
}

fn unsigned(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Aggregated usage for cost reporting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTotals {
    pub runs: u64,
    pub failures: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Appends one usage row.
pub fn insert(db: &Database, usage: &UsageRow) -> Result<(), DatabaseError> {
    let metadata = usage
        .metadata
        .as_ref()
        .map(|m| to_json("metadata", m))
        .transpose()?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO usage_records (id, project_id, job_type, model, input_tokens,
             output_tokens, cache_read_tokens, cache_write_tokens, cost_usd, duration_ms,
             success, error, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                usage.id,
                usage.project_id,
                usage.job_type,
                usage.model,
                signed(usage.input_tokens),
                signed(usage.output_tokens),
                signed(usage.cache_read_tokens),
                signed(usage.cache_write_tokens),
                usage.cost_usd,
                signed(usage.duration_ms),
                usage.success,
                usage.error,
                metadata,
                usage.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Lists a project's usage rows, oldest first.
pub fn list_by_project(db: &Database, project_id: &str) -> Result<Vec<UsageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM usage_records WHERE project_id = ?1 ORDER BY created_at, id",
        )?;
        let mut rows = stmt.query(params![project_id])?;
        let mut usage = Vec::new();
        while let Some(row) = rows.next()? {
            usage.push(UsageRow::from_row(row)?);
        }
        Ok(usage)
    })
}

/// Sums a project's usage.
pub fn totals_for_project(db: &Database, project_id: &str) -> Result<UsageTotals, DatabaseError> {
    db.with_conn(|conn| {
        let totals = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(input_tokens), 0),
                    COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(cost_usd), 0.0)
             FROM usage_records WHERE project_id = ?1",
            params![project_id],
            |r| {
                Ok(UsageTotals {
                    runs: unsigned(r.get(0)?),
                    failures: unsigned(r.get(1)?),
                    input_tokens: unsigned(r.get(2)?),
                    output_tokens: unsigned(r.get(3)?),
                    cost_usd: r.get(4)?,
                })
            },
        )?;
        Ok(totals)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_list() {
        let db = Database::open_in_memory().unwrap();
        let mut usage = UsageRow::new("p1", "generate-article", true);
        usage.model = Some("model-x".to_string());
        usage.input_tokens = 1200;
        usage.output_tokens = 300;
        usage.cost_usd = 0.042;
        usage.metadata = Some(serde_json::json!({"article_id": "a1"}));
        insert(&db, &usage).unwrap();

        let rows = list_by_project(&db, "p1").unwrap();
        assert_eq!(rows, vec![usage]);
    }

    #[test]
    fn test_totals() {
        let db = Database::open_in_memory().unwrap();
        let mut ok = UsageRow::new("p1", "analyze-commit", true);
        ok.input_tokens = 100;
        ok.cost_usd = 0.5;
        let mut failed = UsageRow::new("p1", "analyze-commit", false);
        failed.error = Some("timeout".to_string());
        failed.cost_usd = 0.25;
        insert(&db, &ok).unwrap();
        insert(&db, &failed).unwrap();
        insert(&db, &UsageRow::new("p2", "generate-css", true)).unwrap();

        let totals = totals_for_project(&db, "p1").unwrap();
        assert_eq!(totals.runs, 2);
        assert_eq!(totals.failures, 1);
        assert_eq!(totals.input_tokens, 100);
        assert!((totals.cost_usd - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_totals_for_unknown_project_are_zero() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(totals_for_project(&db, "none").unwrap(), UsageTotals::default());
    }
}
