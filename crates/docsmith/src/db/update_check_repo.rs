//! Article update checks and the suggestions they produce.

use rusqlite::{params, Connection, Row};

use super::{now, parse_enum, Database, DatabaseError};
use crate::domain::{Priority, RunStatus, SuggestionStatus, SuggestionType};

/// An article update check row.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCheckRow {
    pub id: String,
    pub project_id: String,
    pub base_sha: String,
    pub target_sha: String,
    pub status: RunStatus,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl UpdateCheckRow {
    pub fn new(
        project_id: impl Into<String>,
        base_sha: impl Into<String>,
        target_sha: impl Into<String>,
    ) -> Self {
        let timestamp = now();
        Self {
            id: super::new_id(),
            project_id: project_id.into(),
            base_sha: base_sha.into(),
            target_sha: target_sha.into(),
            status: RunStatus::Pending,
            summary: None,
            error: None,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            base_sha: row.get("base_sha")?,
            target_sha: row.get("target_sha")?,
            status: parse_enum("status", row.get("status")?, RunStatus::parse)?,
            summary: row.get("summary")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// A suggestion row produced by an update check.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionRow {
    pub id: String,
    pub check_id: String,
    pub project_id: String,
    /// Required for `update_needed`, absent for `new_article`.
    pub article_id: Option<String>,
    pub suggestion_type: SuggestionType,
    pub title: String,
    pub description: String,
    pub reason: Option<String>,
    pub priority: Priority,
    pub status: SuggestionStatus,
    pub created_at: String,
}

impl SuggestionRow {
    pub fn new(
        check_id: impl Into<String>,
        project_id: impl Into<String>,
        suggestion_type: SuggestionType,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: super::new_id(),
            check_id: check_id.into(),
            project_id: project_id.into(),
            article_id: None,
            suggestion_type,
            title: title.into(),
            description: String::new(),
            reason: None,
            priority: Priority::Medium,
            status: SuggestionStatus::Pending,
            created_at: now(),
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: row.get("id")?,
            check_id: row.get("check_id")?,
            project_id: row.get("project_id")?,
            article_id: row.get("article_id")?,
            suggestion_type: parse_enum(
                "suggestion_type",
                row.get("suggestion_type")?,
                SuggestionType::parse,
            )?,
            title: row.get("title")?,
            description: row.get("description")?,
            reason: row.get("reason")?,
            priority: parse_enum("priority", row.get("priority")?, Priority::parse)?,
            status: parse_enum("status", row.get("status")?, SuggestionStatus::parse)?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts a new check row.
pub fn insert(db: &Database, check: &UpdateCheckRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO article_update_checks (id, project_id, base_sha, target_sha, status,
             summary, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                check.id,
                check.project_id,
                check.base_sha,
                check.target_sha,
                check.status.as_str(),
                check.summary,
                check.error,
                check.created_at,
                check.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a check by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<UpdateCheckRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_with(conn, id))
}

pub fn find_by_id_with(
    conn: &Connection,
    id: &str,
) -> Result<Option<UpdateCheckRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM article_update_checks WHERE id = ?1")?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(UpdateCheckRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Stores the summary of a completed check and clears any earlier error.
pub fn store_summary(
    conn: &Connection,
    id: &str,
    summary: Option<&str>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE article_update_checks SET summary = ?2, error = NULL, updated_at = ?3
         WHERE id = ?1",
        params![id, summary, now()],
    )?;
    Ok(changed == 1)
}

/// Records why a check failed.
pub fn store_error(db: &Database, id: &str, error: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE article_update_checks SET error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, error, now()],
        )?;
        Ok(changed == 1)
    })
}

/// Removes every suggestion of a check. Returns the number removed.
pub fn delete_suggestions(conn: &Connection, check_id: &str) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "DELETE FROM article_update_suggestions WHERE check_id = ?1",
        params![check_id],
    )?)
}

pub fn insert_suggestion(conn: &Connection, s: &SuggestionRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO article_update_suggestions (id, check_id, project_id, article_id,
         suggestion_type, title, description, reason, priority, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            s.id,
            s.check_id,
            s.project_id,
            s.article_id,
            s.suggestion_type.as_str(),
            s.title,
            s.description,
            s.reason,
            s.priority.as_str(),
            s.status.as_str(),
            s.created_at,
        ],
    )?;
    Ok(())
}

/// Lists a check's suggestions, highest priority first.
pub fn list_suggestions(db: &Database, check_id: &str) -> Result<Vec<SuggestionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM article_update_suggestions WHERE check_id = ?1
             ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END,
             created_at, title",
        )?;
        let mut rows = stmt.query(params![check_id])?;
        let mut suggestions = Vec::new();
        while let Some(row) = rows.next()? {
            suggestions.push(SuggestionRow::from_row(row)?);
        }
        Ok(suggestions)
    })
}
