//! Article repository: CRUD operations for the `articles` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{from_json, now, parse_enum, to_json, Database, DatabaseError};
use crate::domain::{ReviewStatus, RunStatus, StructuredContent};

/// An article row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRow {
    pub id: String,
    pub project_id: String,
    pub recommendation_id: String,
    pub section_id: Option<String>,
    pub title: String,
    pub content: Option<String>,
    pub structured_content: Option<StructuredContent>,
    pub generation_status: RunStatus,
    pub review_status: ReviewStatus,
    pub generation_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ArticleRow {
    pub fn new(
        project_id: impl Into<String>,
        recommendation_id: impl Into<String>,
        section_id: Option<String>,
        title: impl Into<String>,
    ) -> Self {
        let timestamp = now();
        Self {
            id: super::new_id(),
            project_id: project_id.into(),
            recommendation_id: recommendation_id.into(),
            section_id,
            title: title.into(),
            content: None,
            structured_content: None,
            generation_status: RunStatus::Pending,
            review_status: ReviewStatus::Unreviewed,
            generation_error: None,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let structured: Option<String> = row.get("structured_content")?;
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            recommendation_id: row.get("recommendation_id")?,
            section_id: row.get("section_id")?,
            title: row.get("title")?,
            content: row.get("content")?,
            structured_content: structured
                .map(|s| from_json("structured_content", &s))
                .transpose()?,
            generation_status: parse_enum(
                "generation_status",
                row.get("generation_status")?,
                RunStatus::parse,
            )?,
            review_status: parse_enum(
                "review_status",
                row.get("review_status")?,
                ReviewStatus::parse,
            )?,
            generation_error: row.get("generation_error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new article row.
pub fn insert(db: &Database, article: &ArticleRow) -> Result<(), DatabaseError> {
    let structured = article
        .structured_content
        .as_ref()
        .map(|c| to_json("structured_content", c))
        .transpose()?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO articles (id, project_id, recommendation_id, section_id, title, content,
             structured_content, generation_status, review_status, generation_error,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                article.id,
                article.project_id,
                article.recommendation_id,
                article.section_id,
                article.title,
                article.content,
                structured,
                article.generation_status.as_str(),
                article.review_status.as_str(),
                article.generation_error,
                article.created_at,
                article.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds an article by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ArticleRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_with(conn, id))
}

pub fn find_by_id_with(conn: &Connection, id: &str) -> Result<Option<ArticleRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM articles WHERE id = ?1")?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(ArticleRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Lists a project's articles ordered by title.
pub fn list_by_project(db: &Database, project_id: &str) -> Result<Vec<ArticleRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM articles WHERE project_id = ?1 ORDER BY title, id")?;
        let mut rows = stmt.query(params![project_id])?;
        let mut articles = Vec::new();
        while let Some(row) = rows.next()? {
            articles.push(ArticleRow::from_row(row)?);
        }
        Ok(articles)
    })
}

/// Whether `id` names an article that belongs to `project_id`.
pub fn exists_in_project(
    conn: &Connection,
    id: &str,
    project_id: &str,
) -> Result<bool, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM articles WHERE id = ?1 AND project_id = ?2",
            params![id, project_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Stores a generated draft and clears any earlier error.
pub fn store_draft(
    conn: &Connection,
    id: &str,
    title: Option<&str>,
    content: Option<&str>,
    structured: Option<&StructuredContent>,
) -> Result<bool, DatabaseError> {
    let structured = structured
        .map(|c| to_json("structured_content", c))
        .transpose()?;
    let changed = conn.execute(
        "UPDATE articles SET title = COALESCE(?2, title), content = ?3,
         structured_content = ?4, generation_error = NULL, updated_at = ?5
         WHERE id = ?1",
        params![id, title, content, structured, now()],
    )?;
    Ok(changed == 1)
}

/// Replaces the body with fallback text and records the error.
pub fn store_fallback(
    db: &Database,
    id: &str,
    content: &str,
    error: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE articles SET content = ?2, structured_content = NULL,
             generation_error = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, content, error, now()],
        )?;
        Ok(changed == 1)
    })
}

/// Sets the review status, but only on a completed article.
///
/// Returns `None` if the article is missing, `Some(false)` if generation has
/// not completed.
pub fn set_review_status(
    db: &Database,
    id: &str,
    status: ReviewStatus,
) -> Result<Option<bool>, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE articles SET review_status = ?2, updated_at = ?3
             WHERE id = ?1 AND generation_status = 'completed'",
            params![id, status.as_str(), now()],
        )?;
        if changed == 1 {
            return Ok(Some(true));
        }
        let exists = conn
            .query_row("SELECT 1 FROM articles WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?
            .is_some();
        Ok(exists.then_some(false))
    })
}
