//! Recommendation repository: proposed articles derived by generation jobs.

use rusqlite::{params, Connection, Row, ToSql};

use super::{now, parse_enum, Database, DatabaseError};
use crate::domain::RecommendationStatus;

/// A recommendation row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRow {
    pub id: String,
    pub project_id: String,
    pub section_id: Option<String>,
    pub update_id: Option<String>,
    pub title: String,
    pub description: String,
    pub justification: String,
    pub status: RecommendationStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl RecommendationRow {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        let timestamp = now();
        Self {
            id: super::new_id(),
            project_id: project_id.into(),
            section_id: None,
            update_id: None,
            title: title.into(),
            description: String::new(),
            justification: String::new(),
            status: RecommendationStatus::Pending,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            section_id: row.get("section_id")?,
            update_id: row.get("update_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            justification: row.get("justification")?,
            status: parse_enum("status", row.get("status")?, RecommendationStatus::parse)?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// The set of recommendations one generation run owns and replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecommendationScope {
    /// Recommendations for a single section.
    Section(String),
    /// Every non-update recommendation of a project.
    AllSections(String),
    /// Recommendations spawned by one analyzed commit or pull request.
    Update(String),
}

impl RecommendationScope {
    fn filter(&self) -> (&'static str, &str) {
        match self {
            RecommendationScope::Section(id) => ("section_id = ?1", id),
            RecommendationScope::AllSections(id) => ("project_id = ?1 AND update_id IS NULL", id),
            RecommendationScope::Update(id) => ("update_id = ?1", id),
        }
    }
}

/// Inserts on the caller's connection.
pub fn insert_with(conn: &Connection, rec: &RecommendationRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO recommendations (id, project_id, section_id, update_id, title,
         description, justification, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            rec.id,
            rec.project_id,
            rec.section_id,
            rec.update_id,
            rec.title,
            rec.description,
            rec.justification,
            rec.status.as_str(),
            rec.created_at,
            rec.updated_at,
        ],
    )?;
    Ok(())
}

/// Inserts a new recommendation row.
pub fn insert(db: &Database, rec: &RecommendationRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_with(conn, rec))
}

/// Finds a recommendation by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<RecommendationRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM recommendations WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(RecommendationRow::from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// Lists the recommendations in a scope, oldest first.
pub fn list_in_scope(
    db: &Database,
    scope: &RecommendationScope,
) -> Result<Vec<RecommendationRow>, DatabaseError> {
    let (filter, id) = scope.filter();
    let sql = format!("SELECT * FROM recommendations WHERE {filter} ORDER BY created_at, title");
    query(db, &sql, &[&id])
}

/// Lists every recommendation of a project, oldest first.
pub fn list_by_project(
    db: &Database,
    project_id: &str,
) -> Result<Vec<RecommendationRow>, DatabaseError> {
    query(
        db,
        "SELECT * FROM recommendations WHERE project_id = ?1 ORDER BY created_at, title",
        &[&project_id],
    )
}

fn query(
    db: &Database,
    sql: &str,
    args: &[&dyn ToSql],
) -> Result<Vec<RecommendationRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(args)?;
        let mut recs = Vec::new();
        while let Some(row) = rows.next()? {
            recs.push(RecommendationRow::from_row(row)?);
        }
        Ok(recs)
    })
}

/// Deletes the scope's derived recommendations that were never turned into
/// articles. Generated ones, and any an article still points at, are kept.
pub fn delete_replaceable(
    conn: &Connection,
    scope: &RecommendationScope,
) -> Result<usize, DatabaseError> {
    let (filter, id) = scope.filter();
    let sql = format!(
        "DELETE FROM recommendations WHERE {filter} AND status <> 'generated'
         AND id NOT IN (SELECT recommendation_id FROM articles)"
    );
    Ok(conn.execute(&sql, params![id])?)
}

/// Marks a recommendation as turned into an article.
pub fn mark_generated(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE recommendations SET status = 'generated', updated_at = ?2 WHERE id = ?1",
        params![id, now()],
    )?;
    Ok(changed == 1)
}
