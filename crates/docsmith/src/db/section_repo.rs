//! Section repository: CRUD operations for the `sections` table.

use rusqlite::{params, Connection, Row};

use super::{now, parse_enum, Database, DatabaseError};
use crate::domain::{RunStatus, SectionStatus};

/// A section row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub position: i64,
    pub status: SectionStatus,
    /// `None` until recommendation generation first runs.
    pub recommendations_status: Option<RunStatus>,
    pub created_at: String,
    pub updated_at: String,
}

impl SectionRow {
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        position: i64,
    ) -> Self {
        let timestamp = now();
        Self {
            id: super::new_id(),
            project_id: project_id.into(),
            name: name.into(),
            description,
            position,
            status: SectionStatus::Pending,
            recommendations_status: None,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let recommendations_status: Option<String> = row.get("recommendations_status")?;
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            position: row.get("position")?,
            status: parse_enum("status", row.get("status")?, SectionStatus::parse)?,
            recommendations_status: recommendations_status
                .map(|s| parse_enum("recommendations_status", s, RunStatus::parse))
                .transpose()?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new section row.
pub fn insert(db: &Database, section: &SectionRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_with(conn, section))
}

/// Inserts on the caller's connection.
pub fn insert_with(conn: &Connection, section: &SectionRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO sections (id, project_id, name, description, position, status,
         recommendations_status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            section.id,
            section.project_id,
            section.name,
            section.description,
            section.position,
            section.status.as_str(),
            section.recommendations_status.map(|s| s.as_str()),
            section.created_at,
            section.updated_at,
        ],
    )?;
    Ok(())
}

/// Finds a section by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<SectionRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_with(conn, id))
}

pub fn find_by_id_with(conn: &Connection, id: &str) -> Result<Option<SectionRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM sections WHERE id = ?1")?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(SectionRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Lists a project's sections in display order.
pub fn list_by_project(db: &Database, project_id: &str) -> Result<Vec<SectionRow>, DatabaseError> {
    db.with_conn(|conn| list_by_project_with(conn, project_id))
}

pub fn list_by_project_with(
    conn: &Connection,
    project_id: &str,
) -> Result<Vec<SectionRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM sections WHERE project_id = ?1 ORDER BY position ASC, created_at ASC",
    )?;
    let mut rows = stmt.query(params![project_id])?;
    let mut sections = Vec::new();
    while let Some(row) = rows.next()? {
        sections.push(SectionRow::from_row(row)?);
    }
    Ok(sections)
}

/// Sets the accept/reject status.
pub fn set_status(db: &Database, id: &str, status: SectionStatus) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE sections SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now()],
        )?;
        Ok(changed == 1)
    })
}

/// Deletes a project's undecided sections. Returns the number removed.
pub fn delete_pending(conn: &Connection, project_id: &str) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "DELETE FROM sections WHERE project_id = ?1 AND status = 'pending'",
        params![project_id],
    )?)
}

/// Counts accepted sections whose recommendations have not run or are running.
pub fn count_unfinished_accepted(db: &Database, project_id: &str) -> Result<u32, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM sections
             WHERE project_id = ?1 AND status = 'accepted'
             AND (recommendations_status IS NULL OR recommendations_status = 'running')",
            params![project_id],
            |r| r.get(0),
        )?)
    })
}
