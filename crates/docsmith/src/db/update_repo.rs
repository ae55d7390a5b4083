//! Update repository: analyzed commits and pull requests.

use rusqlite::{params, Connection, Row};

use super::{now, parse_enum, Database, DatabaseError};
use crate::domain::{RunStatus, UpdateKind};

/// An update row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRow {
    pub id: String,
    pub project_id: String,
    pub kind: UpdateKind,
    /// Commit SHA, or the merge SHA for a pull request.
    pub commit_sha: String,
    pub pr_number: Option<u64>,
    pub title: String,
    pub body: Option<String>,
    pub summary: Option<String>,
    pub analysis_status: RunStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl UpdateRow {
    pub fn commit(
        project_id: impl Into<String>,
        commit_sha: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self::new(project_id.into(), UpdateKind::Commit, commit_sha.into(), None, title.into())
    }

    pub fn pull_request(
        project_id: impl Into<String>,
        merge_sha: impl Into<String>,
        number: u64,
        title: impl Into<String>,
        body: Option<String>,
    ) -> Self {
        let mut row = Self::new(
            project_id.into(),
            UpdateKind::PullRequest,
            merge_sha.into(),
            Some(number),
            title.into(),
        );
        row.body = body;
        row
    }

    fn new(
        project_id: String,
        kind: UpdateKind,
        commit_sha: String,
        pr_number: Option<u64>,
        title: String,
    ) -> Self {
        let timestamp = now();
        Self {
            id: super::new_id(),
            project_id,
            kind,
            commit_sha,
            pr_number,
            title,
            body: None,
            summary: None,
            analysis_status: RunStatus::Pending,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let pr_number: Option<i64> = row.get("pr_number")?;
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            kind: parse_enum("kind", row.get("kind")?, UpdateKind::parse)?,
            commit_sha: row.get("commit_sha")?,
            pr_number: pr_number.and_then(|n| u64::try_from(n).ok()),
            title: row.get("title")?,
            body: row.get("body")?,
            summary: row.get("summary")?,
            analysis_status: parse_enum(
                "analysis_status",
                row.get("analysis_status")?,
                RunStatus::parse,
            )?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new update row.
pub fn insert(db: &Database, update: &UpdateRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO updates (id, project_id, kind, commit_sha, pr_number, title, body,
             summary, analysis_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                update.id,
                update.project_id,
                update.kind.as_str(),
                update.commit_sha,
                update.pr_number.map(|n| n as i64),
                update.title,
                update.body,
                update.summary,
                update.analysis_status.as_str(),
                update.created_at,
                update.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds an update by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<UpdateRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_with(conn, id))
}

pub fn find_by_id_with(conn: &Connection, id: &str) -> Result<Option<UpdateRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM updates WHERE id = ?1")?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(UpdateRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Stores the human-readable summary of an analysis (or its fallback).
pub fn store_summary(conn: &Connection, id: &str, summary: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE updates SET summary = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, summary, now()],
    )?;
    Ok(changed == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::project_repo::{self, ProjectRow};

    fn setup() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let project = ProjectRow::new("Docs", Vec::new());
        project_repo::insert(&db, &project).unwrap();
        (db, project.id)
    }

    #[test]
    fn test_insert_and_find_pull_request() {
        let (db, project_id) = setup();
        let update = UpdateRow::pull_request(
            &project_id,
            "feedbeef",
            42,
            "Add webhooks",
            Some("Adds webhook delivery".to_string()),
        );
        insert(&db, &update).unwrap();

        let found = find_by_id(&db, &update.id).unwrap().unwrap();
        assert_eq!(found, update);
        assert_eq!(found.kind, UpdateKind::PullRequest);
        assert_eq!(found.pr_number, Some(42));
    }

    #[test]
    fn test_store_summary() {
        let (db, project_id) = setup();
        let update = UpdateRow::commit(&project_id, "abc1234", "Fix typo");
        insert(&db, &update).unwrap();

        assert!(db
            .with_conn(|conn| store_summary(conn, &update.id, "Small fix"))
            .unwrap());
        let found = find_by_id(&db, &update.id).unwrap().unwrap();
        assert_eq!(found.summary.as_deref(), Some("Small fix"));
    }

    #[test]
    fn test_updates_removed_with_project() {
        let (db, project_id) = setup();
        let update = UpdateRow::commit(&project_id, "abc1234", "Fix typo");
        insert(&db, &update).unwrap();
        db.with_conn(|conn| {
            conn.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
            Ok(())
        })
        .unwrap();
        assert!(find_by_id(&db, &update.id).unwrap().is_none());
    }
}
