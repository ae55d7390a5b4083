//! Status columns shared by every job: atomic claim, resolve and sweep.
//!
//! Each pipeline status lives in a different table, but they all follow the
//! same `running` → terminal lifecycle, so they are driven through one set of
//! functions keyed by [`StatusColumn`].

use rusqlite::{params, Connection, OptionalExtension};

use super::{new_id, now, parse_enum, Database, DatabaseError};
use crate::domain::{EntityKind, RunStatus};

/// A status column that the pipeline claims and resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusColumn {
    ProjectAnalysis,
    ProjectTheme,
    SectionRecommendations,
    ArticleGeneration,
    UpdateAnalysis,
    UpdateCheck,
}

impl StatusColumn {
    pub const ALL: [StatusColumn; 6] = [
        StatusColumn::ProjectAnalysis,
        StatusColumn::ProjectTheme,
        StatusColumn::SectionRecommendations,
        StatusColumn::ArticleGeneration,
        StatusColumn::UpdateAnalysis,
        StatusColumn::UpdateCheck,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            StatusColumn::ProjectAnalysis | StatusColumn::ProjectTheme => "projects",
            StatusColumn::SectionRecommendations => "sections",
            StatusColumn::ArticleGeneration => "articles",
            StatusColumn::UpdateAnalysis => "updates",
            StatusColumn::UpdateCheck => "article_update_checks",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            StatusColumn::ProjectAnalysis | StatusColumn::UpdateAnalysis => "analysis_status",
            StatusColumn::ProjectTheme => "theme_status",
            StatusColumn::SectionRecommendations => "recommendations_status",
            StatusColumn::ArticleGeneration => "generation_status",
            StatusColumn::UpdateCheck => "status",
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            StatusColumn::ProjectAnalysis | StatusColumn::ProjectTheme => EntityKind::Project,
            StatusColumn::SectionRecommendations => EntityKind::Section,
            StatusColumn::ArticleGeneration => EntityKind::Article,
            StatusColumn::UpdateAnalysis => EntityKind::Update,
            StatusColumn::UpdateCheck => EntityKind::UpdateCheck,
        }
    }
}

impl std::fmt::Display for StatusColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table(), self.column())
    }
}

/// Proof of ownership of one claimed status column. Only the holder of the
/// current token can resolve the column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimToken(String);

impl ClaimToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of an attempt to move a status column into `running`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// This caller now owns the run.
    Claimed(ClaimToken),
    /// Another run holds the column.
    AlreadyRunning,
    /// The row does not exist.
    Missing,
}

/// Atomically moves the column into `running` unless it already is.
///
/// The compare-and-set is a single UPDATE, so two concurrent callers can never
/// both observe `Claimed` for the same row. A successful claim replaces any
/// token left behind by an earlier, reaped run.
pub fn claim(db: &Database, target: StatusColumn, id: &str) -> Result<Claim, DatabaseError> {
    db.with_transaction(|conn| {
        let sql = format!(
            "UPDATE {table} SET {col} = 'running', updated_at = ?2
             WHERE id = ?1 AND ({col} IS NULL OR {col} <> 'running')",
            table = target.table(),
            col = target.column(),
        );
        let claimed_at = now();
        if conn.execute(&sql, params![id, claimed_at])? == 1 {
            let token = ClaimToken(new_id());
            conn.execute(
                "INSERT OR REPLACE INTO status_claims
                 (table_name, column_name, row_id, token, claimed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![target.table(), target.column(), id, token.0, claimed_at],
            )?;
            return Ok(Claim::Claimed(token));
        }
        if row_exists(conn, target, id)? {
            Ok(Claim::AlreadyRunning)
        } else {
            Ok(Claim::Missing)
        }
    })
}

/// Writes a terminal status on behalf of the claim holder.
///
/// Returns false, leaving the row untouched, when the row is gone or `token`
/// no longer holds the column (the run was reaped, and possibly reclaimed).
pub fn resolve(
    db: &Database,
    target: StatusColumn,
    id: &str,
    token: &ClaimToken,
    status: RunStatus,
) -> Result<bool, DatabaseError> {
    debug_assert!(status.is_terminal());
    db.with_transaction(|conn| {
        let released = conn.execute(
            "DELETE FROM status_claims
             WHERE table_name = ?1 AND column_name = ?2 AND row_id = ?3 AND token = ?4",
            params![target.table(), target.column(), id, token.0],
        )?;
        if released == 0 {
            return Ok(false);
        }
        let sql = format!(
            "UPDATE {table} SET {col} = ?2, updated_at = ?3 WHERE id = ?1 AND {col} = 'running'",
            table = target.table(),
            col = target.column(),
        );
        Ok(conn.execute(&sql, params![id, status.as_str(), now()])? == 1)
    })
}

/// Reads the current value. `None` when the row is missing or the column is NULL.
pub fn current(
    db: &Database,
    target: StatusColumn,
    id: &str,
) -> Result<Option<RunStatus>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {col} FROM {table} WHERE id = ?1",
            table = target.table(),
            col = target.column(),
        );
        let value: Option<Option<String>> = conn
            .query_row(&sql, params![id], |r| r.get(0))
            .optional()?;
        value
            .flatten()
            .map(|v| parse_enum(target.column(), v, RunStatus::parse))
            .transpose()
    })
}

/// Fails every row stuck in `running` since before `cutoff` (an RFC 3339
/// timestamp as written by [`now`]). Returns the reaped IDs.
pub fn reap_stale(
    db: &Database,
    target: StatusColumn,
    cutoff: &str,
) -> Result<Vec<String>, DatabaseError> {
    db.with_transaction(|conn| {
        let select = format!(
            "SELECT id FROM {table} WHERE {col} = 'running' AND updated_at < ?1 ORDER BY id",
            table = target.table(),
            col = target.column(),
        );
        let ids = {
            let mut stmt = conn.prepare(&select)?;
            let rows = stmt.query_map(params![cutoff], |r| r.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let update = format!(
            "UPDATE {table} SET {col} = 'failed', updated_at = ?2
             WHERE id = ?1 AND {col} = 'running'",
            table = target.table(),
            col = target.column(),
        );
        let timestamp = now();
        for id in &ids {
            conn.execute(&update, params![id, timestamp])?;
            conn.execute(
                "DELETE FROM status_claims
                 WHERE table_name = ?1 AND column_name = ?2 AND row_id = ?3",
                params![target.table(), target.column(), id],
            )?;
        }
        Ok::<_, DatabaseError>(ids)
    })
}

fn row_exists(conn: &Connection, target: StatusColumn, id: &str) -> Result<bool, DatabaseError> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", target.table());
    Ok(conn
        .query_row(&sql, params![id], |_| Ok(()))
        .optional()?
        .is_some())
}
