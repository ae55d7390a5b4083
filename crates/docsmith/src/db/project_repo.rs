//! Project repository: CRUD operations for the `projects` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{from_json, now, parse_enum, to_json, Database, DatabaseError};
use crate::domain::{OnboardingStep, ProjectMetadata, RepositoryRef, RunStatus, UserContext};

/// A project row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub overview: Option<String>,
    pub repositories: Vec<RepositoryRef>,
    pub analysis_status: RunStatus,
    /// Last commit the cumulative analysis incorporated.
    pub analysis_commit_sha: Option<String>,
    pub analysis_metadata: Option<ProjectMetadata>,
    pub onboarding_step: OnboardingStep,
    pub user_context: Option<UserContext>,
    pub theme_status: RunStatus,
    pub theme_prompt: Option<String>,
    pub custom_css: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectRow {
    /// Creates a fresh project at the start of onboarding.
    pub fn new(name: impl Into<String>, repositories: Vec<RepositoryRef>) -> Self {
        let timestamp = now();
        Self {
            id: super::new_id(),
            name: name.into(),
            overview: None,
            repositories,
            analysis_status: RunStatus::Pending,
            analysis_commit_sha: None,
            analysis_metadata: None,
            onboarding_step: OnboardingStep::Analyze,
            user_context: None,
            theme_status: RunStatus::Pending,
            theme_prompt: None,
            custom_css: None,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        }
    }

    /// The first attached repository.
    pub fn primary_repository(&self) -> Option<&RepositoryRef> {
        self.repositories.first()
    }

    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let repositories: String = row.get("repositories")?;
        let metadata: Option<String> = row.get("analysis_metadata")?;
        let user_context: Option<String> = row.get("user_context")?;
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            overview: row.get("overview")?,
            repositories: from_json("repositories", &repositories)?,
            analysis_status: parse_enum(
                "analysis_status",
                row.get("analysis_status")?,
                RunStatus::parse,
            )?,
            analysis_commit_sha: row.get("analysis_commit_sha")?,
            analysis_metadata: metadata
                .map(|m| from_json("analysis_metadata", &m))
                .transpose()?,
            onboarding_step: parse_enum(
                "onboarding_step",
                row.get("onboarding_step")?,
                OnboardingStep::parse,
            )?,
            user_context: user_context
                .map(|c| from_json("user_context", &c))
                .transpose()?,
            theme_status: parse_enum("theme_status", row.get("theme_status")?, RunStatus::parse)?,
            theme_prompt: row.get("theme_prompt")?,
            custom_css: row.get("custom_css")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new project row.
pub fn insert(db: &Database, project: &ProjectRow) -> Result<(), DatabaseError> {
    let repositories = to_json("repositories", &project.repositories)?;
    let metadata = project
        .analysis_metadata
        .as_ref()
        .map(|m| to_json("analysis_metadata", m))
        .transpose()?;
    let user_context = project
        .user_context
        .as_ref()
        .map(|c| to_json("user_context", c))
        .transpose()?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO projects (id, name, overview, repositories, analysis_status,
             analysis_commit_sha, analysis_metadata, onboarding_step, user_context,
             theme_status, theme_prompt, custom_css, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                project.id,
                project.name,
                project.overview,
                repositories,
                project.analysis_status.as_str(),
                project.analysis_commit_sha,
                metadata,
                project.onboarding_step.as_str(),
                user_context,
                project.theme_status.as_str(),
                project.theme_prompt,
                project.custom_css,
                project.created_at,
                project.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a project by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ProjectRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_with(conn, id))
}

/// Finds a project on the caller's connection (may be inside a transaction).
pub fn find_by_id_with(conn: &Connection, id: &str) -> Result<Option<ProjectRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM projects WHERE id = ?1")?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(ProjectRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Records a successful codebase analysis: metadata plus the new baseline.
pub fn record_analysis(
    conn: &Connection,
    id: &str,
    commit_sha: Option<&str>,
    metadata: &ProjectMetadata,
) -> Result<bool, DatabaseError> {
    let metadata = to_json("analysis_metadata", metadata)?;
    let changed = conn.execute(
        "UPDATE projects SET analysis_metadata = ?2,
         analysis_commit_sha = COALESCE(?3, analysis_commit_sha), updated_at = ?4
         WHERE id = ?1",
        params![id, metadata, commit_sha, now()],
    )?;
    Ok(changed == 1)
}

/// Moves the baseline commit forward. Only called on successful analyses.
pub fn advance_baseline(conn: &Connection, id: &str, commit_sha: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE projects SET analysis_commit_sha = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, commit_sha, now()],
    )?;
    Ok(changed == 1)
}

/// Moves onboarding from `from` to `to`. Returns false if the project was
/// not at `from` (or is gone).
pub fn advance_onboarding(
    db: &Database,
    id: &str,
    from: OnboardingStep,
    to: OnboardingStep,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE projects SET onboarding_step = ?3, updated_at = ?4
             WHERE id = ?1 AND onboarding_step = ?2",
            params![id, from.as_str(), to.as_str(), now()],
        )?;
        Ok(changed == 1)
    })
}

/// Sets the onboarding step unconditionally.
pub fn set_onboarding_step(
    db: &Database,
    id: &str,
    step: OnboardingStep,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE projects SET onboarding_step = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, step.as_str(), now()],
        )?;
        Ok(())
    })
}

/// Stores a generated stylesheet.
pub fn store_custom_css(conn: &Connection, id: &str, css: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE projects SET custom_css = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, css, now()],
    )?;
    Ok(changed == 1)
}

/// Returns the baseline commit SHA, `None` if unset or the project is gone.
pub fn baseline(db: &Database, id: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let sha: Option<Option<String>> = conn
            .query_row(
                "SELECT analysis_commit_sha FROM projects WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(sha.flatten())
    })
}
