use std::collections::HashSet;

use log::info;

use super::{PersistError, PersistStats, Result, ResultPersister};
use crate::db::project_repo;
use crate::db::section_repo::{self, SectionRow};
use crate::domain::{EntityKind, SectionStatus};
use crate::output::{CodebaseAnalysis, SectionProposals, ThemeStylesheet};

impl ResultPersister {
    /// Stores analysis metadata and, when known, moves the baseline to the
    /// analyzed head.
    pub fn codebase_analysis(
        &self,
        project_id: &str,
        head_sha: Option<&str>,
        analysis: &CodebaseAnalysis,
    ) -> Result<()> {
        self.db.with_transaction(|conn| {
            if !project_repo::record_analysis(conn, project_id, head_sha, &analysis.metadata)? {
                return Err(PersistError::missing(EntityKind::Project, project_id));
            }
            Ok::<_, PersistError>(())
        })?;
        info!(
            "Project {project_id}: analysis stored (baseline {})",
            head_sha.unwrap_or("unchanged")
        );
        Ok(())
    }

    /// Replaces the project's undecided sections with the proposals.
    /// Names already accepted or rejected are not proposed again.
    pub fn section_proposals(
        &self,
        project_id: &str,
        proposals: &SectionProposals,
    ) -> Result<PersistStats> {
        let stats = self.db.with_transaction(|conn| {
            project_repo::find_by_id_with(conn, project_id)?
                .ok_or_else(|| PersistError::missing(EntityKind::Project, project_id))?;

            let existing = section_repo::list_by_project_with(conn, project_id)?;
            let mut taken: HashSet<String> = existing
                .iter()
                .filter(|s| s.status != SectionStatus::Pending)
                .map(|s| s.name.trim().to_lowercase())
                .collect();
            let mut position = existing
                .iter()
                .filter(|s| s.status != SectionStatus::Pending)
                .map(|s| s.position + 1)
                .max()
                .unwrap_or(0);

            let mut stats = PersistStats {
                replaced: section_repo::delete_pending(conn, project_id)?,
                ..Default::default()
            };
            for proposal in &proposals.sections {
                let name = proposal.name.trim();
                if name.is_empty() || !taken.insert(name.to_lowercase()) {
                    stats.drop_item();
                    continue;
                }
                let description = Some(proposal.description.trim().to_string()).filter(|d| !d.is_empty());
                let section = SectionRow::new(project_id, name, description, position);
                section_repo::insert_with(conn, &section)?;
                position += 1;
                stats.keep();
            }
            Ok::<_, PersistError>(stats)
        })?;
        info!(
            "Project {project_id}: {} sections proposed, {} skipped",
            stats.persisted, stats.dropped
        );
        Ok(stats)
    }

    pub fn theme(&self, project_id: &str, stylesheet: &ThemeStylesheet) -> Result<()> {
        self.db.with_transaction(|conn| {
            if !project_repo::store_custom_css(conn, project_id, &stylesheet.css)? {
                return Err(PersistError::missing(EntityKind::Project, project_id));
            }
            Ok::<_, PersistError>(())
        })?;
        info!("Project {project_id}: stylesheet stored ({} bytes)", stylesheet.css.len());
        Ok(())
    }
}
