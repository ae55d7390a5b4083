use log::{debug, info};
use rusqlite::Connection;

use super::{PersistError, PersistStats, Result, ResultPersister};
use crate::db::recommendation_repo::{self, RecommendationRow, RecommendationScope};
use crate::db::section_repo::{self, SectionRow};
use crate::db::{project_repo, update_repo};
use crate::domain::{EntityKind, SectionStatus};
use crate::output::{RecommendationItem, RecommendationSet, UpdateAnalysis};

/// Where new recommendations attach.
struct Owner<'a> {
    project_id: &'a str,
    section_id: Option<&'a str>,
    update_id: Option<&'a str>,
}

fn replace_recommendations<'i, 'o>(
    conn: &Connection,
    scope: &RecommendationScope,
    items: impl Iterator<Item = (&'i RecommendationItem, Owner<'o>)>,
) -> Result<PersistStats> {
    let mut stats = PersistStats {
        replaced: recommendation_repo::delete_replaceable(conn, scope)?,
        ..Default::default()
    };

    for (item, owner) in items {
        let title = item.title.trim();
        if title.is_empty() {
            stats.drop_item();
            continue;
        }
        let mut rec = RecommendationRow::new(owner.project_id, title);
        rec.section_id = owner.section_id.map(str::to_string);
        rec.update_id = owner.update_id.map(str::to_string);
        rec.description = item.description.trim().to_string();
        rec.justification = item.justification.trim().to_string();
        recommendation_repo::insert_with(conn, &rec)?;
        stats.keep();
    }
    Ok(stats)
}

/// Resolves the section an all-sections item belongs to: by id first, then
/// by case-insensitive name.
fn match_section<'s>(item: &RecommendationItem, sections: &'s [SectionRow]) -> Option<&'s SectionRow> {
    if let Some(id) = item.section_id.as_deref().map(str::trim) {
        if let Some(section) = sections.iter().find(|s| s.id == id) {
            return Some(section);
        }
    }
    let name = item
        .section_name
        .as_deref()
        .or(item.section_id.as_deref())?
        .trim();
    sections.iter().find(|s| s.name.trim().eq_ignore_ascii_case(name))
}

impl ResultPersister {
    /// Replaces a section's recommendations.
    pub fn section_recommendations(
        &self,
        section_id: &str,
        set: &RecommendationSet,
    ) -> Result<PersistStats> {
        let stats = self.db.with_transaction(|conn| {
            let section = section_repo::find_by_id_with(conn, section_id)?
                .ok_or_else(|| PersistError::missing(EntityKind::Section, section_id))?;
            let items = set.items.iter().map(|item| {
                (
                    item,
                    Owner {
                        project_id: &section.project_id,
                        section_id: Some(section.id.as_str()),
                        update_id: None,
                    },
                )
            });
            replace_recommendations(conn, &RecommendationScope::Section(section.id.clone()), items)
        })?;
        info!(
            "Section {section_id}: {} recommendations stored, {} dropped, {} replaced",
            stats.persisted, stats.dropped, stats.replaced
        );
        Ok(stats)
    }

    /// Replaces every non-update recommendation of a project. Items are
    /// attached to the accepted section they name, if any.
    pub fn all_section_recommendations(
        &self,
        project_id: &str,
        set: &RecommendationSet,
    ) -> Result<PersistStats> {
        let stats = self.db.with_transaction(|conn| {
            project_repo::find_by_id_with(conn, project_id)?
                .ok_or_else(|| PersistError::missing(EntityKind::Project, project_id))?;
            let sections: Vec<SectionRow> = section_repo::list_by_project_with(conn, project_id)?
                .into_iter()
                .filter(|s| s.status == SectionStatus::Accepted)
                .collect();

            let items = set.items.iter().map(|item| {
                let section = match_section(item, &sections);
                if section.is_none() && (item.section_id.is_some() || item.section_name.is_some()) {
                    debug!("Recommendation '{}' names an unknown section", item.title);
                }
                (
                    item,
                    Owner {
                        project_id,
                        section_id: section.map(|s| s.id.as_str()),
                        update_id: None,
                    },
                )
            });
            replace_recommendations(
                conn,
                &RecommendationScope::AllSections(project_id.to_string()),
                items,
            )
        })?;
        info!(
            "Project {project_id}: {} recommendations stored, {} dropped, {} replaced",
            stats.persisted, stats.dropped, stats.replaced
        );
        Ok(stats)
    }

    /// Stores a commit/PR analysis: summary, replacement recommendations and
    /// the advanced baseline, all or nothing.
    pub fn update_analysis(&self, update_id: &str, analysis: &UpdateAnalysis) -> Result<PersistStats> {
        let stats = self.db.with_transaction(|conn| {
            let update = update_repo::find_by_id_with(conn, update_id)?
                .ok_or_else(|| PersistError::missing(EntityKind::Update, update_id))?;
            if let Some(summary) = analysis.summary.as_deref() {
                update_repo::store_summary(conn, &update.id, summary)?;
            }

            let items = analysis.recommendations.iter().map(|item| {
                (
                    item,
                    Owner {
                        project_id: &update.project_id,
                        section_id: None,
                        update_id: Some(update.id.as_str()),
                    },
                )
            });
            let stats =
                replace_recommendations(conn, &RecommendationScope::Update(update.id.clone()), items)?;

            if !project_repo::advance_baseline(conn, &update.project_id, &update.commit_sha)? {
                return Err(PersistError::missing(EntityKind::Project, &update.project_id));
            }
            Ok::<_, PersistError>(stats)
        })?;
        info!(
            "Update {update_id}: {} recommendations stored, {} dropped",
            stats.persisted, stats.dropped
        );
        Ok(stats)
    }
}
