use log::{debug, info};

use super::{PersistError, PersistStats, Result, ResultPersister};
use crate::db::article_repo;
use crate::db::update_check_repo::{self, SuggestionRow};
use crate::domain::{EntityKind, Priority, SuggestionType};
use crate::output::{SuggestionItem, SuggestionSet};

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl ResultPersister {
    /// Replaces a check's suggestions and stores its summary.
    ///
    /// Unknown kinds, blank titles and `update_needed` items whose article is
    /// not part of the project are dropped. `new_article` items never keep an
    /// article reference.
    pub fn suggestions(&self, check_id: &str, set: &SuggestionSet) -> Result<PersistStats> {
        let stats = self.db.with_transaction(|conn| {
            let check = update_check_repo::find_by_id_with(conn, check_id)?
                .ok_or_else(|| PersistError::missing(EntityKind::UpdateCheck, check_id))?;
            update_check_repo::store_summary(conn, &check.id, set.summary.as_deref())?;

            let mut stats = PersistStats {
                replaced: update_check_repo::delete_suggestions(conn, &check.id)?,
                ..Default::default()
            };
            for item in &set.suggestions {
                match validate(conn, item, &check.project_id)? {
                    Some((kind, article_id)) => {
                        let Some(title) = non_blank(&item.title) else {
                            stats.drop_item();
                            continue;
                        };
                        let mut row = SuggestionRow::new(&check.id, &check.project_id, kind, title);
                        row.article_id = article_id;
                        row.description = item.description.trim().to_string();
                        row.reason = non_blank(&item.reason);
                        row.priority = Priority::normalize(item.priority.as_deref());
                        update_check_repo::insert_suggestion(conn, &row)?;
                        stats.keep();
                    }
                    None => stats.drop_item(),
                }
            }
            Ok::<_, PersistError>(stats)
        })?;
        info!(
            "Update check {check_id}: {} suggestions stored, {} dropped",
            stats.persisted, stats.dropped
        );
        Ok(stats)
    }

    /// Records why a check failed. The prior suggestions stay untouched.
    pub fn update_check_error(&self, check_id: &str, error: &str) -> Result<()> {
        if !update_check_repo::store_error(&self.db, check_id, error)? {
            return Err(PersistError::missing(EntityKind::UpdateCheck, check_id));
        }
        Ok(())
    }
}

/// Returns the suggestion kind and article reference to store, or `None` to drop.
fn validate(
    conn: &rusqlite::Connection,
    item: &SuggestionItem,
    project_id: &str,
) -> Result<Option<(SuggestionType, Option<String>)>> {
    let raw_kind = item.suggestion_type.trim().to_ascii_lowercase();
    let Some(kind) = SuggestionType::parse(&raw_kind) else {
        debug!("Dropping suggestion '{}' with unknown type '{raw_kind}'", item.title);
        return Ok(None);
    };
    match kind {
        SuggestionType::NewArticle => Ok(Some((kind, None))),
        SuggestionType::UpdateNeeded => {
            let Some(article_id) = item.article_id.as_deref().and_then(non_blank) else {
                debug!("Dropping update_needed suggestion '{}' without article", item.title);
                return Ok(None);
            };
            if article_repo::exists_in_project(conn, &article_id, project_id)? {
                Ok(Some((kind, Some(article_id))))
            } else {
                debug!("Dropping suggestion '{}' for unknown article {article_id}", item.title);
                Ok(None)
            }
        }
    }
}
