use log::info;

use super::{PersistError, Result, ResultPersister};
use crate::db::article_repo;
use crate::db::recommendation_repo;
use crate::db::update_repo::{self, UpdateRow};
use crate::domain::{short_sha, EntityKind, UpdateKind};
use crate::output::{ArticleBody, ArticleDraft};

/// Placeholder body for an article whose generation failed.
pub fn article_fallback_text(title: &str, description: &str) -> String {
    let mut text = format!(
        "# {}\n\nThis article could not be generated automatically yet.",
        title.trim()
    );
    let description = description.trim();
    if !description.is_empty() {
        text.push_str("\n\n");
        text.push_str(description);
    }
    text.push('\n');
    text
}

/// Placeholder summary for a commit or pull request whose analysis failed.
pub fn update_fallback_text(update: &UpdateRow, diff_line_count: Option<usize>) -> String {
    let subject = match (update.kind, update.pr_number) {
        (UpdateKind::PullRequest, Some(number)) => {
            format!("Pull request #{number} ({})", short_sha(&update.commit_sha))
        }
        _ => format!("Commit {}", short_sha(&update.commit_sha)),
    };
    let size = match diff_line_count {
        Some(lines) => format!("The diff has {lines} lines."),
        None => "The diff could not be retrieved.".to_string(),
    };
    format!(
        "{subject}: {}\n\nAutomatic analysis is unavailable for this change. {size}\n",
        update.title.trim()
    )
}

impl ResultPersister {
    /// Stores a generated draft and marks its recommendation as generated.
    pub fn article(&self, article_id: &str, draft: &ArticleDraft) -> Result<()> {
        self.db.with_transaction(|conn| {
            let article = article_repo::find_by_id_with(conn, article_id)?
                .ok_or_else(|| PersistError::missing(EntityKind::Article, article_id))?;
            let (content, structured) = match &draft.body {
                ArticleBody::Plain(text) => (Some(text.as_str()), None),
                ArticleBody::Structured(content) => (None, Some(content)),
            };
            article_repo::store_draft(conn, &article.id, draft.title.as_deref(), content, structured)?;
            recommendation_repo::mark_generated(conn, &article.recommendation_id)?;
            Ok::<_, PersistError>(())
        })?;
        info!("Article {article_id}: draft stored");
        Ok(())
    }

    /// Replaces an article's body with fallback text built from its
    /// recommendation, and records the error.
    pub fn article_fallback(&self, article_id: &str, error: &str) -> Result<()> {
        let article = article_repo::find_by_id(&self.db, article_id)?
            .ok_or_else(|| PersistError::missing(EntityKind::Article, article_id))?;
        let (title, description) = match recommendation_repo::find_by_id(&self.db, &article.recommendation_id)? {
            Some(rec) => (rec.title, rec.description),
            None => (article.title.clone(), String::new()),
        };
        let text = article_fallback_text(&title, &description);
        if !article_repo::store_fallback(&self.db, article_id, &text, error)? {
            return Err(PersistError::missing(EntityKind::Article, article_id));
        }
        info!("Article {article_id}: fallback content stored");
        Ok(())
    }

    /// Stores a fallback summary on a failed update. The baseline is not touched.
    pub fn update_fallback(&self, update_id: &str, diff_line_count: Option<usize>) -> Result<()> {
        self.db.with_transaction(|conn| {
            let update = update_repo::find_by_id_with(conn, update_id)?
                .ok_or_else(|| PersistError::missing(EntityKind::Update, update_id))?;
            update_repo::store_summary(conn, update_id, &update_fallback_text(&update, diff_line_count))?;
            Ok::<_, PersistError>(())
        })?;
        info!("Update {update_id}: fallback summary stored");
        Ok(())
    }
}
