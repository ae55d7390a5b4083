//! Per-kind job bodies: load entities, build context, run the sandbox,
//! persist. Status handling lives in the runner.

use serde_json::json;
use tracing::{debug, info_span, Instrument};

use super::runner::{JobRunner, RunState};
use super::{FailureKind, JobFailure, JobKind};
use crate::context::{line_count, KnownTitles};
use crate::db::project_repo::{self, ProjectRow};
use crate::db::{article_repo, recommendation_repo, section_repo, update_check_repo, update_repo};
use crate::domain::{EntityKind, UpdateKind};
use crate::persist::{PersistError, PersistStats};

fn gone(kind: EntityKind, id: &str) -> JobFailure {
    PersistError::missing(kind, id).into()
}

fn stats_summary(noun: &str, stats: PersistStats) -> String {
    format!(
        "{} {noun} stored, {} dropped, {} replaced",
        stats.persisted, stats.dropped, stats.replaced
    )
}

impl JobRunner {
    fn load_project(&self, project_id: &str) -> Result<ProjectRow, JobFailure> {
        project_repo::find_by_id(&self.env.db, project_id)?
            .ok_or_else(|| gone(EntityKind::Project, project_id))
    }

    fn known_titles(&self, project_id: &str) -> Result<KnownTitles, JobFailure> {
        let articles = article_repo::list_by_project(&self.env.db, project_id)?;
        let recommendations = recommendation_repo::list_by_project(&self.env.db, project_id)?;
        Ok(KnownTitles::from_rows(&articles, &recommendations))
    }

    pub(super) async fn analyze_codebase(&self, project_id: &str) -> Result<String, JobFailure> {
        let project = self.load_project(project_id)?;
        let head = if project.primary_repository().is_some() {
            let (repo, token) = self.primary_repository(&project).await?;
            let sha = self
                .env
                .source_host
                .head_commit(repo, token.as_ref())
                .instrument(info_span!("head_commit", repository = %repo.full_name))
                .await?;
            Some(sha)
        } else {
            None
        };

        let payload = self.context.for_codebase(&project, head.as_deref());
        let analysis = self
            .run_sandbox(
                JobKind::CodebaseAnalysis,
                &project,
                json!({ "projectId": project.id, "headSha": head }),
                &payload,
                |out| out.codebase_analysis(),
            )
            .await?;
        self.persister
            .codebase_analysis(&project.id, head.as_deref(), &analysis)?;
        Ok(match head {
            Some(sha) => format!("Codebase analyzed at {}", crate::domain::short_sha(&sha)),
            None => "Codebase analyzed".to_string(),
        })
    }

    pub(super) async fn suggest_sections(&self, project_id: &str) -> Result<String, JobFailure> {
        let project = self.load_project(project_id)?;
        let sections = section_repo::list_by_project(&self.env.db, &project.id)?;
        let payload = self.context.for_section_suggestions(&project, &sections);
        let proposals = self
            .run_sandbox(
                JobKind::SectionSuggestions,
                &project,
                json!({ "projectId": project.id }),
                &payload,
                |out| out.section_proposals(),
            )
            .await?;
        let stats = self.persister.section_proposals(&project.id, &proposals)?;
        Ok(stats_summary("sections", stats))
    }

    /// Commit and pull request analysis. The diff line count is kept in
    /// `state` so a failed run can still describe the change.
    pub(super) async fn analyze_update(
        &self,
        kind: JobKind,
        update_id: &str,
        state: &mut RunState,
    ) -> Result<String, JobFailure> {
        let update = update_repo::find_by_id(&self.env.db, update_id)?
            .ok_or_else(|| gone(EntityKind::Update, update_id))?;
        let project = self.load_project(&update.project_id)?;
        let (repo, token) = self.primary_repository(&project).await?;

        let diff = match (kind, update.kind, update.pr_number) {
            (JobKind::PullRequestAnalysis, UpdateKind::PullRequest, Some(number)) => {
                self.env
                    .source_host
                    .pull_request_diff(repo, number, token.as_ref())
                    .instrument(info_span!("pull_request_diff", number))
                    .await?
            }
            (JobKind::CommitAnalysis, UpdateKind::Commit, _) => {
                self.env
                    .source_host
                    .commit_diff(repo, &update.commit_sha, token.as_ref())
                    .instrument(info_span!("commit_diff"))
                    .await?
            }
            _ => {
                return Err(JobFailure::new(
                    FailureKind::Configuration,
                    format!("Update '{update_id}' is a {} and cannot run as {kind}", update.kind),
                ))
            }
        };
        let lines = line_count(&diff);
        state.diff_lines = Some(lines);
        debug!(lines, "Fetched diff");

        let titles = self.known_titles(&project.id)?;
        let payload = if kind == JobKind::PullRequestAnalysis {
            self.context.for_pull_request(&project, &update, &diff, titles)
        } else {
            self.context.for_commit(&project, &update, &diff, titles)
        };
        let analysis = self
            .run_sandbox(
                kind,
                &project,
                json!({ "updateId": update.id, "commitSha": update.commit_sha }),
                &payload,
                |out| out.update_analysis(),
            )
            .await?;
        let stats = self.persister.update_analysis(&update.id, &analysis)?;
        Ok(stats_summary("recommendations", stats))
    }

    pub(super) async fn generate_article(&self, article_id: &str) -> Result<String, JobFailure> {
        let article = article_repo::find_by_id(&self.env.db, article_id)?
            .ok_or_else(|| gone(EntityKind::Article, article_id))?;
        let project = self.load_project(&article.project_id)?;
        let recommendation = recommendation_repo::find_by_id(&self.env.db, &article.recommendation_id)?
            .ok_or_else(|| {
                JobFailure::new(
                    FailureKind::Persistence,
                    format!(
                        "Recommendation '{}' of article '{article_id}' not found",
                        article.recommendation_id
                    ),
                )
            })?;
        let section = match article.section_id.as_deref() {
            Some(id) => section_repo::find_by_id(&self.env.db, id)?,
            None => None,
        };

        let titles = self.known_titles(&project.id)?;
        let payload =
            self.context
                .for_article(&project, &article, &recommendation, section.as_ref(), titles);
        let draft = self
            .run_sandbox(
                JobKind::ArticleGeneration,
                &project,
                json!({ "articleId": article.id, "recommendationId": recommendation.id }),
                &payload,
                |out| out.article(),
            )
            .await?;
        self.persister.article(&article.id, &draft)?;
        Ok(format!(
            "Article '{}' generated",
            draft.title.as_deref().unwrap_or(&article.title)
        ))
    }

    pub(super) async fn section_recommendations(&self, section_id: &str) -> Result<String, JobFailure> {
        let section = section_repo::find_by_id(&self.env.db, section_id)?
            .ok_or_else(|| gone(EntityKind::Section, section_id))?;
        let project = self.load_project(&section.project_id)?;
        let titles = self.known_titles(&project.id)?;
        let payload = self.context.for_section(&project, &section, titles);
        let set = self
            .run_sandbox(
                JobKind::SectionRecommendations,
                &project,
                json!({ "sectionId": section.id }),
                &payload,
                |out| out.recommendations(),
            )
            .await?;
        let stats = self.persister.section_recommendations(&section.id, &set)?;
        Ok(stats_summary("recommendations", stats))
    }

    pub(super) async fn all_recommendations(&self, project_id: &str) -> Result<String, JobFailure> {
        let project = self.load_project(project_id)?;
        let sections = section_repo::list_by_project(&self.env.db, &project.id)?;
        let titles = self.known_titles(&project.id)?;
        let payload = self.context.for_all_sections(&project, &sections, titles);
        let set = self
            .run_sandbox(
                JobKind::AllSectionRecommendations,
                &project,
                json!({ "projectId": project.id, "sectionCount": sections.len() }),
                &payload,
                |out| out.recommendations(),
            )
            .await?;
        let stats = self.persister.all_section_recommendations(&project.id, &set)?;
        Ok(stats_summary("recommendations", stats))
    }

    pub(super) async fn check_article_updates(
        &self,
        check_id: &str,
        state: &mut RunState,
    ) -> Result<String, JobFailure> {
        let check = update_check_repo::find_by_id(&self.env.db, check_id)?
            .ok_or_else(|| gone(EntityKind::UpdateCheck, check_id))?;
        let project = self.load_project(&check.project_id)?;
        let (repo, token) = self.primary_repository(&project).await?;
        let diff = self
            .env
            .source_host
            .compare(repo, &check.base_sha, &check.target_sha, token.as_ref())
            .instrument(info_span!("compare"))
            .await?;
        state.diff_lines = Some(line_count(&diff));

        let articles = article_repo::list_by_project(&self.env.db, &project.id)?;
        let payload = self
            .context
            .for_update_check(&project, &check, &diff, &articles)
            .map_err(JobFailure::staging)?;
        let set = self
            .run_sandbox(
                JobKind::ArticleUpdateCheck,
                &project,
                json!({ "checkId": check.id, "baseSha": check.base_sha, "targetSha": check.target_sha }),
                &payload,
                |out| out.suggestions(),
            )
            .await?;
        let stats = self.persister.suggestions(&check.id, &set)?;
        Ok(stats_summary("suggestions", stats))
    }

    pub(super) async fn generate_theme(&self, project_id: &str) -> Result<String, JobFailure> {
        let project = self.load_project(project_id)?;
        let payload = self.context.for_theme(&project);
        let stylesheet = self
            .run_sandbox(
                JobKind::ThemeGeneration,
                &project,
                json!({ "projectId": project.id }),
                &payload,
                |out| out.stylesheet(),
            )
            .await?;
        self.persister.theme(&project.id, &stylesheet)?;
        Ok(format!("Stylesheet stored ({} bytes)", stylesheet.css.len()))
    }
}
