use std::collections::BTreeSet;

use serde::Serialize;

use super::*;
use crate::db::article_repo::ArticleRow;
use crate::db::project_repo::ProjectRow;
use crate::db::recommendation_repo::RecommendationRow;
use crate::db::section_repo::SectionRow;
use crate::db::update_check_repo::UpdateCheckRow;
use crate::db::update_repo::UpdateRow;
use crate::domain::{SectionStatus, StructuredContent};

/// Titles already present in a project, sorted and de-duplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownTitles {
    pub articles: Vec<String>,
    pub recommendations: Vec<String>,
}

impl KnownTitles {
    pub fn from_rows(articles: &[ArticleRow], recommendations: &[RecommendationRow]) -> Self {
        Self {
            articles: sorted_titles(articles.iter().map(|a| a.title.as_str())),
            recommendations: sorted_titles(recommendations.iter().map(|r| r.title.as_str())),
        }
    }
}

fn sorted_titles<'a>(titles: impl Iterator<Item = &'a str>) -> Vec<String> {
    titles
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Entry in the `articles.json` side file of an update check.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArticleFacts<'a> {
    id: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    section_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    structured_content: Option<&'a StructuredContent>,
}

/// Assembles context payloads from already-loaded entities.
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder {
    max_diff_bytes: usize,
}

impl ContextBuilder {
    pub fn new(max_diff_bytes: usize) -> Self {
        Self { max_diff_bytes }
    }

    fn document(
        &self,
        entry_point: EntryPoint,
        project: &ProjectRow,
        unit: ContextUnit,
        titles: KnownTitles,
    ) -> ContextDocument {
        ContextDocument {
            entry_point,
            project: project_facts(project),
            unit,
            user_context: project.user_context.clone().filter(|ctx| !ctx.is_empty()),
            existing_article_titles: titles.articles,
            existing_recommendation_titles: titles.recommendations,
        }
    }

    pub fn for_codebase(&self, project: &ProjectRow, head_sha: Option<&str>) -> ContextPayload {
        let branch = project
            .primary_repository()
            .map(|r| r.branch.clone())
            .unwrap_or_else(|| "main".to_string());
        let unit = ContextUnit::Codebase {
            branch,
            head_sha: head_sha.map(str::to_string),
        };
        ContextPayload::new(self.document(
            EntryPoint::AnalyzeCodebase,
            project,
            unit,
            KnownTitles::default(),
        ))
    }

    pub fn for_section_suggestions(
        &self,
        project: &ProjectRow,
        sections: &[SectionRow],
    ) -> ContextPayload {
        let unit = ContextUnit::SectionSuggestions {
            existing_sections: sections.iter().map(section_facts).collect(),
        };
        ContextPayload::new(self.document(
            EntryPoint::SuggestSections,
            project,
            unit,
            KnownTitles::default(),
        ))
    }

    pub fn for_commit(
        &self,
        project: &ProjectRow,
        update: &UpdateRow,
        diff: &str,
        titles: KnownTitles,
    ) -> ContextPayload {
        let (diff_text, stats) = truncate_diff(diff, self.max_diff_bytes);
        let unit = ContextUnit::Commit {
            sha: update.commit_sha.clone(),
            title: update.title.clone(),
            diff: stats,
        };
        ContextPayload::new(self.document(EntryPoint::AnalyzeCommit, project, unit, titles))
            .with_side_file(DIFF_FILE, diff_text)
    }

    pub fn for_pull_request(
        &self,
        project: &ProjectRow,
        update: &UpdateRow,
        diff: &str,
        titles: KnownTitles,
    ) -> ContextPayload {
        let (diff_text, stats) = truncate_diff(diff, self.max_diff_bytes);
        let unit = ContextUnit::PullRequest {
            number: update.pr_number.unwrap_or_default(),
            merge_sha: update.commit_sha.clone(),
            title: update.title.clone(),
            body: update.body.clone().filter(|b| !b.trim().is_empty()),
            diff: stats,
        };
        ContextPayload::new(self.document(EntryPoint::AnalyzePr, project, unit, titles))
            .with_side_file(DIFF_FILE, diff_text)
    }

    pub fn for_article(
        &self,
        project: &ProjectRow,
        article: &ArticleRow,
        recommendation: &RecommendationRow,
        section: Option<&SectionRow>,
        titles: KnownTitles,
    ) -> ContextPayload {
        let unit = ContextUnit::Article {
            article_id: article.id.clone(),
            current_title: article.title.clone(),
            recommendation: RecommendationFacts {
                id: recommendation.id.clone(),
                title: recommendation.title.clone(),
                description: recommendation.description.clone(),
                justification: recommendation.justification.clone(),
            },
            section: section.map(section_facts),
        };
        ContextPayload::new(self.document(EntryPoint::GenerateArticle, project, unit, titles))
    }

    pub fn for_section(
        &self,
        project: &ProjectRow,
        section: &SectionRow,
        titles: KnownTitles,
    ) -> ContextPayload {
        let unit = ContextUnit::Section {
            section: section_facts(section),
        };
        ContextPayload::new(self.document(
            EntryPoint::GenerateSectionRecommendations,
            project,
            unit,
            titles,
        ))
    }

    /// Only accepted sections are offered to the generator.
    pub fn for_all_sections(
        &self,
        project: &ProjectRow,
        sections: &[SectionRow],
        titles: KnownTitles,
    ) -> ContextPayload {
        let unit = ContextUnit::AllSections {
            sections: sections
                .iter()
                .filter(|s| s.status == SectionStatus::Accepted)
                .map(section_facts)
                .collect(),
        };
        ContextPayload::new(self.document(
            EntryPoint::GenerateAllRecommendations,
            project,
            unit,
            titles,
        ))
    }

    /// Writes the diff and the current articles as side files.
    pub fn for_update_check(
        &self,
        project: &ProjectRow,
        check: &UpdateCheckRow,
        diff: &str,
        articles: &[ArticleRow],
    ) -> serde_json::Result<ContextPayload> {
        let (diff_text, stats) = truncate_diff(diff, self.max_diff_bytes);
        let facts: Vec<ArticleFacts<'_>> = articles
            .iter()
            .map(|a| ArticleFacts {
                id: &a.id,
                title: &a.title,
                section_id: a.section_id.as_deref(),
                content: a.content.as_deref(),
                structured_content: a.structured_content.as_ref(),
            })
            .collect();
        let articles_json = serde_json::to_vec_pretty(&facts)?;

        let unit = ContextUnit::UpdateCheck {
            base_sha: check.base_sha.clone(),
            target_sha: check.target_sha.clone(),
            diff: stats,
            article_count: articles.len(),
        };
        let titles = KnownTitles::from_rows(articles, &[]);
        Ok(ContextPayload::new(self.document(
            EntryPoint::CheckArticleUpdates,
            project,
            unit,
            titles,
        ))
        .with_side_file(DIFF_FILE, diff_text)
        .with_side_file(ARTICLES_FILE, articles_json))
    }

    pub fn for_theme(&self, project: &ProjectRow) -> ContextPayload {
        let unit = ContextUnit::Theme {
            prompt: project.theme_prompt.clone().filter(|p| !p.trim().is_empty()),
            current_css: project.custom_css.clone(),
        };
        ContextPayload::new(self.document(
            EntryPoint::GenerateCss,
            project,
            unit,
            KnownTitles::default(),
        ))
    }
}

fn project_facts(project: &ProjectRow) -> ProjectFacts {
    let metadata = project.analysis_metadata.clone().unwrap_or_default();
    ProjectFacts {
        id: project.id.clone(),
        name: project.name.clone(),
        overview: project.overview.clone(),
        repositories: project
            .repositories
            .iter()
            .map(|r| r.full_name.clone())
            .collect(),
        summary: metadata.summary,
        tech_stack: metadata.tech_stack,
        key_patterns: metadata.key_patterns,
        components: metadata.components,
        target_users: metadata.target_users,
    }
}

fn section_facts(section: &SectionRow) -> SectionFacts {
    SectionFacts {
        id: section.id.clone(),
        name: section.name.clone(),
        description: section.description.clone(),
        status: section.status.as_str().to_string(),
    }
}
