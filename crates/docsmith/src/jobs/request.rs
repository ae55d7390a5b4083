use serde::{Deserialize, Serialize};

use crate::db::status_repo::StatusColumn;
use crate::domain::EntityKind;
use crate::error::WorkerError;
use crate::sandbox::EntryPoint;

/// The nine job types of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    CodebaseAnalysis,
    SectionSuggestions,
    CommitAnalysis,
    PullRequestAnalysis,
    ArticleGeneration,
    SectionRecommendations,
    AllSectionRecommendations,
    ArticleUpdateCheck,
    ThemeGeneration,
}

impl JobKind {
    /// The form stored in `usage_records.job_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CodebaseAnalysis => "codebase_analysis",
            JobKind::SectionSuggestions => "section_suggestions",
            JobKind::CommitAnalysis => "commit_analysis",
            JobKind::PullRequestAnalysis => "pull_request_analysis",
            JobKind::ArticleGeneration => "article_generation",
            JobKind::SectionRecommendations => "section_recommendations",
            JobKind::AllSectionRecommendations => "all_section_recommendations",
            JobKind::ArticleUpdateCheck => "article_update_check",
            JobKind::ThemeGeneration => "theme_generation",
        }
    }

    pub fn entry_point(&self) -> EntryPoint {
        match self {
            JobKind::CodebaseAnalysis => EntryPoint::AnalyzeCodebase,
            JobKind::SectionSuggestions => EntryPoint::SuggestSections,
            JobKind::CommitAnalysis => EntryPoint::AnalyzeCommit,
            JobKind::PullRequestAnalysis => EntryPoint::AnalyzePr,
            JobKind::ArticleGeneration => EntryPoint::GenerateArticle,
            JobKind::SectionRecommendations => EntryPoint::GenerateSectionRecommendations,
            JobKind::AllSectionRecommendations => EntryPoint::GenerateAllRecommendations,
            JobKind::ArticleUpdateCheck => EntryPoint::CheckArticleUpdates,
            JobKind::ThemeGeneration => EntryPoint::GenerateCss,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work: one job kind against one target entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobRequest {
    AnalyzeCodebase { project_id: String },
    SuggestSections { project_id: String },
    AnalyzeCommit { update_id: String },
    AnalyzePullRequest { update_id: String },
    GenerateArticle { article_id: String },
    GenerateSectionRecommendations { section_id: String },
    GenerateAllRecommendations { project_id: String },
    CheckArticleUpdates { check_id: String },
    GenerateTheme { project_id: String },
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::AnalyzeCodebase { .. } => JobKind::CodebaseAnalysis,
            JobRequest::SuggestSections { .. } => JobKind::SectionSuggestions,
            JobRequest::AnalyzeCommit { .. } => JobKind::CommitAnalysis,
            JobRequest::AnalyzePullRequest { .. } => JobKind::PullRequestAnalysis,
            JobRequest::GenerateArticle { .. } => JobKind::ArticleGeneration,
            JobRequest::GenerateSectionRecommendations { .. } => JobKind::SectionRecommendations,
            JobRequest::GenerateAllRecommendations { .. } => JobKind::AllSectionRecommendations,
            JobRequest::CheckArticleUpdates { .. } => JobKind::ArticleUpdateCheck,
            JobRequest::GenerateTheme { .. } => JobKind::ThemeGeneration,
        }
    }

    /// ID of the entity this job owns.
    pub fn target_id(&self) -> &str {
        match self {
            JobRequest::AnalyzeCodebase { project_id }
            | JobRequest::SuggestSections { project_id }
            | JobRequest::GenerateAllRecommendations { project_id }
            | JobRequest::GenerateTheme { project_id } => project_id,
            JobRequest::AnalyzeCommit { update_id }
            | JobRequest::AnalyzePullRequest { update_id } => update_id,
            JobRequest::GenerateArticle { article_id } => article_id,
            JobRequest::GenerateSectionRecommendations { section_id } => section_id,
            JobRequest::CheckArticleUpdates { check_id } => check_id,
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            JobRequest::AnalyzeCodebase { .. }
            | JobRequest::SuggestSections { .. }
            | JobRequest::GenerateAllRecommendations { .. }
            | JobRequest::GenerateTheme { .. } => EntityKind::Project,
            JobRequest::AnalyzeCommit { .. } | JobRequest::AnalyzePullRequest { .. } => {
                EntityKind::Update
            }
            JobRequest::GenerateArticle { .. } => EntityKind::Article,
            JobRequest::GenerateSectionRecommendations { .. } => EntityKind::Section,
            JobRequest::CheckArticleUpdates { .. } => EntityKind::UpdateCheck,
        }
    }

    /// The status column this job claims on its own target, if it has one.
    pub fn status_column(&self) -> Option<StatusColumn> {
        match self {
            JobRequest::AnalyzeCodebase { .. } => Some(StatusColumn::ProjectAnalysis),
            JobRequest::GenerateTheme { .. } => Some(StatusColumn::ProjectTheme),
            JobRequest::AnalyzeCommit { .. } | JobRequest::AnalyzePullRequest { .. } => {
                Some(StatusColumn::UpdateAnalysis)
            }
            JobRequest::GenerateArticle { .. } => Some(StatusColumn::ArticleGeneration),
            JobRequest::GenerateSectionRecommendations { .. } => {
                Some(StatusColumn::SectionRecommendations)
            }
            JobRequest::CheckArticleUpdates { .. } => Some(StatusColumn::UpdateCheck),
            JobRequest::SuggestSections { .. } | JobRequest::GenerateAllRecommendations { .. } => {
                None
            }
        }
    }
}

/// Where jobs are submitted. Implemented by the worker pool's sender; the
/// workflow uses it for cascades.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, request: JobRequest) -> Result<(), WorkerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_tagged() {
        let request = JobRequest::AnalyzeCommit {
            update_id: "u1".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"type": "analyze_commit", "update_id": "u1"}));
        assert_eq!(request.kind(), JobKind::CommitAnalysis);
        assert_eq!(request.target_id(), "u1");
        assert_eq!(request.entity_kind(), EntityKind::Update);
    }

    #[test]
    fn test_every_kind_maps_to_distinct_entry_point() {
        let kinds = [
            JobKind::CodebaseAnalysis,
            JobKind::SectionSuggestions,
            JobKind::CommitAnalysis,
            JobKind::PullRequestAnalysis,
            JobKind::ArticleGeneration,
            JobKind::SectionRecommendations,
            JobKind::AllSectionRecommendations,
            JobKind::ArticleUpdateCheck,
            JobKind::ThemeGeneration,
        ];
        let entry_points: std::collections::HashSet<_> =
            kinds.iter().map(|k| k.entry_point()).collect();
        assert_eq!(entry_points.len(), EntryPoint::ALL.len());
    }

    #[test]
    fn test_status_columns() {
        let request = JobRequest::GenerateSectionRecommendations {
            section_id: "s".into(),
        };
        assert_eq!(
            request.status_column(),
            Some(StatusColumn::SectionRecommendations)
        );
        let request = JobRequest::SuggestSections {
            project_id: "p".into(),
        };
        assert_eq!(request.status_column(), None);
    }
}
