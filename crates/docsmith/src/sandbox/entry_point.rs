use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A named capability of the sandbox. One per job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryPoint {
    AnalyzeCodebase,
    SuggestSections,
    AnalyzeCommit,
    AnalyzePr,
    GenerateArticle,
    GenerateSectionRecommendations,
    GenerateAllRecommendations,
    CheckArticleUpdates,
    GenerateCss,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 9] = [
        EntryPoint::AnalyzeCodebase,
        EntryPoint::SuggestSections,
        EntryPoint::AnalyzeCommit,
        EntryPoint::AnalyzePr,
        EntryPoint::GenerateArticle,
        EntryPoint::GenerateSectionRecommendations,
        EntryPoint::GenerateAllRecommendations,
        EntryPoint::CheckArticleUpdates,
        EntryPoint::GenerateCss,
    ];

    /// The selector passed to the sandboxed process.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::AnalyzeCodebase => "analyze-codebase",
            EntryPoint::SuggestSections => "suggest-sections",
            EntryPoint::AnalyzeCommit => "analyze-commit",
            EntryPoint::AnalyzePr => "analyze-pr",
            EntryPoint::GenerateArticle => "generate-article",
            EntryPoint::GenerateSectionRecommendations => "generate-section-recommendations",
            EntryPoint::GenerateAllRecommendations => "generate-all-recommendations",
            EntryPoint::CheckArticleUpdates => "check-article-updates",
            EntryPoint::GenerateCss => "generate-css",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == value)
    }

    /// Whether the sandboxed process reads the repository itself and so
    /// needs a repository token.
    pub fn reads_repository(&self) -> bool {
        !matches!(self, EntryPoint::GenerateCss)
    }

    /// Whole-repository work gets ten minutes, everything else five.
    pub fn default_timeout(&self) -> Duration {
        match self {
            EntryPoint::AnalyzeCodebase | EntryPoint::CheckArticleUpdates => {
                Duration::from_secs(600)
            }
            _ => Duration::from_secs(300),
        }
    }
}

impl std::fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
