//! Typed results, one per entry point family.
//!
//! Item types are lenient: every field defaults, so a single odd item never
//! fails a whole batch. Validation of individual items (blank titles,
//! unknown suggestion kinds) belongs to the persister.

use serde::Deserialize;

use crate::domain::{ProjectMetadata, StructuredContent};

/// Result of `analyze-commit` / `analyze-pr`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateAnalysis {
    pub summary: Option<String>,
    pub recommendations: Vec<RecommendationItem>,
}

/// Result of the recommendation entry points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecommendationSet {
    pub items: Vec<RecommendationItem>,
}

/// One proposed article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RecommendationItem {
    pub title: String,
    pub description: String,
    pub justification: String,
    /// Section references, only meaningful for the all-sections entry point.
    #[serde(alias = "sectionId")]
    pub section_id: Option<String>,
    #[serde(alias = "sectionName", alias = "section")]
    pub section_name: Option<String>,
}

/// Result of `generate-article`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleDraft {
    /// From `title.txt`; `None` keeps the existing title.
    pub title: Option<String>,
    pub body: ArticleBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArticleBody {
    Plain(String),
    Structured(StructuredContent),
}

/// Result of `check-article-updates`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestionSet {
    pub summary: Option<String>,
    pub suggestions: Vec<SuggestionItem>,
}

/// One suggestion, still untrusted: the type and article reference are
/// checked when persisting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SuggestionItem {
    #[serde(alias = "type", alias = "suggestionType")]
    pub suggestion_type: String,
    #[serde(alias = "articleId")]
    pub article_id: Option<String>,
    pub title: String,
    pub description: String,
    pub reason: String,
    pub priority: Option<String>,
}

/// Result of `analyze-codebase`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodebaseAnalysis {
    pub metadata: ProjectMetadata,
}

/// Result of `suggest-sections`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionProposals {
    pub sections: Vec<SectionProposal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SectionProposal {
    pub name: String,
    pub description: String,
}

/// Result of `generate-css`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeStylesheet {
    pub css: String,
}
