//! Turns a sandbox output directory into typed results.
//!
//! Parse problems are returned as [`ParseOutcome::Failure`], never raised:
//! callers decide what a failure means for the owning entity.

mod fence;
mod parser;
mod types;

use thiserror::Error;

pub use fence::{first_json_object, parse_json_lenient, strip_fence};
pub use parser::OutputDir;
pub use types::{
    ArticleBody, ArticleDraft, CodebaseAnalysis, RecommendationItem, RecommendationSet,
    SectionProposal, SectionProposals, SuggestionItem, SuggestionSet, ThemeStylesheet,
    UpdateAnalysis,
};

pub const TITLE_FILE: &str = "title.txt";
pub const CONTENT_FILE: &str = "content.md";
pub const ARTICLE_FILE: &str = "article.json";
pub const RECOMMENDATIONS_FILE: &str = "recommendations.json";
/// Older generators write recommendations under this name.
pub const ARTICLES_FILE: &str = "articles.json";
pub const SUGGESTIONS_FILE: &str = "suggestions.json";
pub const SECTIONS_FILE: &str = "sections.json";
pub const SUMMARY_FILE: &str = "summary.md";
pub const METADATA_FILE: &str = "metadata.json";
pub const STYLES_FILE: &str = "styles.css";
pub const USAGE_FILE: &str = "usage.json";

/// Either a typed result or a description of why none could be produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Success(T),
    Failure(ParseFailure),
}

impl<T> ParseOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ParseOutcome::Success(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ParseOutcome<U> {
        match self {
            ParseOutcome::Success(value) => ParseOutcome::Success(f(value)),
            ParseOutcome::Failure(failure) => ParseOutcome::Failure(failure),
        }
    }

    pub fn into_result(self) -> Result<T, ParseFailure> {
        match self {
            ParseOutcome::Success(value) => Ok(value),
            ParseOutcome::Failure(failure) => Err(failure),
        }
    }
}

/// Why an output directory yielded no usable result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct ParseFailure {
    pub reason: String,
    /// Bounded quote of the offending file, when there was one.
    pub excerpt: Option<String>,
}

impl ParseFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            excerpt: None,
        }
    }
}
