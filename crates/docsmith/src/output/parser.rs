use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::fence::{parse_json_lenient, strip_fence};
use super::types::*;
use super::*;
use crate::domain::{ProjectMetadata, StructuredContent};
use crate::sanitize;
use crate::usage::UsageReport;

/// Reader over one sandbox output directory.
#[derive(Debug, Clone, Copy)]
pub struct OutputDir<'a> {
    root: &'a Path,
    excerpt_bytes: usize,
}

/// State of one structured file after reading and shape validation.
enum Structured<T> {
    Absent,
    Parsed(T),
    Invalid { reason: String, raw: String },
}

impl<'a> OutputDir<'a> {
    pub fn new(root: &'a Path, excerpt_bytes: usize) -> Self {
        Self {
            root,
            excerpt_bytes,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Raw file contents. Missing files and read errors both yield `None`.
    fn read_raw(&self, name: &str) -> Option<String> {
        match std::fs::read(self.path(name)) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(file = name, error = %e, "Could not read output file");
                None
            }
        }
    }

    /// A text file, trimmed. Absent or blank is `None`.
    pub fn text(&self, name: &str) -> Option<String> {
        self.read_raw(name)
            .map(|raw| raw.trim().to_string())
            .filter(|text| !text.is_empty())
    }

    /// A text file that generators sometimes wrap in a code fence.
    fn unfenced_text(&self, name: &str) -> Option<String> {
        self.read_raw(name)
            .map(|raw| strip_fence(&raw).to_string())
            .filter(|text| !text.is_empty())
    }

    fn json_object(&self, name: &str) -> Structured<serde_json::Map<String, Value>> {
        let Some(raw) = self.read_raw(name) else {
            return Structured::Absent;
        };
        if raw.trim().is_empty() {
            return Structured::Absent;
        }
        match parse_json_lenient(&raw) {
            Ok(Value::Object(map)) => Structured::Parsed(map),
            Ok(other) => Structured::Invalid {
                reason: format!("{name} is not a JSON object (found {})", kind_of(&other)),
                raw,
            },
            Err(e) => Structured::Invalid {
                reason: format!("{name} is not valid JSON: {e}"),
                raw,
            },
        }
    }

    /// An object whose `key` holds a list. Items that do not fit `T` are
    /// replaced by `T::default()` so the persister can count them as dropped.
    fn json_list<T>(&self, name: &str, key: &str) -> Structured<Vec<T>>
    where
        T: DeserializeOwned + Default,
    {
        match self.json_object(name) {
            Structured::Absent => Structured::Absent,
            Structured::Invalid { reason, raw } => Structured::Invalid { reason, raw },
            Structured::Parsed(mut map) => match map.remove(key) {
                Some(Value::Array(items)) => Structured::Parsed(
                    items
                        .into_iter()
                        .map(|item| {
                            serde_json::from_value(item).unwrap_or_else(|e| {
                                debug!(file = name, error = %e, "Skipping malformed item");
                                T::default()
                            })
                        })
                        .collect(),
                ),
                Some(other) => Structured::Invalid {
                    reason: format!("{name}: `{key}` is not a list (found {})", kind_of(&other)),
                    raw: Value::Object(map).to_string(),
                },
                None => Structured::Invalid {
                    reason: format!("{name} has no `{key}` key"),
                    raw: Value::Object(map).to_string(),
                },
            },
        }
    }

    fn failure(&self, reason: impl Into<String>, raw: Option<&str>) -> ParseFailure {
        ParseFailure {
            reason: reason.into(),
            excerpt: raw.map(|raw| sanitize::excerpt(raw, self.excerpt_bytes)),
        }
    }

    fn recommendation_file(&self) -> Structured<Vec<RecommendationItem>> {
        match self.json_list(RECOMMENDATIONS_FILE, "articles") {
            Structured::Absent => self.json_list(ARTICLES_FILE, "articles"),
            found => found,
        }
    }

    /// `analyze-commit` / `analyze-pr`: a summary, recommendations, or both.
    ///
    /// A malformed recommendations file is treated as absent; the run only
    /// fails when there is neither a summary nor a usable list.
    pub fn update_analysis(&self) -> ParseOutcome<UpdateAnalysis> {
        let summary = self.text(SUMMARY_FILE);
        match (self.recommendation_file(), summary) {
            (Structured::Parsed(recommendations), summary) => {
                ParseOutcome::Success(UpdateAnalysis {
                    summary,
                    recommendations,
                })
            }
            (Structured::Invalid { reason, .. }, Some(summary)) => {
                warn!(%reason, "Ignoring malformed recommendations output");
                ParseOutcome::Success(UpdateAnalysis {
                    summary: Some(summary),
                    recommendations: Vec::new(),
                })
            }
            (Structured::Absent, Some(summary)) => ParseOutcome::Success(UpdateAnalysis {
                summary: Some(summary),
                recommendations: Vec::new(),
            }),
            (Structured::Invalid { reason, raw }, None) => {
                ParseOutcome::Failure(self.failure(reason, Some(&raw)))
            }
            (Structured::Absent, None) => ParseOutcome::Failure(self.failure(
                format!("neither {SUMMARY_FILE} nor {RECOMMENDATIONS_FILE} was produced"),
                None,
            )),
        }
    }

    /// Section and all-section recommendations: the list is required.
    pub fn recommendations(&self) -> ParseOutcome<RecommendationSet> {
        match self.recommendation_file() {
            Structured::Parsed(items) => ParseOutcome::Success(RecommendationSet { items }),
            Structured::Invalid { reason, raw } => {
                ParseOutcome::Failure(self.failure(reason, Some(&raw)))
            }
            Structured::Absent => ParseOutcome::Failure(
                self.failure(format!("{RECOMMENDATIONS_FILE} was not produced"), None),
            ),
        }
    }

    /// `generate-article`: structured `article.json` wins over `content.md`.
    /// `title.txt` is optional.
    pub fn article(&self) -> ParseOutcome<ArticleDraft> {
        let title = self
            .text(TITLE_FILE)
            .and_then(|t| t.lines().next().map(|line| line.trim().to_string()))
            .filter(|t| !t.is_empty());

        let mut rejected_raw = None;
        match self.json_object(ARTICLE_FILE) {
            Structured::Parsed(map) => {
                match serde_json::from_value::<StructuredContent>(Value::Object(map)) {
                    Ok(content) if !content.is_blank() => {
                        return ParseOutcome::Success(ArticleDraft {
                            title,
                            body: ArticleBody::Structured(content),
                        });
                    }
                    Ok(_) => debug!("Structured article is blank"),
                    Err(e) => warn!(error = %e, "Structured article has an unexpected shape"),
                }
            }
            Structured::Invalid { reason, raw } => {
                warn!(%reason, "Ignoring malformed structured article");
                rejected_raw = Some(raw);
            }
            Structured::Absent => {}
        }

        match self.unfenced_text(CONTENT_FILE) {
            Some(content) => ParseOutcome::Success(ArticleDraft {
                title,
                body: ArticleBody::Plain(content),
            }),
            None => ParseOutcome::Failure(self.failure(
                format!("no article content: {CONTENT_FILE} and {ARTICLE_FILE} are missing or empty"),
                rejected_raw.as_deref(),
            )),
        }
    }

    /// `check-article-updates`: suggestions plus an optional summary, which
    /// may come from `summary.md` or a `summary` key.
    pub fn suggestions(&self) -> ParseOutcome<SuggestionSet> {
        let summary_file = self.text(SUMMARY_FILE);
        let inline_summary = match self.json_object(SUGGESTIONS_FILE) {
            Structured::Parsed(map) => map
                .get("summary")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            _ => None,
        };

        match self.json_list::<SuggestionItem>(SUGGESTIONS_FILE, "suggestions") {
            Structured::Parsed(suggestions) => ParseOutcome::Success(SuggestionSet {
                summary: summary_file.or(inline_summary),
                suggestions,
            }),
            Structured::Invalid { reason, raw } => {
                ParseOutcome::Failure(self.failure(reason, Some(&raw)))
            }
            Structured::Absent => match summary_file {
                Some(summary) => ParseOutcome::Success(SuggestionSet {
                    summary: Some(summary),
                    suggestions: Vec::new(),
                }),
                None => ParseOutcome::Failure(self.failure(
                    format!("neither {SUGGESTIONS_FILE} nor {SUMMARY_FILE} was produced"),
                    None,
                )),
            },
        }
    }

    /// `analyze-codebase`: `metadata.json` is required; `summary.md` fills
    /// in the summary when the metadata has none.
    pub fn codebase_analysis(&self) -> ParseOutcome<CodebaseAnalysis> {
        match self.json_object(METADATA_FILE) {
            Structured::Parsed(map) => {
                let raw = Value::Object(map);
                match serde_json::from_value::<ProjectMetadata>(raw.clone()) {
                    Ok(mut metadata) => {
                        if metadata.summary.as_deref().map_or(true, |s| s.trim().is_empty()) {
                            metadata.summary = self.text(SUMMARY_FILE);
                        }
                        ParseOutcome::Success(CodebaseAnalysis { metadata })
                    }
                    Err(e) => ParseOutcome::Failure(self.failure(
                        format!("{METADATA_FILE} has an unexpected shape: {e}"),
                        Some(&raw.to_string()),
                    )),
                }
            }
            Structured::Invalid { reason, raw } => {
                ParseOutcome::Failure(self.failure(reason, Some(&raw)))
            }
            Structured::Absent => ParseOutcome::Failure(
                self.failure(format!("{METADATA_FILE} was not produced"), None),
            ),
        }
    }

    /// `suggest-sections`.
    pub fn section_proposals(&self) -> ParseOutcome<SectionProposals> {
        match self.json_list(SECTIONS_FILE, "sections") {
            Structured::Parsed(sections) => ParseOutcome::Success(SectionProposals { sections }),
            Structured::Invalid { reason, raw } => {
                ParseOutcome::Failure(self.failure(reason, Some(&raw)))
            }
            Structured::Absent => ParseOutcome::Failure(
                self.failure(format!("{SECTIONS_FILE} was not produced"), None),
            ),
        }
    }

    /// `generate-css`.
    pub fn stylesheet(&self) -> ParseOutcome<ThemeStylesheet> {
        match self.unfenced_text(STYLES_FILE) {
            Some(css) => ParseOutcome::Success(ThemeStylesheet { css }),
            None => ParseOutcome::Failure(
                self.failure(format!("{STYLES_FILE} is missing or empty"), None),
            ),
        }
    }

    /// Usage telemetry. Absent or malformed files yield a zeroed report.
    pub fn usage(&self) -> UsageReport {
        match self.json_object(USAGE_FILE) {
            Structured::Parsed(map) => serde_json::from_value(Value::Object(map))
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Malformed usage report, recording zeros");
                    UsageReport::default()
                }),
            Structured::Invalid { reason, .. } => {
                warn!(%reason, "Malformed usage report, recording zeros");
                UsageReport::default()
            }
            Structured::Absent => UsageReport::default(),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
