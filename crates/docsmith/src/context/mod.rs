//! Context payloads handed to the sandbox's `input/` directory.
//!
//! A payload is one [`ContextDocument`] (`context.json`) plus optional side
//! files. Documents are deterministic: the same entities always serialize
//! to the same bytes. They never carry credentials; repositories appear by
//! name only.

mod builder;
mod diff;

use std::path::Path;

use serde::Serialize;

use crate::domain::{Component, UserContext};
use crate::sandbox::EntryPoint;

pub use builder::{ContextBuilder, KnownTitles};
pub use diff::{line_count, truncate_diff, DiffStats};

pub const CONTEXT_FILE: &str = "context.json";
pub const DIFF_FILE: &str = "diff.patch";
pub const ARTICLES_FILE: &str = "articles.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDocument {
    pub entry_point: EntryPoint,
    pub project: ProjectFacts,
    pub unit: ContextUnit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_context: Option<UserContext>,
    /// Titles the generator should not propose again.
    pub existing_article_titles: Vec<String>,
    pub existing_recommendation_titles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFacts {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    /// `owner/name`, primary first.
    pub repositories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub tech_stack: Vec<String>,
    pub key_patterns: Vec<String>,
    pub components: Vec<Component>,
    pub target_users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionFacts {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationFacts {
    pub id: String,
    pub title: String,
    pub description: String,
    pub justification: String,
}

/// The thing being analyzed or generated, one variant per entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ContextUnit {
    Codebase {
        branch: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        head_sha: Option<String>,
    },
    SectionSuggestions {
        existing_sections: Vec<SectionFacts>,
    },
    Commit {
        sha: String,
        title: String,
        diff: DiffStats,
    },
    PullRequest {
        number: u64,
        merge_sha: String,
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        diff: DiffStats,
    },
    Article {
        article_id: String,
        current_title: String,
        recommendation: RecommendationFacts,
        #[serde(skip_serializing_if = "Option::is_none")]
        section: Option<SectionFacts>,
    },
    Section {
        section: SectionFacts,
    },
    AllSections {
        sections: Vec<SectionFacts>,
    },
    UpdateCheck {
        base_sha: String,
        target_sha: String,
        diff: DiffStats,
        article_count: usize,
    },
    Theme {
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_css: Option<String>,
    },
}

/// An extra file next to `context.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideFile {
    pub name: &'static str,
    pub contents: Vec<u8>,
}

/// Everything written into a sandbox's input directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPayload {
    pub document: ContextDocument,
    pub side_files: Vec<SideFile>,
}

impl ContextPayload {
    pub fn new(document: ContextDocument) -> Self {
        Self {
            document,
            side_files: Vec::new(),
        }
    }

    pub fn with_side_file(mut self, name: &'static str, contents: impl Into<Vec<u8>>) -> Self {
        self.side_files.push(SideFile {
            name,
            contents: contents.into(),
        });
        self
    }

    pub fn side_file(&self, name: &str) -> Option<&SideFile> {
        self.side_files.iter().find(|f| f.name == name)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.document)
    }

    /// Writes `context.json` and every side file into `dir`.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<()> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(dir.join(CONTEXT_FILE), json)?;
        for file in &self.side_files {
            std::fs::write(dir.join(file.name), &file.contents)?;
        }
        Ok(())
    }
}
