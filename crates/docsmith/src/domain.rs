//! Status enumerations and small value types shared by every layer.
//!
//! All enums are persisted as their snake_case string form. Parsing is
//! strict (`parse` returns `None` on unknown input) except for
//! [`Priority::normalize`], which deliberately falls back to `Medium`.

use serde::{Deserialize, Serialize};

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Returns the persisted string form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Parses the persisted string form.
            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Lifecycle of a run-once-per-trigger operation: project analysis,
    /// update analysis, article generation, update checks, theme generation
    /// and (without `Pending`) section recommendation generation.
    RunStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
);

impl RunStatus {
    /// `completed` and `failed` are terminal: nothing moves on without a new trigger.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

string_enum!(
    /// Whether a section is eligible for generation.
    SectionStatus {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
    }
);

string_enum!(
    RecommendationStatus {
        Pending => "pending",
        Rejected => "rejected",
        Generated => "generated",
    }
);

string_enum!(
    /// Editorial review of a generated article. Independent of generation.
    ReviewStatus {
        Unreviewed => "unreviewed",
        Approved => "approved",
        Rejected => "rejected",
    }
);

string_enum!(
    SuggestionType {
        UpdateNeeded => "update_needed",
        NewArticle => "new_article",
    }
);

string_enum!(
    SuggestionStatus {
        Pending => "pending",
        Accepted => "accepted",
        Dismissed => "dismissed",
    }
);

string_enum!(
    Priority {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

impl Priority {
    /// Maps free-form generator output onto the closed set.
    pub fn normalize(value: Option<&str>) -> Self {
        value
            .map(|v| v.trim().to_ascii_lowercase())
            .and_then(|v| Priority::parse(&v))
            .unwrap_or(Priority::Medium)
    }
}

string_enum!(
    /// Project onboarding wizard position.
    OnboardingStep {
        Analyze => "analyze",
        Sections => "sections",
        Generating => "generating",
        Complete => "complete",
    }
);

impl OnboardingStep {
    /// Past the analysis step but not finished yet.
    pub fn is_mid_generation(&self) -> bool {
        matches!(self, OnboardingStep::Sections | OnboardingStep::Generating)
    }
}

string_enum!(
    UpdateKind {
        Commit => "commit",
        PullRequest => "pull_request",
    }
);

string_enum!(
    /// Entity types that carry pipeline status and receive job events.
    EntityKind {
        Project => "project",
        Section => "section",
        Article => "article",
        Update => "update",
        UpdateCheck => "article_update_check",
    }
);

/// A repository attached to a project. The first one is primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRef {
    /// `owner/name`.
    pub full_name: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

impl RepositoryRef {
    pub fn new(full_name: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            branch: branch.into(),
        }
    }

    /// Splits `owner/name`. Returns `None` for malformed names.
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        let (owner, name) = self.full_name.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some((owner, name))
    }
}

/// Facts derived by codebase analysis, stored as `projects.analysis_metadata`.
///
/// Generator output uses either camelCase or snake_case keys, so both are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(alias = "tech_stack")]
    pub tech_stack: Vec<String>,
    #[serde(alias = "key_patterns")]
    pub key_patterns: Vec<String>,
    pub components: Vec<Component>,
    #[serde(alias = "target_users")]
    pub target_users: Vec<String>,
}

/// A component of the analyzed codebase. Accepts a bare string or an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ComponentRepr")]
pub struct Component {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ComponentRepr {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        description: Option<String>,
    },
}

impl From<ComponentRepr> for Component {
    fn from(repr: ComponentRepr) -> Self {
        match repr {
            ComponentRepr::Name(name) => Component {
                name,
                description: None,
            },
            ComponentRepr::Detailed { name, description } => Component { name, description },
        }
    }
}

/// User-supplied guidance for generated content, stored as `projects.user_context`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserContext {
    #[serde(skip_serializing_if = "Option::is_none", alias = "target_audience")]
    pub target_audience: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "documentation_goals")]
    pub documentation_goals: Option<String>,
}

impl UserContext {
    pub fn is_empty(&self) -> bool {
        self.target_audience.is_none()
            && self.industry.is_none()
            && self.tone.is_none()
            && self.documentation_goals.is_none()
    }
}

/// A structured article body, stored as `articles.structured_content`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introduction: Option<String>,
    pub prerequisites: Vec<String>,
    pub steps: Vec<ArticleStep>,
    pub tips: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl StructuredContent {
    /// True when there is nothing a reader could see.
    pub fn is_blank(&self) -> bool {
        self.introduction.as_deref().map_or(true, |s| s.trim().is_empty())
            && self.prerequisites.is_empty()
            && self.steps.is_empty()
            && self.tips.is_empty()
            && self.summary.as_deref().map_or(true, |s| s.trim().is_empty())
    }
}

/// One step of a structured article. Accepts a bare string or an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ArticleStepRepr")]
pub struct ArticleStep {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArticleStepRepr {
    Text(String),
    Detailed {
        #[serde(default)]
        title: Option<String>,
        #[serde(default, alias = "description", alias = "body")]
        content: String,
    },
}

impl From<ArticleStepRepr> for ArticleStep {
    fn from(repr: ArticleStepRepr) -> Self {
        match repr {
            ArticleStepRepr::Text(content) => ArticleStep {
                title: None,
                content,
            },
            ArticleStepRepr::Detailed { title, content } => ArticleStep { title, content },
        }
    }
}

/// Shortens a commit SHA for display.
pub fn short_sha(sha: &str) -> &str {
    let end = sha
        .char_indices()
        .nth(7)
        .map(|(idx, _)| idx)
        .unwrap_or(sha.len());
    &sha[..end]
}
